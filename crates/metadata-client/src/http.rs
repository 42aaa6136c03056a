//! Native HTTP transport for the metadata service via reqwest.

use async_trait::async_trait;
use metadata_core::http::{HttpClient, HttpRequest, HttpResponse, Method, TransportError};
use serde_json::Value;
use tracing::debug;

pub struct ReqwestClient {
    client: reqwest::Client,
    /// Sent as a bearer token on every request.
    access_token: Option<String>,
}

impl ReqwestClient {
    pub fn new(access_token: Option<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("metadata-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self {
            client,
            access_token,
        })
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Decode a response body. Empty bodies are `Null`; so are unreadable error pages.
fn decode_body(status: u16, bytes: &[u8]) -> Result<Value, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(bytes) {
        Ok(body) => Ok(body),
        Err(_) if !(200..300).contains(&status) => Ok(Value::Null),
        Err(e) => Err(TransportError::InvalidBody(e.to_string())),
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method), &request.url);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        debug!("{} {} -> {}", request.method, request.url, status);

        Ok(HttpResponse::new(status, decode_body(status, &bytes)?))
    }
}
