//! Typed accessor over the metadata service's HTTP resources.
//!
//! All paths are relative to a node's metadata base URL (`{api}{node_id}/metadata/`).

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MetadataError, Result};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::model::{FileMetadata, ProjectMetadata, RepositoryDescriptor};

const NODE_FILES_TYPE: &str = "metadata-node-files";

/// Result of loading a node's project metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectLoad {
    Attached(ProjectMetadata),
    /// The service answered 400: the add-on is not enabled for this node.
    NotAttached,
}

/// State of an asynchronous registration job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobProgress {
    Running,
    Finished(String),
}

#[derive(Clone)]
pub struct MetadataStore {
    http: Arc<dyn HttpClient>,
}

impl MetadataStore {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// Send a request and require a 2xx status.
    async fn send(&self, operation: &'static str, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        debug!("{} {} ({})", request.method, url, operation);
        let response = self
            .http
            .send(request)
            .await
            .map_err(|source| MetadataError::Transport {
                operation,
                url: url.clone(),
                source,
            })?;
        if !response.is_success() {
            return Err(MetadataError::Status {
                operation,
                url,
                status: response.status,
            });
        }
        Ok(response)
    }

    /// GET a JSON document.
    pub async fn get_json(&self, operation: &'static str, url: &str) -> Result<Value> {
        Ok(self.send(operation, HttpRequest::get(url)).await?.body)
    }

    pub async fn load_project(&self, base_url: &str) -> Result<ProjectLoad> {
        let url = format!("{base_url}project");
        let response = self
            .http
            .send(HttpRequest::get(&url))
            .await
            .map_err(|source| MetadataError::Transport {
                operation: "load_project",
                url: url.clone(),
                source,
            })?;
        if response.status == 400 {
            debug!("Metadata add-on not attached at {}", base_url);
            return Ok(ProjectLoad::NotAttached);
        }
        if !response.is_success() {
            return Err(MetadataError::Status {
                operation: "load_project",
                url,
                status: response.status,
            });
        }

        let attributes = response
            .body
            .pointer("/data/attributes")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let project = serde_json::from_value(attributes).map_err(|e| MetadataError::Decode {
            url,
            message: e.to_string(),
        })?;
        Ok(ProjectLoad::Attached(project))
    }

    /// Files contributed by a linked repository, with `readonly` set from its update URL.
    pub async fn load_repository_files(
        &self,
        repository: &RepositoryDescriptor,
    ) -> Result<Vec<FileMetadata>> {
        let Some(links) = repository.metadata.as_ref() else {
            return Ok(Vec::new());
        };
        let body = self.get_json("load_repository", &links.urls.get).await?;
        if body.pointer("/data/type").and_then(Value::as_str) != Some(NODE_FILES_TYPE) {
            return Ok(Vec::new());
        }

        let readonly = repository.is_readonly();
        let entries = body
            .pointer("/data/attributes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<FileMetadata>(entry) {
                Ok(mut file) => {
                    file.readonly = readonly;
                    files.push(file);
                }
                Err(e) => warn!("Skipping malformed repository entry from {}: {}", links.urls.get, e),
            }
        }
        Ok(files)
    }

    /// Upsert the full record (including its hash).
    pub async fn patch_file(&self, base_url: &str, metadata: &FileMetadata) -> Result<()> {
        let url = format!("{base_url}files/{}", metadata.path);
        let body = serde_json::to_value(metadata).map_err(|e| MetadataError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;
        self.send("patch_file", HttpRequest::patch(url, body)).await?;
        Ok(())
    }

    pub async fn delete_file(&self, base_url: &str, path: &str) -> Result<()> {
        let url = format!("{base_url}files/{path}");
        self.send("delete_file", HttpRequest::delete(url)).await?;
        Ok(())
    }

    /// Update only the stored hash of a record.
    pub async fn patch_hash(&self, base_url: &str, path: &str, hash: &str) -> Result<()> {
        let url = format!("{base_url}hashes/{path}");
        self.send("patch_hash", HttpRequest::patch(url, json!({ "hash": hash })))
            .await?;
        Ok(())
    }

    /// PUT (register) or DELETE (deregister). Returns the job's progress URL if one was started.
    pub async fn update_registration(&self, url: &str, register: bool) -> Result<Option<String>> {
        let request = if register {
            HttpRequest::put(url, json!({}))
        } else {
            HttpRequest::delete(url)
        };
        let response = self.send("update_registration", request).await?;
        Ok(response.attribute_str("progress_url").map(str::to_string))
    }

    pub async fn registration_progress(&self, progress_url: &str) -> Result<JobProgress> {
        let response = self
            .send("registration_progress", HttpRequest::get(progress_url))
            .await?;
        match response.body.pointer("/data/attributes/result") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(JobProgress::Running),
            Some(Value::String(result)) if result.is_empty() => Ok(JobProgress::Running),
            Some(Value::String(result)) => Ok(JobProgress::Finished(result.clone())),
            Some(other) => Ok(JobProgress::Finished(other.to_string())),
        }
    }
}
