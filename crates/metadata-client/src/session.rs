//! Wires the engine to native services for one home node.

use metadata_core::http::HttpClient;
use metadata_core::providers::{HttpSchemaSource, ProjectProviders, SchemaSource, StaticSchemaSource};
use metadata_core::store::MetadataStore;
use metadata_core::{MetadataController, Services};
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::http::ReqwestClient;
use crate::local_storage::LocalStorage;
use crate::timer::TokioTimer;

/// Build a controller for `node_id` over reqwest, the local mirror and tokio timers.
///
/// Without a schema API URL the schema and draft lists are empty.
pub fn connect(
    config: &ClientConfig,
    node_id: &str,
    storage: Arc<LocalStorage>,
) -> anyhow::Result<MetadataController> {
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(config.access_token.clone())?);
    let schemas: Arc<dyn SchemaSource> = match &config.schema_api_url {
        Some(url) => Arc::new(HttpSchemaSource::new(
            MetadataStore::new(Arc::clone(&http)),
            url.clone(),
        )),
        None => Arc::new(StaticSchemaSource::default()),
    };

    let services = Services {
        http,
        storage,
        timer: Arc::new(TokioTimer),
        providers: Arc::new(ProjectProviders),
        schemas,
    };
    Ok(MetadataController::new(
        services,
        &config.engine,
        node_id,
        config.metadata_url(node_id),
    ))
}
