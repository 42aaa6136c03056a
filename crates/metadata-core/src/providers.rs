//! Injected registries: metadata-providing repositories, registration endpoints,
//! schemas and drafts.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use crate::drafts::DraftRegistration;
use crate::error::{MetadataError, Result};
use crate::model::{ProjectMetadata, Registry, RepositoryDescriptor};
use crate::schema::Schema;
use crate::store::MetadataStore;

/// Repositories and registries contributed to a project by other add-ons.
pub trait MetadataProviderRegistry: Send + Sync {
    fn list_repositories(&self, project: &ProjectMetadata) -> Vec<RepositoryDescriptor>;

    fn list_registries(&self, project: &ProjectMetadata) -> Vec<Registry>;
}

/// Uses whatever repositories the metadata service declares for the project.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectProviders;

impl MetadataProviderRegistry for ProjectProviders {
    fn list_repositories(&self, project: &ProjectMetadata) -> Vec<RepositoryDescriptor> {
        project.repositories.clone()
    }

    fn list_registries(&self, project: &ProjectMetadata) -> Vec<Registry> {
        project
            .repositories
            .iter()
            .flat_map(|repo| repo.registries.iter().cloned())
            .collect()
    }
}

/// Source of registration schemas and of a node's draft registrations.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait SchemaSource: Send + Sync {
    async fn load_schemas(&self) -> Result<Vec<Schema>>;

    async fn load_drafts(&self, node_id: &str) -> Result<Vec<DraftRegistration>>;
}

/// Reads schemas and drafts from the JSON:API of the host application.
pub struct HttpSchemaSource {
    store: MetadataStore,
    api_url: String,
}

impl HttpSchemaSource {
    /// `api_url` is the JSON:API root, e.g. `https://api.example.org/v2/`.
    pub fn new(store: MetadataStore, api_url: impl Into<String>) -> Self {
        Self {
            store,
            api_url: api_url.into(),
        }
    }

    /// Collect `data` entries across `links.next` pages.
    async fn fetch_all(&self, operation: &'static str, first: String) -> Result<Vec<Value>> {
        let mut resources = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                warn!("Page {} was already fetched; stopping pagination", url);
                break;
            }
            let page = self.store.get_json(operation, &url).await?;
            match page.get("data") {
                Some(Value::Array(data)) => resources.extend(data.iter().cloned()),
                _ => {
                    return Err(MetadataError::Decode {
                        url,
                        message: "missing data array".into(),
                    });
                }
            }
            next = page
                .pointer("/links/next")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        Ok(resources)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SchemaSource for HttpSchemaSource {
    async fn load_schemas(&self) -> Result<Vec<Schema>> {
        let url = format!("{}schemas/registrations/?page[size]=100", self.api_url);
        let resources = self.fetch_all("load_schemas", url).await?;
        Ok(resources
            .into_iter()
            .filter_map(|resource| match Schema::from_resource(resource) {
                Ok(schema) => Some(schema),
                Err(e) => {
                    warn!("Skipping unreadable schema: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn load_drafts(&self, node_id: &str) -> Result<Vec<DraftRegistration>> {
        let url = format!("{}nodes/{}/draft_registrations/", self.api_url, node_id);
        let resources = self.fetch_all("load_drafts", url).await?;
        Ok(resources
            .into_iter()
            .filter_map(|resource| match DraftRegistration::from_resource(resource) {
                Ok(draft) => Some(draft),
                Err(e) => {
                    warn!("Skipping unreadable draft registration: {}", e);
                    None
                }
            })
            .collect())
    }
}

/// Fixed schemas and drafts, for tests and offline use.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaSource {
    pub schemas: Vec<Schema>,
    pub drafts: Vec<DraftRegistration>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SchemaSource for StaticSchemaSource {
    async fn load_schemas(&self) -> Result<Vec<Schema>> {
        Ok(self.schemas.clone())
    }

    async fn load_drafts(&self, _node_id: &str) -> Result<Vec<DraftRegistration>> {
        Ok(self.drafts.clone())
    }
}
