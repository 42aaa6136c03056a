//! Per-node contexts and the manager that loads them.
//!
//! A `NodeContext` is an immutable snapshot of one node's metadata. Every reload builds a
//! new snapshot and swaps it in; the node's hash cache and validation cache carry over.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{MetadataError, Result};
use crate::events::{EventBus, MetadataEvent};
use crate::hash_cache::HashCache;
use crate::model::{FileMetadata, ProjectMetadata};
use crate::providers::MetadataProviderRegistry;
use crate::storage::FileStorage;
use crate::store::{MetadataStore, ProjectLoad};
use crate::validation::ValidationCache;

pub struct NodeContext {
    pub node_id: String,
    /// Metadata base URL, `{api}{node_id}/metadata/`.
    pub base_url: String,
    pub project: ProjectMetadata,
    pub addon_attached: bool,
    pub hash_cache: Arc<HashCache>,
    pub validation: Arc<ValidationCache>,
}

impl NodeContext {
    pub fn find_file(&self, path: &str) -> Option<&FileMetadata> {
        self.project.find_file(path)
    }

    pub fn is_editable(&self) -> bool {
        self.addon_attached && self.project.editable
    }

    pub fn require_editable(&self) -> Result<()> {
        if self.is_editable() {
            Ok(())
        } else {
            Err(MetadataError::ReadOnly(self.node_id.clone()))
        }
    }
}

/// Marks a node as loading for as long as it is alive.
struct LoadingGuard<'a> {
    loading: &'a Mutex<HashSet<String>>,
    node_id: String,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(loading: &'a Mutex<HashSet<String>>, node_id: &str) -> Option<Self> {
        let inserted = loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node_id.to_string());
        inserted.then(|| Self {
            loading,
            node_id: node_id.to_string(),
        })
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.node_id);
    }
}

/// Loads node metadata and owns the current context of every node.
pub struct ContextManager {
    store: MetadataStore,
    storage: Arc<dyn FileStorage>,
    providers: Arc<dyn MetadataProviderRegistry>,
    events: Arc<EventBus>,
    validation_ttl: Duration,
    contexts: Mutex<HashMap<String, Arc<NodeContext>>>,
    loading: Mutex<HashSet<String>>,
}

impl ContextManager {
    pub fn new(
        store: MetadataStore,
        storage: Arc<dyn FileStorage>,
        providers: Arc<dyn MetadataProviderRegistry>,
        events: Arc<EventBus>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            storage,
            providers,
            events,
            validation_ttl: config.validation_ttl,
            contexts: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn providers(&self) -> &Arc<dyn MetadataProviderRegistry> {
        &self.providers
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<NodeContext>> {
        self.lock_contexts().get(node_id).cloned()
    }

    pub fn require(&self, node_id: &str) -> Result<Arc<NodeContext>> {
        self.get(node_id)
            .ok_or_else(|| MetadataError::UnknownNode(node_id.to_string()))
    }

    pub fn is_loading(&self, node_id: &str) -> bool {
        self.loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(node_id)
    }

    /// Log a failure and publish it as a notification/telemetry event.
    pub fn report(&self, err: &MetadataError) {
        error!(
            operation = err.operation(),
            url = err.url().unwrap_or(""),
            status = err.status().unwrap_or(0),
            "{}",
            err
        );
        self.events.emit(MetadataEvent::failure(err));
    }

    /// Load `node_id` from `base_url` and swap in the new context.
    ///
    /// Returns `Ok(None)` when a load of the same node is already running. Failures are
    /// reported before they are returned.
    pub async fn load(&self, node_id: &str, base_url: &str) -> Result<Option<Arc<NodeContext>>> {
        let Some(_guard) = LoadingGuard::acquire(&self.loading, node_id) else {
            debug!("Metadata for {} is already loading", node_id);
            return Ok(None);
        };

        let (hash_cache, validation) = match self.get(node_id) {
            Some(previous) => (
                Arc::clone(&previous.hash_cache),
                Arc::clone(&previous.validation),
            ),
            None => (
                Arc::new(HashCache::new(node_id, Arc::clone(&self.storage))),
                Arc::new(ValidationCache::new(self.validation_ttl)),
            ),
        };

        let (project, addon_attached) = match self.store.load_project(base_url).await {
            Ok(ProjectLoad::Attached(mut project)) => {
                for repository in self.providers.list_repositories(&project) {
                    match self.store.load_repository_files(&repository).await {
                        Ok(files) => project.files.extend(files),
                        Err(e) => self.report(&e),
                    }
                }
                (project, true)
            }
            Ok(ProjectLoad::NotAttached) => (ProjectMetadata::detached(), false),
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };

        let context = Arc::new(NodeContext {
            node_id: node_id.to_string(),
            base_url: base_url.to_string(),
            project,
            addon_attached,
            hash_cache,
            validation,
        });
        info!(
            "Loaded metadata for {} ({} files, attached: {})",
            node_id,
            context.project.files.len(),
            addon_attached
        );
        self.lock_contexts()
            .insert(node_id.to_string(), Arc::clone(&context));
        self.events.emit(MetadataEvent::MetadataLoaded {
            node_id: node_id.to_string(),
            files: context.project.files.len(),
            attached: addon_attached,
        });
        Ok(Some(context))
    }

    /// Reload a node that has been loaded before.
    pub async fn reload(&self, node_id: &str) -> Result<Option<Arc<NodeContext>>> {
        let base_url = self.require(node_id)?.base_url.clone();
        self.load(node_id, &base_url).await
    }

    /// Reload after a write. A failed load has already been reported, so it is only logged.
    pub async fn refresh(&self, node_id: &str) {
        if let Err(e) = self.reload(node_id).await {
            warn!("Metadata for {} may be stale: {}", node_id, e);
        }
    }

    fn lock_contexts(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<NodeContext>>> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::testing::Fixture;
    use serde_json::json;

    #[tokio::test]
    async fn test_detached_node_gets_readonly_context() {
        let fixture = Fixture::new();
        fixture.server.add_detached_node(&Fixture::base("abc12"));

        let context = fixture.load("abc12").await;
        assert!(!context.addon_attached);
        assert!(!context.is_editable());
        assert!(context.project.files.is_empty());
        assert!(fixture.failures().is_empty());
    }

    #[tokio::test]
    async fn test_reload_keeps_caches_and_replaces_snapshot() {
        let fixture = Fixture::new();
        fixture.add_node("abc12", vec![FileMetadata::new("osfstorage/a.txt", false)]);
        let first = fixture.load("abc12").await;

        fixture.server.add_node(
            &Fixture::base("abc12"),
            ProjectMetadata {
                editable: true,
                ..Default::default()
            },
        );
        let second = fixture.load("abc12").await;

        assert!(Arc::ptr_eq(&first.hash_cache, &second.hash_cache));
        assert!(Arc::ptr_eq(&first.validation, &second.validation));
        assert_eq!(first.project.files.len(), 1);
        assert!(second.project.files.is_empty());
        assert!(Arc::ptr_eq(&fixture.contexts.get("abc12").unwrap(), &second));
    }

    #[tokio::test]
    async fn test_concurrent_load_is_deduplicated() {
        let fixture = Fixture::new();
        fixture.add_node("abc12", Vec::new());
        let base = Fixture::base("abc12");

        let (first, second) = futures::join!(
            fixture.contexts.load("abc12", &base),
            fixture.contexts.load("abc12", &base)
        );
        // The in-memory server answers without suspending, so the first load finishes
        // before the second starts; the flag must have been released in between.
        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_some());
        assert!(!fixture.contexts.is_loading("abc12"));

        let guard = LoadingGuard::acquire(&fixture.contexts.loading, "abc12");
        assert!(guard.is_some());
        assert!(fixture.contexts.load("abc12", &base).await.unwrap().is_none());
        drop(guard);
        assert!(fixture.contexts.load("abc12", &base).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_failure_is_reported_and_returned() {
        let fixture = Fixture::new();
        fixture.add_node("abc12", Vec::new());
        fixture.server.fail_next(Method::Get, "abc12/metadata/project", 500);

        let Err(err) = fixture
            .contexts
            .load("abc12", &Fixture::base("abc12"))
            .await
        else {
            panic!("expected load failure");
        };
        assert_eq!(err.status(), Some(500));
        assert_eq!(fixture.failures(), vec![("load_project".to_string(), Some(500))]);
        assert!(!fixture.contexts.is_loading("abc12"));
    }

    #[tokio::test]
    async fn test_repository_files_are_merged() {
        let fixture = Fixture::new();
        fixture.server.set_route(
            "https://repo.example.org/metadata",
            json!({"data": {"type": "metadata-node-files", "attributes": [
                {"path": "dataverse/data.csv", "folder": false, "items": []}
            ]}}),
        );
        let project: ProjectMetadata = serde_json::from_value(json!({
            "editable": true,
            "files": [{"path": "osfstorage/a.txt", "folder": false, "items": []}],
            "repositories": [{"metadata": {"urls": {"get": "https://repo.example.org/metadata"}}}]
        }))
        .unwrap();
        fixture.server.add_node(&Fixture::base("abc12"), project);

        let context = fixture.load("abc12").await;
        let paths: Vec<_> = context.project.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["osfstorage/a.txt", "dataverse/data.csv"]);
        assert!(context.find_file("dataverse/data.csv").unwrap().readonly);
        assert!(!context.find_file("osfstorage/a.txt").unwrap().readonly);
    }
}
