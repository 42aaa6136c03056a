//! Shared fixture for unit tests.

use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::context::{ContextManager, NodeContext};
use crate::events::{EventBus, MetadataEvent, Subscription};
use crate::memory::InMemoryMetadataServer;
use crate::model::{FileMetadata, ProjectMetadata};
use crate::providers::ProjectProviders;
use crate::storage::InMemoryStorage;
use crate::store::MetadataStore;
use crate::timer::ManualTimer;

pub(crate) struct Fixture {
    pub server: Arc<InMemoryMetadataServer>,
    pub storage: Arc<InMemoryStorage>,
    pub timer: Arc<ManualTimer>,
    pub events: Arc<EventBus>,
    pub contexts: Arc<ContextManager>,
    pub config: EngineConfig,
    captured: Arc<Mutex<Vec<MetadataEvent>>>,
    _subscription: Subscription,
}

impl Fixture {
    pub fn new() -> Self {
        let server = Arc::new(InMemoryMetadataServer::new());
        let storage = Arc::new(InMemoryStorage::new());
        let events = Arc::new(EventBus::new());
        let config = EngineConfig::default();
        let contexts = Arc::new(ContextManager::new(
            MetadataStore::new(server.clone()),
            storage.clone(),
            Arc::new(ProjectProviders),
            Arc::clone(&events),
            &config,
        ));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let subscription = events.subscribe(move |event| {
            sink.lock().unwrap().push(event);
        });
        Self {
            server,
            storage,
            timer: Arc::new(ManualTimer::default()),
            events,
            contexts,
            config,
            captured,
            _subscription: subscription,
        }
    }

    pub fn base(node_id: &str) -> String {
        format!("https://rdm.example.org/api/v1/project/{node_id}/metadata/")
    }

    pub fn store(&self) -> MetadataStore {
        MetadataStore::new(self.server.clone())
    }

    /// Serve an editable project holding `files`.
    pub fn add_node(&self, node_id: &str, files: Vec<FileMetadata>) {
        self.server.add_node(
            &Self::base(node_id),
            ProjectMetadata {
                editable: true,
                files,
                ..Default::default()
            },
        );
    }

    pub async fn load(&self, node_id: &str) -> Arc<NodeContext> {
        self.contexts
            .load(node_id, &Self::base(node_id))
            .await
            .unwrap()
            .unwrap()
    }

    pub fn events(&self) -> Vec<MetadataEvent> {
        self.captured.lock().unwrap().clone()
    }

    /// `(operation, status)` of every reported failure.
    pub fn failures(&self) -> Vec<(String, Option<u16>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MetadataEvent::Failure {
                    operation, status, ..
                } => Some((operation, status)),
                _ => None,
            })
            .collect()
    }
}

/// A record with a stored hash.
pub(crate) fn hashed(path: &str, folder: bool, hash: &str) -> FileMetadata {
    let mut file = FileMetadata::new(path, folder);
    file.hash = Some(hash.to_string());
    file
}
