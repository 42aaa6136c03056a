//! metadata-core: Consistency engine for file metadata kept beside a file store.
//!
//! This crate provides the core functionality for:
//! - Memoizing storage listings and content hashes per node
//! - Validating that metadata paths still resolve, with a TTL cache
//! - Re-associating orphaned metadata by content hash
//! - Following metadata across file moves with bounded retries
//! - Linking files into registrations and polling the resulting jobs
//! - HttpClient, FileStorage and Timer trait abstractions

pub mod config;
pub mod context;
pub mod controller;
pub mod drafts;
pub mod editing;
pub mod error;
pub mod events;
pub mod hash;
pub mod hash_cache;
pub mod hooks;
pub mod http;
pub mod memory;
pub mod model;
pub mod move_sync;
pub mod providers;
pub mod reconcile;
pub mod registration;
pub mod render;
pub mod retry;
pub mod schema;
pub mod storage;
pub mod store;
pub mod timer;
pub mod validation;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use context::{ContextManager, NodeContext};
pub use controller::{MetadataController, Services, metadata_base_url};
pub use drafts::{DraftRegistration, RegistrationChange, RegistrationTarget};
pub use editing::{FieldChange, FieldUpdate};
pub use error::{MetadataError, Result};
pub use events::{EventBus, MetadataEvent, Subscription};
pub use hash::ContentHash;
pub use hash_cache::HashCache;
pub use hooks::{FileTreeHooks, Indicator, ItemAction, RowDecoration, TreeRow};
pub use http::{HttpClient, HttpRequest, HttpResponse, Method, TransportError};
pub use memory::InMemoryMetadataServer;
pub use model::{Answer, Answers, FileHandle, FileKind, FileMetadata, MetadataItem, ProjectMetadata};
pub use move_sync::{MoveEvent, MoveLocation, MoveOutcome};
pub use providers::{HttpSchemaSource, MetadataProviderRegistry, ProjectProviders, SchemaSource, StaticSchemaSource};
pub use reconcile::{Resolution, ResolutionPlan, ResolveTarget};
pub use registration::RegistrationResult;
pub use retry::{Retry, RetryPolicy, RetryState};
pub use schema::{Schema, SchemaCatalog};
pub use storage::{FileStorage, InMemoryStorage, StorageError};
pub use timer::{ManualTimer, Timer};
pub use validation::{HashCheck, Validation, ValidationCache};
