//! metadata-client library: Native services for the metadata engine.
//!
//! Exposes internal modules for testing.

pub mod config;
pub mod http;
pub mod local_storage;
pub mod session;
pub mod timer;
pub mod watcher;

pub use config::{ClientConfig, ConfigError};
pub use http::ReqwestClient;
pub use local_storage::LocalStorage;
pub use session::connect;
pub use timer::TokioTimer;
pub use watcher::{StorageEvent, StorageWatcher};
