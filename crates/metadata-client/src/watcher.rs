//! Watches the local storage mirror for changes.
//!
//! Uses notify-debouncer-mini; events are reported per node as storage paths.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A change below `{root}/{node_id}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub node_id: String,
    /// Storage path without a trailing slash (`osfstorage/dir/a.txt`).
    pub path: String,
    /// The path no longer exists.
    pub removed: bool,
}

impl StorageEvent {
    /// True when a record at `record_path` is at or below the changed path.
    pub fn affects(&self, record_path: &str) -> bool {
        record_path == self.path
            || record_path
                .strip_prefix(self.path.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

pub struct StorageWatcher {
    root: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<StorageEvent>,
}

impl StorageWatcher {
    /// Watch `root` recursively with a 200ms debounce.
    pub fn new(root: PathBuf) -> Result<Self> {
        let root = root.canonicalize().unwrap_or(root);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watched_root = root.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(storage_event) = to_storage_event(&event.path, &watched_root) {
                            if event_tx.send(storage_event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Storage watcher error: {}", e);
                }
            },
        )?;
        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            _debouncer: debouncer,
            event_rx,
        })
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<StorageEvent> {
        &mut self.event_rx
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map a changed disk path to its node and storage path. Hidden entries are ignored.
fn to_storage_event(path: &Path, root: &Path) -> Option<StorageEvent> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return None;
        };
        let part = part.to_str()?;
        if part.starts_with('.') {
            return None;
        }
        parts.push(part);
    }
    // A node directory or provider root alone carries no file metadata.
    if parts.len() < 3 {
        return None;
    }

    let event = StorageEvent {
        node_id: parts[0].to_string(),
        path: parts[1..].join("/"),
        removed: !path.exists(),
    };
    debug!("Storage event: {:?}", event);
    Some(event)
}
