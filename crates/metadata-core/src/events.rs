//! Event infrastructure for the metadata engine.
//!
//! `MetadataEvent` carries user notifications, telemetry records and move completions.
//! Hosts subscribe to the shared `Arc<EventBus>` to render notifications or forward
//! failures to their telemetry sink.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::error::MetadataError;
use crate::model::ProjectMetadata;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetadataEvent {
    /// A node's metadata was (re)loaded.
    #[serde(rename_all = "camelCase")]
    MetadataLoaded {
        node_id: String,
        files: usize,
        /// False when the add-on is not attached to the node.
        attached: bool,
    },
    /// A stored hash was refreshed after re-verifying a file.
    #[serde(rename_all = "camelCase")]
    HashUpdated {
        node_id: String,
        path: String,
        hash: String,
    },
    /// Metadata for a moved subtree is confirmed at its new location.
    ///
    /// Emitted once for the destination node and then once for the source node.
    #[serde(rename_all = "camelCase")]
    MoveCompleted {
        node_id: String,
        path: String,
        project: ProjectMetadata,
    },
    /// The destination never showed the moved metadata within the allowed attempts.
    #[serde(rename_all = "camelCase")]
    MoveAbandoned {
        from_node: String,
        from_path: String,
        to_node: String,
        to_path: String,
        attempts: u32,
        missing: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    RegistrationCompleted {
        node_id: String,
        path: String,
        target: String,
        result: Option<String>,
    },
    /// A failed operation. Shown to the user and recorded as telemetry.
    #[serde(rename_all = "camelCase")]
    Failure {
        operation: String,
        url: Option<String>,
        status: Option<u16>,
        message: String,
    },
}

impl MetadataEvent {
    pub fn failure(error: &MetadataError) -> Self {
        Self::Failure {
            operation: error.operation().to_string(),
            url: error.url().map(str::to_string),
            status: error.status(),
            message: error.to_string(),
        }
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing metadata events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(MetadataEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(MetadataEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while a read lock is held during emit.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: MetadataEvent) {
        // Clone the callback list so a callback may subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(node_id: &str) -> MetadataEvent {
        MetadataEvent::MetadataLoaded {
            node_id: node_id.into(),
            files: 0,
            attached: true,
        }
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(loaded("abc12"));
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        bus.emit(loaded("abc12"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failure_event_carries_request_details() {
        let error = MetadataError::Status {
            operation: "load_project",
            url: "https://example.org/api/v1/project/abc12/metadata/project".into(),
            status: 500,
        };
        let json = serde_json::to_value(MetadataEvent::failure(&error)).unwrap();
        assert_eq!(json["type"], "failure");
        assert_eq!(json["operation"], "load_project");
        assert_eq!(json["status"], 500);
        assert!(json["url"].as_str().unwrap().ends_with("/project"));
    }

    #[test]
    fn test_move_abandoned_serialization() {
        let event = MetadataEvent::MoveAbandoned {
            from_node: "a".into(),
            from_path: "osfstorage/dir/".into(),
            to_node: "b".into(),
            to_path: "osfstorage/dir2/".into(),
            attempts: 10,
            missing: vec!["osfstorage/dir2/a.txt".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"moveAbandoned\""));
        assert!(json.contains("\"fromNode\":\"a\""));
        assert!(json.contains("\"attempts\":10"));
    }
}
