//! Follows metadata across file moves.
//!
//! The metadata service moves records asynchronously after storage reports a move. The
//! synchronizer reloads the destination until every moved record shows up there, then
//! refreshes the source and announces completion for both nodes.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::{ContextManager, NodeContext};
use crate::error::Result;
use crate::events::MetadataEvent;
use crate::retry::{Retry, RetryPolicy, RetryState};
use crate::timer::Timer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveLocation {
    pub node_id: String,
    /// Metadata path (`{provider}{materialized}`); folders end with `/`.
    pub path: String,
}

impl MoveLocation {
    pub fn new(node_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            path: path.into(),
        }
    }
}

/// A completed storage move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveEvent {
    pub from: MoveLocation,
    pub to: MoveLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// No metadata existed under the source path.
    NothingToSync,
    Synchronized {
        attempts: u32,
        /// Destination paths confirmed present.
        moved: Vec<String>,
        /// Source paths still listed after the source reload.
        lingering: Vec<String>,
    },
    GivenUp {
        attempts: u32,
        missing: Vec<String>,
    },
}

pub struct MoveSynchronizer {
    contexts: Arc<ContextManager>,
    timer: Arc<dyn Timer>,
    policy: RetryPolicy,
}

impl MoveSynchronizer {
    pub fn new(contexts: Arc<ContextManager>, timer: Arc<dyn Timer>, policy: RetryPolicy) -> Self {
        Self {
            contexts,
            timer,
            policy,
        }
    }

    pub async fn on_move_complete(&self, event: &MoveEvent) -> Result<MoveOutcome> {
        let source = self.contexts.require(&event.from.node_id)?;
        self.contexts.require(&event.to.node_id)?;

        let expected: Vec<String> = source
            .project
            .files_under(&event.from.path)
            .map(|file| format!("{}{}", event.to.path, &file.path[event.from.path.len()..]))
            .collect();
        if expected.is_empty() {
            debug!(
                "No metadata under {} in {}; nothing to move",
                event.from.path, event.from.node_id
            );
            return Ok(MoveOutcome::NothingToSync);
        }

        let mut retry = Retry::new(self.policy.clone());
        let mut missing = expected.clone();
        let mut confirmed: Option<Arc<NodeContext>> = None;
        while let Some(delay) = retry.next_delay() {
            self.timer.sleep(delay).await;
            match self.contexts.reload(&event.to.node_id).await {
                Ok(Some(destination)) => {
                    missing = expected
                        .iter()
                        .filter(|path| !destination.project.contains_path(path))
                        .cloned()
                        .collect();
                    if missing.is_empty() {
                        retry.record_success();
                        confirmed = Some(destination);
                    } else {
                        debug!(
                            "{} of {} moved records not yet visible in {}",
                            missing.len(),
                            expected.len(),
                            event.to.node_id
                        );
                        retry.record_failure();
                    }
                }
                Ok(None) => {
                    debug!("{} is already reloading", event.to.node_id);
                    retry.record_failure();
                }
                Err(e) => {
                    debug!("Reloading {} failed: {}", event.to.node_id, e);
                    retry.record_failure();
                }
            }
        }

        match (retry.state(), confirmed) {
            (RetryState::Succeeded, Some(destination)) => {
                self.finish(event, &destination, expected, retry.attempts())
                    .await
            }
            _ => {
                warn!(
                    "Gave up waiting for moved metadata in {} after {} attempts; missing: {:?}",
                    event.to.node_id,
                    retry.attempts(),
                    missing
                );
                self.contexts.events().emit(MetadataEvent::MoveAbandoned {
                    from_node: event.from.node_id.clone(),
                    from_path: event.from.path.clone(),
                    to_node: event.to.node_id.clone(),
                    to_path: event.to.path.clone(),
                    attempts: retry.attempts(),
                    missing: missing.clone(),
                });
                Ok(MoveOutcome::GivenUp {
                    attempts: retry.attempts(),
                    missing,
                })
            }
        }
    }

    async fn finish(
        &self,
        event: &MoveEvent,
        destination: &NodeContext,
        moved: Vec<String>,
        attempts: u32,
    ) -> Result<MoveOutcome> {
        let reloaded = self.contexts.reload(&event.from.node_id).await;
        destination.hash_cache.clear_cache();
        self.emit_completed(&event.to, destination);

        // A failed reload was reported by the load; fall back to the last snapshot.
        let source = match reloaded {
            Ok(Some(source)) => source,
            Ok(None) | Err(_) => self.contexts.require(&event.from.node_id)?,
        };
        let lingering: Vec<String> = source
            .project
            .files_under(&event.from.path)
            .map(|file| file.path.clone())
            .filter(|path| !moved.contains(path))
            .collect();
        if !lingering.is_empty() {
            warn!(
                "Moved metadata still listed in {}: {:?}",
                event.from.node_id, lingering
            );
        }
        self.emit_completed(&event.from, &source);

        info!(
            "Metadata for {} moved from {}/{} to {}/{} after {} attempt(s)",
            moved.len(),
            event.from.node_id,
            event.from.path,
            event.to.node_id,
            event.to.path,
            attempts
        );
        Ok(MoveOutcome::Synchronized {
            attempts,
            moved,
            lingering,
        })
    }

    fn emit_completed(&self, location: &MoveLocation, context: &NodeContext) {
        self.contexts.events().emit(MetadataEvent::MoveCompleted {
            node_id: location.node_id.clone(),
            path: location.path.clone(),
            project: context.project.clone(),
        });
    }
}
