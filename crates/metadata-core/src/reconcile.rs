//! Re-association of orphaned metadata by content hash.
//!
//! When a record's path no longer resolves, the node's live files are hashed and any
//! entry of the same kind whose hash equals the record's stored hash is offered as the
//! record's new location. Deleting the record is always offered as well.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::{ContextManager, NodeContext};
use crate::error::{MetadataError, Result};
use crate::model::{FileHandle, FileMetadata};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveTarget {
    /// Move the record to this path.
    Repath(String),
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionPlan {
    pub orphan: FileMetadata,
    /// Live entries matching the orphan's kind and hash, in listing order.
    pub candidates: Vec<FileHandle>,
}

impl ResolutionPlan {
    /// Every choice to offer, candidates first and deletion last.
    pub fn targets(&self) -> Vec<ResolveTarget> {
        self.candidates
            .iter()
            .map(|c| ResolveTarget::Repath(c.path.clone()))
            .chain(std::iter::once(ResolveTarget::Delete))
            .collect()
    }

    /// Preselected choice: the first candidate, or deletion when none matched.
    pub fn default_target(&self) -> ResolveTarget {
        self.candidates
            .first()
            .map(|c| ResolveTarget::Repath(c.path.clone()))
            .unwrap_or(ResolveTarget::Delete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Repathed { from: String, to: String },
    Deleted { path: String },
}

pub struct ReconciliationEngine {
    contexts: Arc<ContextManager>,
}

impl ReconciliationEngine {
    pub fn new(contexts: Arc<ContextManager>) -> Self {
        Self { contexts }
    }

    /// Search the node's live files for entries with the orphan's content hash.
    pub async fn find_candidates(
        &self,
        context: &NodeContext,
        orphan: &FileMetadata,
    ) -> Result<ResolutionPlan> {
        let Some(expected) = orphan.hash.as_deref() else {
            info!("{} has no recorded hash; only deletion is possible", orphan.path);
            return Ok(ResolutionPlan {
                orphan: orphan.clone(),
                candidates: Vec::new(),
            });
        };

        let files = context.hash_cache.list_files(None, true).await?;
        let hashes = try_join_all(files.iter().map(|f| context.hash_cache.compute_hash(f))).await?;
        let candidates: Vec<FileHandle> = files
            .into_iter()
            .zip(hashes)
            .filter(|(file, hash)| {
                file.kind.matches_folder_flag(orphan.folder)
                    && hash.as_str() == expected
                    && file.path != orphan.path
            })
            .map(|(file, _)| file)
            .collect();

        info!(
            "Found {} candidate(s) for orphaned metadata {}",
            candidates.len(),
            orphan.path
        );
        Ok(ResolutionPlan {
            orphan: orphan.clone(),
            candidates,
        })
    }

    /// Apply the chosen target, then reload the node.
    ///
    /// Re-pathing writes the new record before deleting the old one. If the write fails
    /// nothing is deleted; if the delete fails the node is left holding both records and
    /// `MetadataError::DuplicateRecord` is returned.
    pub async fn resolve(
        &self,
        context: &NodeContext,
        orphan: &FileMetadata,
        target: ResolveTarget,
    ) -> Result<Resolution> {
        context.require_editable()?;
        let store = self.contexts.store();

        let resolution = match target {
            ResolveTarget::Repath(new_path) => {
                store
                    .patch_file(&context.base_url, &orphan.repathed(new_path.as_str()))
                    .await?;
                if let Err(e) = store.delete_file(&context.base_url, &orphan.path).await {
                    warn!(
                        "Metadata for {} now exists at both {} and {}",
                        context.node_id, orphan.path, new_path
                    );
                    return Err(MetadataError::DuplicateRecord {
                        kept: new_path,
                        stale: orphan.path.clone(),
                        source: Box::new(e),
                    });
                }
                Resolution::Repathed {
                    from: orphan.path.clone(),
                    to: new_path,
                }
            }
            ResolveTarget::Delete => {
                store.delete_file(&context.base_url, &orphan.path).await?;
                Resolution::Deleted {
                    path: orphan.path.clone(),
                }
            }
        };

        context.validation.forget(&orphan.path);
        self.contexts.refresh(&context.node_id).await;
        info!("Resolved orphaned metadata: {:?}", resolution);
        Ok(resolution)
    }
}
