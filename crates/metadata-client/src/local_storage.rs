//! FileStorage over a local mirror of node storage.
//!
//! Layout: `{root}/{node_id}/{provider}/{materialized path}`. Hidden entries are skipped.

use async_trait::async_trait;
use metadata_core::model::FileHandle;
use metadata_core::storage::{FileStorage, Result, StorageError};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn node_dir(&self, node_id: &str) -> PathBuf {
        self.root.join(node_id)
    }

    /// Disk location of a storage path; rejects paths that would leave the node directory.
    pub fn full_path(&self, node_id: &str, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Io(format!("invalid storage path: {path}")));
        }
        Ok(self.node_dir(node_id).join(relative))
    }

    /// Move a file or folder, possibly into another node's directory.
    pub async fn move_path(&self, from_node: &str, from: &str, to_node: &str, to: &str) -> Result<()> {
        let source = self.full_path(from_node, from)?;
        let destination = self.full_path(to_node, to)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        tokio::fs::rename(&source, &destination)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    async fn file_handle(&self, path: String, full: &Path) -> Result<FileHandle> {
        let content = tokio::fs::read(full)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        let name = full
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let mut attributes = Map::new();
        attributes.insert("name".into(), Value::String(name));
        attributes.insert("size".into(), json!(content.len()));
        attributes.insert(
            "extra".into(),
            json!({"hashes": {"sha256": hex::encode(Sha256::digest(&content))}}),
        );
        Ok(FileHandle::file(path, attributes))
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn list_files(
        &self,
        node_id: &str,
        path: Option<&str>,
        recursive: bool,
    ) -> Result<Vec<FileHandle>> {
        let (start, prefix) = match path {
            Some(path) => {
                let prefix = if path.ends_with('/') {
                    path.to_string()
                } else {
                    format!("{path}/")
                };
                (self.full_path(node_id, path)?, prefix)
            }
            None => (self.node_dir(node_id), String::new()),
        };
        if !tokio::fs::try_exists(&start)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            return Ok(Vec::new());
        }

        let mut handles = Vec::new();
        let mut pending = vec![(start, prefix)];
        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    debug!("Skipping non UTF-8 entry in {}", dir.display());
                    continue;
                };
                if is_hidden(name) {
                    continue;
                }
                let entry_path = entry.path();
                let metadata = tokio::fs::metadata(&entry_path)
                    .await
                    .map_err(|e| StorageError::Io(e.to_string()))?;

                if metadata.is_dir() {
                    let folder = format!("{prefix}{name}/");
                    handles.push(FileHandle::folder(folder.clone()));
                    if recursive {
                        pending.push((entry_path, folder));
                    }
                } else if metadata.is_file() {
                    handles.push(self.file_handle(format!("{prefix}{name}"), &entry_path).await?);
                }
            }
        }

        handles.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(handles)
    }

    async fn search_file(&self, node_id: &str, path: &str) -> Result<Option<FileHandle>> {
        let full = self.full_path(node_id, path)?;
        let metadata = match tokio::fs::metadata(&full).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        if path.ends_with('/') {
            Ok(metadata.is_dir().then(|| FileHandle::folder(path)))
        } else if metadata.is_file() {
            Ok(Some(self.file_handle(path.to_string(), &full).await?))
        } else {
            Ok(None)
        }
    }
}
