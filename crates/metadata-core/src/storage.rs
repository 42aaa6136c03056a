//! FileStorage trait over the remote file-storage cache.
//!
//! Implementations:
//! - `InMemoryStorage` - For testing
//! - `LocalStorage` (in metadata-client) - Mirrors a node's providers from a local directory

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::model::{FileHandle, FileKind};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Listing and lookup of live files for a node.
///
/// Paths follow the `{provider}{materialized path}` convention; folders end with `/`.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait FileStorage: Send + Sync {
    /// List entries under `path` (the whole node when `None`).
    async fn list_files(
        &self,
        node_id: &str,
        path: Option<&str>,
        recursive: bool,
    ) -> Result<Vec<FileHandle>>;

    /// Look up a single file or folder by exact path.
    async fn search_file(&self, node_id: &str, path: &str) -> Result<Option<FileHandle>>;
}

/// True when `path` is a direct child of `parent` (both `/`-terminated for folders).
pub(crate) fn is_direct_child(parent: &str, path: &str) -> bool {
    match path.strip_prefix(parent) {
        Some(rest) if !rest.is_empty() => {
            let rest = rest.strip_suffix('/').unwrap_or(rest);
            !rest.contains('/')
        }
        _ => false,
    }
}

/// In-memory file storage for testing
#[derive(Default)]
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<(String, String), FileHandle>>,
    list_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating its ancestor folders.
    pub fn add_file(&self, node_id: &str, path: &str, attributes: Value) {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for folder in ancestor_folders(path) {
            entries
                .entry((node_id.to_string(), folder.clone()))
                .or_insert_with(|| FileHandle::folder(folder));
        }
        entries.insert(
            (node_id.to_string(), path.to_string()),
            FileHandle::file(path, attributes),
        );
    }

    pub fn add_folder(&self, node_id: &str, path: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for folder in ancestor_folders(path) {
            entries
                .entry((node_id.to_string(), folder.clone()))
                .or_insert_with(|| FileHandle::folder(folder));
        }
        entries.insert(
            (node_id.to_string(), path.to_string()),
            FileHandle::folder(path),
        );
    }

    /// Remove `path` and everything under it.
    pub fn remove(&self, node_id: &str, path: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(node, p), _| !(node == node_id && p.starts_with(path)));
    }

    /// Move `from` (and its subtree) to `to`, possibly across nodes.
    pub fn move_path(&self, from_node: &str, from: &str, to_node: &str, to: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let moved: Vec<_> = entries
            .iter()
            .filter(|((node, p), _)| node == from_node && p.starts_with(from))
            .map(|(key, handle)| (key.clone(), handle.clone()))
            .collect();
        for ((_, old_path), mut handle) in moved {
            entries.remove(&(from_node.to_string(), old_path.clone()));
            let new_path = format!("{}{}", to, &old_path[from.len()..]);
            handle.path = new_path.clone();
            entries.insert((to_node.to_string(), new_path), handle);
        }
        for folder in ancestor_folders(to) {
            entries
                .entry((to_node.to_string(), folder.clone()))
                .or_insert_with(|| FileHandle::folder(folder));
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

/// Folder paths above `path`, outermost first (`osfstorage/`, `osfstorage/dir/`, ...).
fn ancestor_folders(path: &str) -> Vec<String> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    trimmed
        .match_indices('/')
        .map(|(i, _)| trimmed[..=i].to_string())
        .collect()
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl FileStorage for InMemoryStorage {
    async fn list_files(
        &self,
        node_id: &str,
        path: Option<&str>,
        recursive: bool,
    ) -> Result<Vec<FileHandle>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let prefix = path.unwrap_or("");
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .filter(|((node, p), _)| node == node_id && p.as_str() != prefix)
            .filter(|((_, p), _)| {
                if recursive {
                    p.starts_with(prefix)
                } else {
                    is_direct_child(prefix, p)
                }
            })
            .map(|(_, handle)| handle.clone())
            .collect())
    }

    async fn search_file(&self, node_id: &str, path: &str) -> Result<Option<FileHandle>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&(node_id.to_string(), path.to_string()))
            .cloned())
    }
}

impl FileHandle {
    /// Parent folder path, `None` for provider roots.
    pub fn parent_path(&self) -> Option<&str> {
        let trimmed = self.path.strip_suffix('/').unwrap_or(&self.path);
        trimmed.rfind('/').map(|i| &self.path[..=i])
    }
}

impl FileKind {
    pub fn matches_folder_flag(&self, folder: bool) -> bool {
        (*self == FileKind::Folder) == folder
    }
}
