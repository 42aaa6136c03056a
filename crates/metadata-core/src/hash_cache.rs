//! Per-node memoization of storage listings and content hashes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::hash::ContentHash;
use crate::model::{FileHandle, FileKind};
use crate::storage::{FileStorage, Result};

type ListingKey = (Option<String>, bool);

/// Wraps a node's file storage and memoizes what it returns.
///
/// Entries live until [`HashCache::clear_cache`], which runs when a move into the node completes.
pub struct HashCache {
    node_id: String,
    storage: Arc<dyn FileStorage>,
    listings: Mutex<HashMap<ListingKey, Vec<FileHandle>>>,
    hashes: Mutex<HashMap<String, ContentHash>>,
}

impl HashCache {
    pub fn new(node_id: impl Into<String>, storage: Arc<dyn FileStorage>) -> Self {
        Self {
            node_id: node_id.into(),
            storage,
            listings: Mutex::new(HashMap::new()),
            hashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn list_files(&self, path: Option<&str>, recursive: bool) -> Result<Vec<FileHandle>> {
        let key = (path.map(str::to_string), recursive);
        if let Some(cached) = self.lock_listings().get(&key) {
            return Ok(cached.clone());
        }

        let files = self.storage.list_files(&self.node_id, path, recursive).await?;
        debug!(
            "Listed {} entries under {:?} for node {}",
            files.len(),
            path,
            self.node_id
        );
        self.lock_listings().insert(key, files.clone());
        Ok(files)
    }

    /// Lookups always go to storage; freshness is the validation cache's job.
    pub async fn search_file(&self, path: &str) -> Result<Option<FileHandle>> {
        self.storage.search_file(&self.node_id, path).await
    }

    /// Content hash of `handle`. Folders hash the files beneath them.
    pub async fn compute_hash(&self, handle: &FileHandle) -> Result<ContentHash> {
        if let Some(cached) = self.lock_hashes().get(&handle.path) {
            return Ok(cached.clone());
        }

        let hash = match handle.kind {
            FileKind::File => self.file_hash(handle),
            FileKind::Folder => {
                let children = self.list_files(Some(&handle.path), true).await?;
                let child_hashes: Vec<ContentHash> = children
                    .iter()
                    .filter(|child| !child.is_folder())
                    .map(|child| self.file_hash(child))
                    .collect();
                ContentHash::from_children(&child_hashes)
            }
        };

        self.lock_hashes().insert(handle.path.clone(), hash.clone());
        Ok(hash)
    }

    fn file_hash(&self, handle: &FileHandle) -> ContentHash {
        if let Some(cached) = self.lock_hashes().get(&handle.path) {
            return cached.clone();
        }
        let hash = ContentHash::from_attributes(handle.kind, &handle.attributes);
        self.lock_hashes().insert(handle.path.clone(), hash.clone());
        hash
    }

    pub fn clear_cache(&self) {
        debug!("Clearing hash cache for node {}", self.node_id);
        self.lock_listings().clear();
        self.lock_hashes().clear();
    }

    fn lock_listings(&self) -> std::sync::MutexGuard<'_, HashMap<ListingKey, Vec<FileHandle>>> {
        self.listings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_hashes(&self) -> std::sync::MutexGuard<'_, HashMap<String, ContentHash>> {
        self.hashes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn cache_with(storage: &Arc<InMemoryStorage>) -> HashCache {
        HashCache::new("abc12", Arc::clone(storage) as Arc<dyn FileStorage>)
    }

    #[tokio::test]
    async fn test_listing_is_memoized_until_cleared() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.add_file("abc12", "osfstorage/a.txt", json!({"size": 1}));
        let cache = cache_with(&storage);

        assert_eq!(cache.list_files(None, true).await.unwrap().len(), 2);
        cache.list_files(None, true).await.unwrap();
        assert_eq!(storage.list_calls(), 1);

        // New entries stay invisible until the cache is cleared.
        storage.add_file("abc12", "osfstorage/b.txt", json!({"size": 2}));
        assert_eq!(cache.list_files(None, true).await.unwrap().len(), 2);

        cache.clear_cache();
        assert_eq!(cache.list_files(None, true).await.unwrap().len(), 3);
        assert_eq!(storage.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_folder_hash_survives_rename() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.add_file("abc12", "osfstorage/dir/a.txt", json!({"size": 1}));
        storage.add_file("abc12", "osfstorage/dir/sub/b.txt", json!({"size": 2}));
        let cache = cache_with(&storage);
        let before = cache
            .compute_hash(&FileHandle::folder("osfstorage/dir/"))
            .await
            .unwrap();

        storage.move_path("abc12", "osfstorage/dir/", "abc12", "osfstorage/renamed/");
        cache.clear_cache();
        let after = cache
            .compute_hash(&FileHandle::folder("osfstorage/renamed/"))
            .await
            .unwrap();

        assert_eq!(before, after);
    }
}
