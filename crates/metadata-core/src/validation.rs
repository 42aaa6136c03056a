//! Existence and hash verification of metadata paths, with a fixed TTL.
//!
//! Each node owns a `ValidationCache`. An entry records whether a metadata path still
//! resolves to a live file. While a lookup runs, a `loading` placeholder sits in the
//! cache so concurrent callers for the same path back off instead of issuing a second
//! lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::context::NodeContext;
use crate::error::Result;
use crate::events::{EventBus, MetadataEvent};
use crate::model::{FileHandle, FileMetadata};
use crate::store::MetadataStore;
use crate::timer::Timer;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationEntry {
    /// Milliseconds since the epoch after which the entry is stale.
    pub expires_at: u64,
    pub item: Option<FileHandle>,
    pub loading: bool,
    pub metadata: FileMetadata,
}

impl ValidationEntry {
    pub fn is_live(&self, now_millis: u64) -> bool {
        now_millis < self.expires_at
    }

    pub fn is_confirmed_missing(&self) -> bool {
        !self.loading && self.item.is_none()
    }
}

/// Outcome of [`Validator::validate_file`].
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// A live entry answered without a lookup.
    Cached(Option<FileHandle>),
    /// Another lookup for the path is running; nothing was done.
    InFlight,
    /// A fresh lookup completed.
    Resolved(Option<FileHandle>),
}

impl Validation {
    pub fn handle(&self) -> Option<&FileHandle> {
        match self {
            Self::Cached(item) | Self::Resolved(item) => item.as_ref(),
            Self::InFlight => None,
        }
    }

    /// True when the path is known not to resolve to a live file.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Cached(None) | Self::Resolved(None))
    }
}

/// Outcome of [`Validator::set_validated_file`].
#[derive(Debug, Clone, PartialEq)]
pub enum HashCheck {
    /// A live verified entry already existed.
    Skipped,
    Unchanged,
    Updated(String),
}

pub struct ValidationCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, ValidationEntry>>,
}

impl ValidationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn entry(&self, path: &str) -> Option<ValidationEntry> {
        self.lock().get(path).cloned()
    }

    /// Drop the entry for `path`, e.g. after its metadata record was removed.
    pub fn forget(&self, path: &str) {
        self.lock().remove(path);
    }

    fn expiry(&self, now_millis: u64) -> u64 {
        now_millis + self.ttl.as_millis() as u64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ValidationEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs validations against a node's storage and records them in its cache.
pub struct Validator {
    store: MetadataStore,
    timer: Arc<dyn Timer>,
    events: Arc<EventBus>,
    lookup_delay: Duration,
}

impl Validator {
    pub fn new(
        store: MetadataStore,
        timer: Arc<dyn Timer>,
        events: Arc<EventBus>,
        lookup_delay: Duration,
    ) -> Self {
        Self {
            store,
            timer,
            events,
            lookup_delay,
        }
    }

    /// Check whether `path` still resolves to a live file.
    pub async fn validate_file(
        &self,
        context: &NodeContext,
        path: &str,
        metadata: &FileMetadata,
    ) -> Result<Validation> {
        let cache = &context.validation;
        let now = self.timer.now_millis();
        {
            let mut entries = cache.lock();
            match entries.get(path) {
                Some(entry) if entry.is_live(now) && entry.loading => {
                    return Ok(Validation::InFlight);
                }
                Some(entry) if entry.is_live(now) => {
                    return Ok(Validation::Cached(entry.item.clone()));
                }
                _ => {}
            }
            entries.insert(
                path.to_string(),
                ValidationEntry {
                    expires_at: cache.expiry(now),
                    item: None,
                    loading: true,
                    metadata: metadata.clone(),
                },
            );
        }

        self.timer.sleep(self.lookup_delay).await;
        let item = match context.hash_cache.search_file(path).await {
            Ok(item) => item,
            Err(e) => {
                cache.forget(path);
                return Err(e.into());
            }
        };

        if item.is_none() {
            debug!("No live file for metadata path {} in {}", path, context.node_id);
        }
        let now = self.timer.now_millis();
        cache.lock().insert(
            path.to_string(),
            ValidationEntry {
                expires_at: cache.expiry(now),
                item: item.clone(),
                loading: false,
                metadata: metadata.clone(),
            },
        );
        Ok(Validation::Resolved(item))
    }

    /// Record `item` as the live file for `path` and refresh the stored hash if it drifted.
    pub async fn set_validated_file(
        &self,
        context: &NodeContext,
        path: &str,
        item: &FileHandle,
        metadata: &FileMetadata,
    ) -> Result<HashCheck> {
        let cache = &context.validation;
        let now = self.timer.now_millis();
        {
            let mut entries = cache.lock();
            if let Some(entry) = entries.get(path) {
                if entry.is_live(now) && entry.item.is_some() {
                    return Ok(HashCheck::Skipped);
                }
            }
            entries.insert(
                path.to_string(),
                ValidationEntry {
                    expires_at: cache.expiry(now),
                    item: Some(item.clone()),
                    loading: false,
                    metadata: metadata.clone(),
                },
            );
        }

        let hash = context.hash_cache.compute_hash(item).await?;
        if metadata.hash.as_deref() == Some(hash.as_str()) {
            return Ok(HashCheck::Unchanged);
        }
        if metadata.readonly || !context.is_editable() {
            debug!("Hash of {} drifted but the record is read-only", path);
            return Ok(HashCheck::Unchanged);
        }

        self.store
            .patch_hash(&context.base_url, path, hash.as_str())
            .await?;
        info!("Updated hash of {} in {}", path, context.node_id);
        if let Some(entry) = cache.lock().get_mut(path) {
            entry.metadata.hash = Some(hash.to_string());
        }
        self.events.emit(MetadataEvent::HashUpdated {
            node_id: context.node_id.clone(),
            path: path.to_string(),
            hash: hash.to_string(),
        });
        Ok(HashCheck::Updated(hash.into_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::storage::{FileStorage, StorageError};
    use crate::testing::{Fixture, hashed};
    use async_trait::async_trait;
    use serde_json::json;

    const PATH: &str = "osfstorage/a.txt";

    fn validator(fixture: &Fixture) -> Validator {
        Validator::new(
            fixture.store(),
            fixture.timer.clone(),
            Arc::clone(&fixture.events),
            fixture.config.lookup_delay,
        )
    }

    #[tokio::test]
    async fn test_placeholder_then_resolved_entry() {
        let fixture = Fixture::new();
        fixture.storage.add_file("abc12", PATH, json!({"size": 3}));
        fixture.add_node("abc12", vec![hashed(PATH, false, "h")]);
        let context = fixture.load("abc12").await;
        let metadata = hashed(PATH, false, "h");
        let validator = validator(&fixture);

        assert!(context.validation.entry(PATH).is_none());
        let (result, placeholder) = futures::join!(
            validator.validate_file(&context, PATH, &metadata),
            async { context.validation.entry(PATH) }
        );

        let placeholder = placeholder.unwrap();
        assert!(placeholder.loading);
        assert!(placeholder.item.is_none());

        let result = result.unwrap();
        assert_eq!(result.handle().map(|h| h.path.as_str()), Some(PATH));
        let entry = context.validation.entry(PATH).unwrap();
        assert!(!entry.loading);
        assert_eq!(entry.item.as_ref().map(|h| h.path.as_str()), Some(PATH));
        assert_eq!(entry.expires_at, fixture.timer.now_millis() + 300_000);
        assert_eq!(fixture.timer.sleeps(), vec![Duration::from_millis(1_000)]);
    }

    #[tokio::test]
    async fn test_validate_within_ttl_looks_up_once() {
        let fixture = Fixture::new();
        fixture.storage.add_file("abc12", PATH, json!({"size": 3}));
        fixture.add_node("abc12", vec![hashed(PATH, false, "h")]);
        let context = fixture.load("abc12").await;
        let metadata = hashed(PATH, false, "h");
        let validator = validator(&fixture);

        let (first, second) = futures::join!(
            validator.validate_file(&context, PATH, &metadata),
            validator.validate_file(&context, PATH, &metadata)
        );
        assert!(matches!(first.unwrap(), Validation::Resolved(Some(_))));
        assert_eq!(second.unwrap(), Validation::InFlight);

        let third = validator.validate_file(&context, PATH, &metadata).await.unwrap();
        assert!(matches!(third, Validation::Cached(Some(_))));
        assert_eq!(fixture.storage.search_calls(), 1);

        fixture.timer.advance(Duration::from_millis(300_000));
        validator.validate_file(&context, PATH, &metadata).await.unwrap();
        assert_eq!(fixture.storage.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_confirmed_missing() {
        let fixture = Fixture::new();
        fixture.add_node("abc12", vec![hashed(PATH, false, "h")]);
        let context = fixture.load("abc12").await;
        let validator = validator(&fixture);

        let result = validator
            .validate_file(&context, PATH, &hashed(PATH, false, "h"))
            .await
            .unwrap();
        assert!(result.is_missing());
        assert!(context.validation.entry(PATH).unwrap().is_confirmed_missing());
    }

    struct BrokenStorage;

    #[async_trait]
    impl FileStorage for BrokenStorage {
        async fn list_files(
            &self,
            _node_id: &str,
            _path: Option<&str>,
            _recursive: bool,
        ) -> crate::storage::Result<Vec<FileHandle>> {
            Err(StorageError::Unavailable("offline".into()))
        }

        async fn search_file(
            &self,
            _node_id: &str,
            _path: &str,
        ) -> crate::storage::Result<Option<FileHandle>> {
            Err(StorageError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_lookup_clears_placeholder() {
        let fixture = Fixture::new();
        let context = NodeContext {
            node_id: "abc12".into(),
            base_url: Fixture::base("abc12"),
            project: Default::default(),
            addon_attached: true,
            hash_cache: Arc::new(crate::hash_cache::HashCache::new(
                "abc12",
                Arc::new(BrokenStorage),
            )),
            validation: Arc::new(ValidationCache::new(fixture.config.validation_ttl)),
        };
        let validator = validator(&fixture);

        let result = validator
            .validate_file(&context, PATH, &hashed(PATH, false, "h"))
            .await;
        assert!(result.is_err());
        assert!(context.validation.entry(PATH).is_none());
    }

    #[tokio::test]
    async fn test_set_validated_file_patches_drifted_hash_once() {
        let fixture = Fixture::new();
        fixture.storage.add_file("abc12", PATH, json!({"size": 3}));
        fixture.add_node("abc12", vec![hashed(PATH, false, "stale")]);
        let context = fixture.load("abc12").await;
        let validator = validator(&fixture);
        let handle = fixture
            .storage
            .search_file("abc12", PATH)
            .await
            .unwrap()
            .unwrap();
        let metadata = context.find_file(PATH).unwrap().clone();

        let check = validator
            .set_validated_file(&context, PATH, &handle, &metadata)
            .await
            .unwrap();
        let hash = match check {
            HashCheck::Updated(hash) => hash,
            other => panic!("expected hash update, got {other:?}"),
        };
        assert_eq!(
            fixture.server.project(&Fixture::base("abc12")).unwrap().files[0]
                .hash
                .as_deref(),
            Some(hash.as_str())
        );
        assert_eq!(
            context.validation.entry(PATH).unwrap().metadata.hash,
            Some(hash)
        );

        let again = validator
            .set_validated_file(&context, PATH, &handle, &metadata)
            .await
            .unwrap();
        assert_eq!(again, HashCheck::Skipped);
        assert_eq!(fixture.server.request_count(Method::Patch, PATH), 1);
    }
}
