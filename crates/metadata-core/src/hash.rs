//! Content hashes used as the durable identity of files.
//!
//! A hash is derived from the storage attributes and kind of an entry, never from its
//! path, so it survives renames and moves.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::model::FileKind;

/// Attribute keys that change when a file is renamed or moved.
const PATH_ATTRIBUTES: &[&str] = &[
    "name",
    "path",
    "materialized",
    "materializedPath",
    "materialized_path",
    "provider",
    "nodeId",
    "node_id",
    "links",
    "resource",
];

/// A content hash (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a file entry from its kind and attributes.
    pub fn from_attributes(kind: FileKind, attributes: &Map<String, Value>) -> Self {
        let stable: Map<String, Value> = attributes
            .iter()
            .filter(|(key, _)| !PATH_ATTRIBUTES.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        // serde_json::Map is ordered by key, so this serialization is canonical.
        let canonical = Value::Object(stable).to_string();

        let mut hasher = Sha256::new();
        hasher.update(kind_label(kind).as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash a folder from the hashes of the files it contains.
    pub fn from_children<'a>(children: impl IntoIterator<Item = &'a ContentHash>) -> Self {
        let mut hashes: Vec<&str> = children.into_iter().map(ContentHash::as_str).collect();
        hashes.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(kind_label(FileKind::Folder).as_bytes());
        for hash in hashes {
            hasher.update(b"\n");
            hasher.update(hash.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ContentHash {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

fn kind_label(kind: FileKind) -> &'static str {
    match kind {
        FileKind::File => "file",
        FileKind::Folder => "folder",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_hash_ignores_path_attributes() {
        let before = attrs(json!({
            "name": "a.txt",
            "materialized": "/dir/a.txt",
            "size": 12,
            "extra": {"hashes": {"sha256": "deadbeef"}}
        }));
        let after = attrs(json!({
            "name": "b.txt",
            "materialized": "/dir2/b.txt",
            "size": 12,
            "extra": {"hashes": {"sha256": "deadbeef"}}
        }));
        assert_eq!(
            ContentHash::from_attributes(FileKind::File, &before),
            ContentHash::from_attributes(FileKind::File, &after)
        );
    }

    #[test]
    fn test_hash_depends_on_kind_and_content() {
        let a = attrs(json!({"size": 12}));
        let b = attrs(json!({"size": 13}));
        assert_ne!(
            ContentHash::from_attributes(FileKind::File, &a),
            ContentHash::from_attributes(FileKind::File, &b)
        );
        assert_ne!(
            ContentHash::from_attributes(FileKind::File, &a),
            ContentHash::from_attributes(FileKind::Folder, &a)
        );
    }

    #[test]
    fn test_folder_hash_is_order_independent() {
        let x = ContentHash::from_attributes(FileKind::File, &attrs(json!({"size": 1})));
        let y = ContentHash::from_attributes(FileKind::File, &attrs(json!({"size": 2})));
        assert_eq!(
            ContentHash::from_children([&x, &y]),
            ContentHash::from_children([&y, &x])
        );
        assert_eq!(ContentHash::from_children([&x]).as_str().len(), 64);
    }
}
