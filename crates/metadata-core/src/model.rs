//! Metadata records exchanged with the metadata service.
//!
//! Field names follow the service's JSON. Fields the engine does not interpret are kept in
//! `extra` so a PATCH writes back everything the service sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type NodeId = String;
pub type SchemaId = String;

/// Answers keyed by question id.
pub type Answers = BTreeMap<String, Answer>;

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_true() -> bool {
    true
}

/// Metadata for one project (node), as returned by `GET {base}project`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub files: Vec<FileMetadata>,
    #[serde(default)]
    pub repositories: Vec<RepositoryDescriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectMetadata {
    /// Project state used when the add-on is not attached to the node.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn find_file(&self, path: &str) -> Option<&FileMetadata> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Records at or below `path`, in storage order.
    ///
    /// A folder path (ending with `/`) matches its whole subtree; a file path matches only itself.
    pub fn files_under<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a FileMetadata> {
        let folder = path.ends_with('/');
        self.files.iter().filter(move |f| {
            if folder {
                f.path.starts_with(path)
            } else {
                f.path == path
            }
        })
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.find_file(path).is_some()
    }
}

/// Metadata attached to one file or folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// `{provider}{materialized path}`; folder paths end with `/`.
    pub path: String,
    #[serde(default)]
    pub folder: bool,
    #[serde(default)]
    pub hash: Option<String>,
    /// Most recent first.
    #[serde(default)]
    pub items: Vec<MetadataItem>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileMetadata {
    pub fn new(path: impl Into<String>, folder: bool) -> Self {
        Self {
            path: path.into(),
            folder,
            hash: None,
            items: Vec::new(),
            readonly: false,
            extra: Map::new(),
        }
    }

    /// Copy of this record at a different path.
    pub fn repathed(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    pub fn active_item(&self) -> Option<&MetadataItem> {
        self.items.iter().find(|item| item.active)
    }

    /// Latest item recorded for `schema`, active or not.
    pub fn latest_item_for(&self, schema: &str) -> Option<&MetadataItem> {
        self.items.iter().find(|item| item.schema == schema)
    }

    /// Records `answers` as the new active item for `schema`.
    ///
    /// Earlier items are kept and deactivated; the new item goes first.
    pub fn save_item(&mut self, schema: impl Into<SchemaId>, answers: Answers) {
        for item in &mut self.items {
            item.active = false;
        }
        self.items.insert(0, MetadataItem::active(schema, answers));
    }
}

/// One schema-bound set of answers for a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub schema: SchemaId,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub data: Answers,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetadataItem {
    pub fn active(schema: impl Into<SchemaId>, data: Answers) -> Self {
        Self {
            schema: schema.into(),
            active: true,
            data,
            extra: Map::new(),
        }
    }
}

/// Answer to a single question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub extra: Vec<Value>,
    #[serde(default)]
    pub comments: Vec<Value>,
}

impl Answer {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            extra: Vec::new(),
            comments: Vec::new(),
        }
    }
}

/// External metadata-providing repository linked to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    #[serde(default)]
    pub metadata: Option<RepositoryMetadata>,
    #[serde(default)]
    pub registries: Vec<Registry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RepositoryDescriptor {
    /// Files contributed by a repository without an update URL are read-only.
    pub fn is_readonly(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.urls.update.as_deref())
            .is_none_or(str::is_empty)
    }

    pub fn provider(&self) -> Option<&str> {
        self.metadata.as_ref()?.provider.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    #[serde(default)]
    pub provider: Option<String>,
    pub urls: RepositoryUrls,
    #[serde(default)]
    pub permissions: Option<RepositoryPermissions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryUrls {
    pub get: String,
    #[serde(default)]
    pub update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryPermissions {
    #[serde(default = "default_true")]
    pub provider: bool,
}

/// Registration endpoint offered by a metadata-supporting repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

/// A live file or folder as reported by file storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHandle {
    pub kind: FileKind,
    /// `{provider}{materialized path}`, same convention as `FileMetadata::path`.
    pub path: String,
    /// Storage attributes (size, hashes, etag, ...). Path-bearing keys are ignored by hashing.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl FileHandle {
    pub fn file(path: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            kind: FileKind::File,
            path: path.into(),
            attributes,
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            kind: FileKind::Folder,
            path: path.into(),
            attributes: Map::new(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == FileKind::Folder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn answers(value: &str) -> Answers {
        let mut data = Answers::new();
        data.insert("grdm-file:title-en".into(), Answer::new(value));
        data
    }

    #[test]
    fn test_save_item_keeps_history_and_single_active() {
        let mut file = FileMetadata::new("osfstorage/a.txt", false);
        file.save_item("schema-1", answers("first"));
        file.save_item("schema-1", answers("second"));
        file.save_item("schema-2", answers("third"));
        file.save_item("schema-1", answers("fourth"));

        assert_eq!(file.items.len(), 4);
        let active: Vec<_> = file.items.iter().filter(|i| i.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].schema, "schema-1");
        assert_eq!(
            active[0].data["grdm-file:title-en"].value,
            json!("fourth")
        );
        assert_eq!(
            file.items
                .iter()
                .filter(|i| i.schema == "schema-1" && i.active)
                .count(),
            1
        );
        assert_eq!(file.items[3].data["grdm-file:title-en"].value, json!("first"));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "path": "osfstorage/a.txt",
            "folder": false,
            "hash": "abc",
            "urlpath": "/abc12/files/osfstorage/a.txt",
            "items": [{"schema": "s1", "active": true, "data": {}, "readonly": false}]
        });
        let file: FileMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(file.extra["urlpath"], json!("/abc12/files/osfstorage/a.txt"));

        let back = serde_json::to_value(&file).unwrap();
        assert_eq!(back["urlpath"], json!("/abc12/files/osfstorage/a.txt"));
        assert_eq!(back["items"][0]["readonly"], json!(false));
        assert!(back.get("readonly").is_none());
    }

    #[test]
    fn test_repository_readonly_follows_update_url() {
        let writable: RepositoryDescriptor = serde_json::from_value(json!({
            "metadata": {"urls": {"get": "https://repo/get", "update": "https://repo/update"}}
        }))
        .unwrap();
        let readonly: RepositoryDescriptor = serde_json::from_value(json!({
            "metadata": {"urls": {"get": "https://repo/get"}}
        }))
        .unwrap();
        assert!(!writable.is_readonly());
        assert!(readonly.is_readonly());
    }

    #[test]
    fn test_files_under_prefix() {
        let project = ProjectMetadata {
            files: vec![
                FileMetadata::new("osfstorage/dir/", true),
                FileMetadata::new("osfstorage/dir/a.txt", false),
                FileMetadata::new("osfstorage/dir2/b.txt", false),
            ],
            ..Default::default()
        };
        let paths: Vec<_> = project
            .files_under("osfstorage/dir/")
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["osfstorage/dir/", "osfstorage/dir/a.txt"]);
    }

    #[test]
    fn test_files_under_file_path_skips_name_prefixed_siblings() {
        let project = ProjectMetadata {
            files: vec![
                FileMetadata::new("osfstorage/a.txt", false),
                FileMetadata::new("osfstorage/a.txt.bak", false),
            ],
            ..Default::default()
        };
        let paths: Vec<_> = project
            .files_under("osfstorage/a.txt")
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["osfstorage/a.txt"]);
    }
}
