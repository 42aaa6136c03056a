//! Extension points a file-tree host calls into.
//!
//! The host owns rendering. It hands over rows as they resolve and asks which actions to
//! offer; the engine answers with plain data.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::model::{FileHandle, FileKind};
use crate::move_sync::{MoveEvent, MoveOutcome};

/// One row of the host's file tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRow {
    pub node_id: String,
    /// Node API URL (`.../{node_id}/`), used to start loading an unknown node.
    pub node_api_url: Option<String>,
    pub provider: String,
    /// Materialized path inside the provider; `None` for the provider root.
    pub materialized: Option<String>,
    pub kind: FileKind,
    /// The row is a storage provider's root folder.
    pub provider_root: bool,
    /// Storage attributes as reported for the row.
    pub attributes: Map<String, Value>,
}

impl TreeRow {
    /// Metadata path of the row.
    pub fn file_path(&self) -> String {
        format!(
            "{}{}",
            self.provider,
            self.materialized.as_deref().unwrap_or("/")
        )
    }

    pub fn handle(&self) -> FileHandle {
        FileHandle {
            kind: self.kind,
            path: self.file_path(),
            attributes: self.attributes.clone(),
        }
    }

    fn extra_metadata(&self) -> Option<&Value> {
        self.attributes.get("extra")?.get("metadata")
    }

    /// Read-only metadata supplied by the storage backend.
    ///
    /// `Some(Value::Null)` means the backend explicitly has none to offer.
    pub fn extra_content(&self) -> Option<&Value> {
        self.extra_metadata()?.get("content")
    }

    pub fn can_edit(&self) -> bool {
        self.extra_flag("can_edit")
    }

    pub fn can_register(&self) -> bool {
        self.extra_flag("can_register")
    }

    fn extra_flag(&self, name: &str) -> bool {
        match self.extra_metadata() {
            Some(entity) => entity.get(name).and_then(Value::as_bool).unwrap_or(false),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Indicator {
    None,
    /// The row itself has metadata.
    Defined,
    /// Only entries below the row have metadata.
    ChildrenOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingChild {
    pub path: String,
    /// The project is editable, so the record can be re-pathed or deleted.
    pub resolvable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowDecoration {
    /// Metadata for the row's node is not loaded yet; ask again later.
    pub pending: bool,
    pub indicator: Indicator,
    pub missing: Vec<MissingChild>,
}

impl RowDecoration {
    pub fn pending() -> Self {
        Self {
            pending: true,
            indicator: Indicator::None,
            missing: Vec::new(),
        }
    }

    pub fn plain() -> Self {
        Self {
            pending: false,
            indicator: Indicator::None,
            missing: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemAction {
    Loading,
    View,
    Edit,
    Register,
    Delete,
    EditMultiple,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait FileTreeHooks: Send + Sync {
    /// Decorate a row once the host has resolved it.
    async fn on_row_resolved(&self, row: &TreeRow) -> Result<RowDecoration>;

    fn on_item_buttons(&self, row: &TreeRow) -> Vec<ItemAction>;

    fn on_multiple_item_buttons(&self, rows: &[TreeRow]) -> Vec<ItemAction>;

    async fn on_move_complete(&self, event: &MoveEvent) -> Result<MoveOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(materialized: Option<&str>, attributes: Value) -> TreeRow {
        TreeRow {
            node_id: "abc12".into(),
            node_api_url: None,
            provider: "osfstorage".into(),
            materialized: materialized.map(str::to_string),
            kind: FileKind::File,
            provider_root: false,
            attributes: match attributes {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    #[test]
    fn test_file_path_joins_provider_and_materialized() {
        assert_eq!(row(Some("/dir/a.txt"), json!({})).file_path(), "osfstorage/dir/a.txt");
        assert_eq!(row(None, json!({})).file_path(), "osfstorage/");
    }

    #[test]
    fn test_extra_flags_default_to_true_without_entity() {
        let plain = row(Some("/a.txt"), json!({}));
        assert!(plain.can_edit());
        assert!(plain.can_register());
        assert!(plain.extra_content().is_none());

        let restricted = row(
            Some("/a.txt"),
            json!({"extra": {"metadata": {"content": {"title": "x"}, "can_edit": false, "can_register": true}}}),
        );
        assert!(!restricted.can_edit());
        assert!(restricted.can_register());
        assert_eq!(restricted.extra_content(), Some(&json!({"title": "x"})));
    }
}
