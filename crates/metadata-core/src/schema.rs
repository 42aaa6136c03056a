//! Registration schemas and schema lookup.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MetadataError, Result};
use crate::model::FileMetadata;

/// Question ids with this prefix are asked per file; the rest are project-level.
pub const FILE_QUESTION_PREFIX: &str = "grdm-file:";
/// Question holding the list of files attached to a draft.
pub const FILES_QUESTION_ID: &str = "grdm-files";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub qid: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub title: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Question {
    /// Display label; falls back to the question id.
    pub fn label(&self) -> &str {
        match &self.title {
            Value::String(title) if !title.is_empty() => title,
            _ => &self.qid,
        }
    }

    pub fn is_file_question(&self) -> bool {
        self.qid.starts_with(FILE_QUESTION_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaPage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub pages: Vec<SchemaPage>,
}

#[derive(Deserialize)]
struct SchemaResource {
    id: String,
    attributes: SchemaAttributes,
}

#[derive(Deserialize)]
struct SchemaAttributes {
    name: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    schema: SchemaBody,
}

#[derive(Default, Deserialize)]
struct SchemaBody {
    #[serde(default)]
    pages: Vec<SchemaPage>,
}

impl Schema {
    /// Parse a JSON:API `registration-schemas` resource.
    pub fn from_resource(resource: Value) -> std::result::Result<Self, serde_json::Error> {
        let resource: SchemaResource = serde_json::from_value(resource)?;
        Ok(Self {
            id: resource.id,
            name: resource.attributes.name,
            active: resource.attributes.active,
            version: resource.attributes.schema_version,
            pages: resource.attributes.schema.pages,
        })
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.pages.iter().flat_map(|page| page.questions.iter())
    }

    /// 1-based page number and page holding the `grdm-files` question.
    pub fn files_page(&self) -> Option<(usize, &SchemaPage)> {
        self.pages
            .iter()
            .enumerate()
            .find(|(_, page)| page.questions.iter().any(|q| q.qid == FILES_QUESTION_ID))
            .map(|(index, page)| (index + 1, page))
    }
}

/// The schemas known to the host, in the order the service listed them.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: Vec<Schema>,
}

impl SchemaCatalog {
    pub fn new(schemas: Vec<Schema>) -> Self {
        Self { schemas }
    }

    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    pub fn find(&self, id: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.iter().filter(|s| s.active)
    }

    /// Map a schema id to the id of the active schema with the same name.
    ///
    /// Items saved against a retired schema version keep editing against its active successor.
    pub fn resolve_active_schema_id(&self, id: &str) -> Option<&str> {
        let schema = self.find(id)?;
        if schema.active {
            return Some(schema.id.as_str());
        }
        self.active()
            .find(|candidate| candidate.name == schema.name)
            .map(|candidate| candidate.id.as_str())
    }

    /// Schema to edit `file` with: its active item's schema when still resolvable,
    /// otherwise the first active schema.
    pub fn default_schema_for(&self, file: Option<&FileMetadata>) -> Result<&Schema> {
        let resolved = file
            .and_then(FileMetadata::active_item)
            .and_then(|item| self.resolve_active_schema_id(&item.schema))
            .and_then(|id| self.find(id));
        resolved
            .or_else(|| self.active().next())
            .ok_or(MetadataError::NoActiveSchema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Answers;
    use serde_json::json;

    fn schema(id: &str, name: &str, active: bool) -> Schema {
        Schema {
            id: id.into(),
            name: name.into(),
            active,
            version: None,
            pages: Vec::new(),
        }
    }

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            schema("v1", "公的資金による研究データのメタデータ登録", false),
            schema("other", "Open-Ended Registration", true),
            schema("v2", "公的資金による研究データのメタデータ登録", true),
        ])
    }

    #[test]
    fn test_resolve_active_schema_id() {
        let catalog = catalog();
        assert_eq!(catalog.resolve_active_schema_id("v2"), Some("v2"));
        assert_eq!(catalog.resolve_active_schema_id("v1"), Some("v2"));
        assert_eq!(catalog.resolve_active_schema_id("missing"), None);
    }

    #[test]
    fn test_default_schema_prefers_item_schema() {
        let catalog = catalog();
        let mut file = FileMetadata::new("osfstorage/a.txt", false);
        assert_eq!(catalog.default_schema_for(Some(&file)).unwrap().id, "other");

        file.save_item("v1", Answers::new());
        assert_eq!(catalog.default_schema_for(Some(&file)).unwrap().id, "v2");

        let empty = SchemaCatalog::default();
        assert!(matches!(
            empty.default_schema_for(None),
            Err(MetadataError::NoActiveSchema)
        ));
    }

    #[test]
    fn test_from_resource_and_files_page() {
        let schema = Schema::from_resource(json!({
            "id": "abc",
            "type": "registration-schemas",
            "attributes": {
                "name": "Metadata",
                "active": true,
                "schema_version": 2,
                "schema": {"pages": [
                    {"title": "Project", "questions": [{"qid": "project-name-en", "type": "string"}]},
                    {"title": "Files", "questions": [{"qid": "grdm-files", "type": "string"}]}
                ]}
            }
        }))
        .unwrap();
        assert_eq!(schema.version, Some(2));
        assert_eq!(schema.questions().count(), 2);
        let (number, page) = schema.files_page().unwrap();
        assert_eq!(number, 2);
        assert_eq!(page.title, "Files");
    }
}
