//! Draft registrations and the files linked into them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::model::Registry;
use crate::schema::{FILES_QUESTION_ID, Schema};

/// A draft registration of the current project.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftRegistration {
    pub id: String,
    pub schema_id: Option<String>,
    /// Answers keyed by question id, each `{value, extra, comments}`.
    pub registration_metadata: Map<String, Value>,
}

/// One file entry of a draft's `grdm-files` answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredFile {
    pub path: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
struct DraftResource {
    id: String,
    #[serde(default)]
    attributes: DraftAttributes,
    #[serde(default)]
    relationships: Value,
}

#[derive(Default, Deserialize)]
struct DraftAttributes {
    #[serde(default)]
    registration_metadata: Map<String, Value>,
}

impl DraftRegistration {
    /// Parse a JSON:API `draft_registrations` resource.
    pub fn from_resource(resource: Value) -> Result<Self, serde_json::Error> {
        let resource: DraftResource = serde_json::from_value(resource)?;
        let schema_id = resource
            .relationships
            .pointer("/registration_schema/data/id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            id: resource.id,
            schema_id,
            registration_metadata: resource.attributes.registration_metadata,
        })
    }

    /// Raw `value` of an answer.
    pub fn answer(&self, qid: &str) -> Option<&Value> {
        self.registration_metadata.get(qid)?.get("value")
    }

    /// Files listed in the `grdm-files` answer, which is stored as a JSON string.
    pub fn registered_files(&self) -> Vec<RegisteredFile> {
        let parsed = match self.answer(FILES_QUESTION_ID) {
            Some(Value::String(raw)) if !raw.trim().is_empty() => {
                serde_json::from_str::<Vec<RegisteredFile>>(raw).ok()
            }
            Some(Value::Array(entries)) => {
                serde_json::from_value::<Vec<RegisteredFile>>(Value::Array(entries.clone())).ok()
            }
            _ => None,
        };
        parsed.unwrap_or_default()
    }

    /// Whether `path` of `node_id` is linked into this draft.
    ///
    /// Files of other nodes than the draft's own are listed as `{node_id}/{path}`.
    pub fn includes_path(&self, home_node_id: &str, node_id: &str, path: &str) -> bool {
        let expected = if node_id == home_node_id {
            path.to_string()
        } else {
            format!("{node_id}/{path}")
        };
        self.registered_files().iter().any(|f| f.path == expected)
    }

    /// Title from the project name answers, English first.
    pub fn title(&self) -> Option<&str> {
        ["project-name-en", "project-name-ja"]
            .into_iter()
            .filter_map(|qid| self.answer(qid).and_then(Value::as_str))
            .find(|title| !title.is_empty())
    }

    /// Page of the draft editor showing the file list:
    /// `/registries/drafts/{id}/{n}-{page title}?view_only=`.
    pub fn file_page_url(&self, schema: &Schema) -> Option<String> {
        let (number, page) = schema.files_page()?;
        let page_name = format!("{number}-{}", page.title);
        Some(format!(
            "/registries/drafts/{}/{}?view_only=",
            self.id,
            urlencoding::encode(&page_name)
        ))
    }
}

/// Where a registration request is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationTarget {
    Draft(String),
    Registry(Registry),
}

impl RegistrationTarget {
    /// Registries take precedence over drafts with the same id.
    pub fn resolve(id: &str, registries: &[Registry]) -> Self {
        registries
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .map(Self::Registry)
            .unwrap_or_else(|| Self::Draft(id.to_string()))
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Draft(id) => id,
            Self::Registry(registry) => &registry.id,
        }
    }

    /// Endpoint for linking `path` of `node_id`. Drafts live under the home node's base URL.
    pub fn url(&self, home_base_url: &str, node_id: &str, path: &str) -> String {
        match self {
            Self::Registry(registry) => format!("{}/{}/{}", registry.url, node_id, path),
            Self::Draft(id) => {
                format!("{home_base_url}draft_registrations/{id}/files/{node_id}/{path}")
            }
        }
    }
}

/// One register (`checked`) or deregister request.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationChange {
    pub target: RegistrationTarget,
    pub checked: bool,
}

/// Requests needed to make the selection in `selected` true.
///
/// Drafts change only when their inclusion differs from the selection; registries are
/// registered whenever selected.
pub fn plan_changes(
    drafts: &[DraftRegistration],
    registries: &[Registry],
    selected: &HashSet<String>,
    home_node_id: &str,
    node_id: &str,
    path: &str,
) -> Vec<RegistrationChange> {
    let mut changes: Vec<RegistrationChange> = drafts
        .iter()
        .filter_map(|draft| {
            let checked = selected.contains(&draft.id);
            (checked != draft.includes_path(home_node_id, node_id, path)).then(|| {
                RegistrationChange {
                    target: RegistrationTarget::resolve(&draft.id, registries),
                    checked,
                }
            })
        })
        .collect();
    changes.extend(
        registries
            .iter()
            .filter(|registry| selected.contains(&registry.id))
            .map(|registry| RegistrationChange {
                target: RegistrationTarget::Registry(registry.clone()),
                checked: true,
            }),
    );
    changes
}
