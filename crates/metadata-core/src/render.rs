//! Read-only views of saved metadata and of draft registrations.

use serde::Serialize;
use serde_json::Value;

use crate::drafts::{DraftRegistration, RegisteredFile};
use crate::model::MetadataItem;
use crate::schema::{FILES_QUESTION_ID, Question, Schema};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldView {
    pub qid: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOnlyView {
    pub schema_id: String,
    pub schema_name: String,
    pub fields: Vec<FieldView>,
    /// Files linked into a registration; empty for single items.
    pub files: Vec<RegisteredFile>,
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| display_value(Some(v)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

fn field(question: &Question, value: Option<&Value>) -> FieldView {
    FieldView {
        qid: question.qid.clone(),
        label: question.label().to_string(),
        value: display_value(value),
    }
}

/// The per-file questions of `schema` in page order, with the item's answers.
pub fn render_item(item: &MetadataItem, schema: &Schema) -> ReadOnlyView {
    ReadOnlyView {
        schema_id: schema.id.clone(),
        schema_name: schema.name.clone(),
        fields: schema
            .questions()
            .filter(|q| q.is_file_question())
            .map(|q| field(q, item.data.get(&q.qid).map(|answer| &answer.value)))
            .collect(),
        files: Vec::new(),
    }
}

/// The project-level answers of a draft, plus the files linked into it.
pub fn render_registration(draft: &DraftRegistration, schema: &Schema) -> ReadOnlyView {
    ReadOnlyView {
        schema_id: schema.id.clone(),
        schema_name: schema.name.clone(),
        fields: schema
            .questions()
            .filter(|q| !q.is_file_question() && q.qid != FILES_QUESTION_ID)
            .map(|q| field(q, draft.answer(&q.qid)))
            .collect(),
        files: draft.registered_files(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Answer, Answers};
    use crate::schema::SchemaPage;
    use serde_json::json;

    fn question(qid: &str, title: Value) -> Question {
        Question {
            qid: qid.into(),
            kind: None,
            format: None,
            title,
            extra: Default::default(),
        }
    }

    fn schema() -> Schema {
        Schema {
            id: "s1".into(),
            name: "Data management".into(),
            active: true,
            version: None,
            pages: vec![
                SchemaPage {
                    id: None,
                    title: "Project".into(),
                    questions: vec![
                        question("project-name-en", json!("Project name")),
                        question(FILES_QUESTION_ID, json!("Files")),
                    ],
                },
                SchemaPage {
                    id: None,
                    title: "File".into(),
                    questions: vec![
                        question("grdm-file:title-en", json!("Title")),
                        question("grdm-file:keywords", Value::Null),
                    ],
                },
            ],
        }
    }

    #[test]
    fn test_item_view_lists_file_questions_in_order() {
        let mut data = Answers::new();
        data.insert("grdm-file:keywords".into(), Answer::new(json!(["soil", "rain"])));
        let item = MetadataItem::active("s1", data);

        let view = render_item(&item, &schema());
        let fields: Vec<_> = view
            .fields
            .iter()
            .map(|f| (f.label.as_str(), f.value.as_str()))
            .collect();
        assert_eq!(
            fields,
            vec![("Title", ""), ("grdm-file:keywords", "soil, rain")]
        );
    }

    #[test]
    fn test_registration_view_has_project_fields_and_files() {
        let draft = DraftRegistration::from_resource(json!({
            "id": "d1",
            "attributes": {"registration_metadata": {
                "project-name-en": {"value": "Rainfall survey"},
                "grdm-files": {"value": "[{\"path\": \"osfstorage/a.txt\"}]"}
            }}
        }))
        .unwrap();

        let view = render_registration(&draft, &schema());
        assert_eq!(view.fields.len(), 1);
        assert_eq!(view.fields[0].value, "Rainfall survey");
        assert_eq!(view.files.len(), 1);
        assert_eq!(view.files[0].path, "osfstorage/a.txt");
    }
}
