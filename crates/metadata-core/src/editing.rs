//! Writing metadata: single and batch saves, deletion, and pasted answers.

use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::context::{ContextManager, NodeContext};
use crate::error::{MetadataError, Result};
use crate::model::{Answer, Answers, FileHandle, FileMetadata};
use crate::schema::Schema;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    /// Empty strings and nulls leave the field as it was.
    Set(Value),
    Clear,
}

/// One field edited in the multi-file editor.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub qid: String,
    pub change: FieldChange,
}

impl FieldUpdate {
    pub fn set(qid: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            qid: qid.into(),
            change: FieldChange::Set(value.into()),
        }
    }

    pub fn clear(qid: impl Into<String>) -> Self {
        Self {
            qid: qid.into(),
            change: FieldChange::Clear,
        }
    }

    fn apply(&self, data: &mut Answers) {
        match &self.change {
            FieldChange::Set(Value::Null) => {}
            FieldChange::Set(Value::String(s)) if s.is_empty() => {}
            FieldChange::Set(value) => {
                data.entry(self.qid.clone())
                    .and_modify(|answer| answer.value = value.clone())
                    .or_insert_with(|| Answer::new(value.clone()));
            }
            FieldChange::Clear => {
                data.remove(&self.qid);
            }
        }
    }
}

pub struct MetadataEditor {
    contexts: Arc<ContextManager>,
}

impl MetadataEditor {
    pub fn new(contexts: Arc<ContextManager>) -> Self {
        Self { contexts }
    }

    /// Record the existing metadata for `handle`, or a fresh record, ready to be edited.
    fn writable_record(context: &NodeContext, handle: &FileHandle) -> Result<FileMetadata> {
        let record = context
            .find_file(&handle.path)
            .cloned()
            .unwrap_or_else(|| FileMetadata::new(handle.path.clone(), handle.is_folder()));
        if record.readonly {
            return Err(MetadataError::ReadOnly(record.path));
        }
        Ok(record)
    }

    /// Save `answers` as the active item for `schema_id` and reload the node.
    pub async fn save(
        &self,
        context: &NodeContext,
        handle: &FileHandle,
        schema_id: &str,
        answers: Answers,
    ) -> Result<FileMetadata> {
        context.require_editable()?;
        let mut record = Self::writable_record(context, handle)?;
        record.save_item(schema_id, answers);
        record.hash = Some(context.hash_cache.compute_hash(handle).await?.into_string());

        self.contexts
            .store()
            .patch_file(&context.base_url, &record)
            .await?;
        info!("Saved metadata for {} in {}", record.path, context.node_id);
        self.contexts.refresh(&context.node_id).await;
        Ok(record)
    }

    /// Apply the same field updates to several files.
    ///
    /// Each file keeps its latest answers for `schema_id`; only the updated fields change.
    /// Records are written one after another in the order given.
    pub async fn save_many(
        &self,
        context: &NodeContext,
        handles: &[FileHandle],
        schema_id: &str,
        updates: &[FieldUpdate],
    ) -> Result<Vec<FileMetadata>> {
        context.require_editable()?;
        let mut records = handles
            .iter()
            .map(|handle| {
                let mut record = Self::writable_record(context, handle)?;
                let mut data = record
                    .latest_item_for(schema_id)
                    .map(|item| item.data.clone())
                    .unwrap_or_default();
                for update in updates {
                    update.apply(&mut data);
                }
                record.save_item(schema_id, data);
                Ok(record)
            })
            .collect::<Result<Vec<_>>>()?;

        let hashes = try_join_all(
            handles
                .iter()
                .map(|handle| context.hash_cache.compute_hash(handle)),
        )
        .await?;
        for (record, hash) in records.iter_mut().zip(hashes) {
            record.hash = Some(hash.into_string());
        }

        let store = self.contexts.store();
        for record in &records {
            store.patch_file(&context.base_url, record).await?;
        }
        info!(
            "Saved metadata for {} files in {}",
            records.len(),
            context.node_id
        );
        self.contexts.refresh(&context.node_id).await;
        Ok(records)
    }

    pub async fn delete(&self, context: &NodeContext, path: &str) -> Result<()> {
        context.require_editable()?;
        if context.find_file(path).is_some_and(|f| f.readonly) {
            return Err(MetadataError::ReadOnly(path.to_string()));
        }
        self.contexts
            .store()
            .delete_file(&context.base_url, path)
            .await?;
        context.validation.forget(path);
        info!("Deleted metadata for {} in {}", path, context.node_id);
        self.contexts.refresh(&context.node_id).await;
        Ok(())
    }
}

/// Answers for the per-file questions of `schema` from a pasted JSON object.
///
/// Questions missing from the object, or given as null, get an empty string.
pub fn parse_pasted_answers(text: &str, schema: &Schema) -> Result<Answers> {
    let parsed: Value = serde_json::from_str(text)
        .map_err(|e| MetadataError::InvalidInput(format!("pasted text is not JSON: {e}")))?;
    let Value::Object(fields) = parsed else {
        return Err(MetadataError::InvalidInput(
            "pasted JSON is not an object".into(),
        ));
    };
    Ok(schema
        .questions()
        .filter(|q| q.is_file_question())
        .map(|q| {
            let value = match fields.get(&q.qid) {
                None | Some(Value::Null) => Value::String(String::new()),
                Some(value) => value.clone(),
            };
            (q.qid.clone(), Answer::new(value))
        })
        .collect())
}
