//! The engine's public surface.
//!
//! `MetadataController` wires the caches, the reconciliation engine, the move synchronizer
//! and the registration poller together, and turns every failure into a reported
//! `MetadataEvent::Failure` before handing it back.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::context::{ContextManager, NodeContext};
use crate::drafts::{DraftRegistration, plan_changes};
use crate::editing::{FieldUpdate, MetadataEditor, parse_pasted_answers};
use crate::error::{MetadataError, Result};
use crate::events::{EventBus, MetadataEvent, Subscription};
use crate::hooks::{FileTreeHooks, Indicator, ItemAction, MissingChild, RowDecoration, TreeRow};
use crate::http::HttpClient;
use crate::model::{Answers, FileHandle, FileKind, FileMetadata, MetadataItem, ProjectMetadata, Registry};
use crate::move_sync::{MoveEvent, MoveOutcome, MoveSynchronizer};
use crate::providers::{MetadataProviderRegistry, SchemaSource};
use crate::reconcile::{ReconciliationEngine, Resolution, ResolutionPlan, ResolveTarget};
use crate::registration::{RegistrationPoller, RegistrationResult};
use crate::render::{ReadOnlyView, render_item, render_registration};
use crate::schema::{Schema, SchemaCatalog};
use crate::storage::FileStorage;
use crate::store::MetadataStore;
use crate::timer::Timer;
use crate::validation::{Validation, Validator};

/// Everything the host provides.
pub struct Services {
    pub http: Arc<dyn HttpClient>,
    pub storage: Arc<dyn FileStorage>,
    pub timer: Arc<dyn Timer>,
    pub providers: Arc<dyn MetadataProviderRegistry>,
    pub schemas: Arc<dyn SchemaSource>,
}

/// Metadata base URL for a node API URL (`.../{node_id}/` becomes `.../{node_id}/metadata/`).
pub fn metadata_base_url(node_api_url: &str) -> String {
    if node_api_url.ends_with('/') {
        format!("{node_api_url}metadata/")
    } else {
        format!("{node_api_url}/metadata/")
    }
}

pub struct MetadataController {
    home_node_id: String,
    home_base_url: String,
    contexts: Arc<ContextManager>,
    validator: Validator,
    reconciler: ReconciliationEngine,
    mover: MoveSynchronizer,
    poller: RegistrationPoller,
    editor: MetadataEditor,
    schema_source: Arc<dyn SchemaSource>,
    catalog: RwLock<SchemaCatalog>,
    drafts: RwLock<Vec<DraftRegistration>>,
}

impl MetadataController {
    /// `home_base_url` is the metadata base URL of the node the host is showing.
    pub fn new(
        services: Services,
        config: &EngineConfig,
        home_node_id: impl Into<String>,
        home_base_url: impl Into<String>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let store = MetadataStore::new(services.http);
        let contexts = Arc::new(ContextManager::new(
            store.clone(),
            services.storage,
            services.providers,
            Arc::clone(&events),
            config,
        ));
        Self {
            home_node_id: home_node_id.into(),
            home_base_url: home_base_url.into(),
            validator: Validator::new(
                store.clone(),
                Arc::clone(&services.timer),
                events,
                config.lookup_delay,
            ),
            reconciler: ReconciliationEngine::new(Arc::clone(&contexts)),
            mover: MoveSynchronizer::new(
                Arc::clone(&contexts),
                Arc::clone(&services.timer),
                config.move_retry.clone(),
            ),
            poller: RegistrationPoller::new(store, services.timer, config.poll_interval),
            editor: MetadataEditor::new(Arc::clone(&contexts)),
            contexts,
            schema_source: services.schemas,
            catalog: RwLock::new(SchemaCatalog::default()),
            drafts: RwLock::new(Vec::new()),
        }
    }

    pub fn home_node_id(&self) -> &str {
        &self.home_node_id
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.contexts.events()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(MetadataEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events().subscribe(callback)
    }

    /// Call `handler(node_id, path, project)` for every completed move.
    ///
    /// The destination node is announced before the source node.
    pub fn add_move_complete_handler(
        &self,
        handler: impl Fn(&str, &str, &ProjectMetadata) + Send + Sync + 'static,
    ) -> Subscription {
        self.events().subscribe(move |event| {
            if let MetadataEvent::MoveCompleted {
                node_id,
                path,
                project,
            } = &event
            {
                handler(node_id, path, project);
            }
        })
    }

    fn reported<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.contexts.report(e);
        }
        result
    }

    /// Load the schema catalog and the home node's metadata.
    pub async fn init(&self) -> Result<()> {
        self.load_schemas().await?;
        self.load_metadata(&self.home_node_id, &self.home_base_url)
            .await?;
        Ok(())
    }

    pub async fn load_schemas(&self) -> Result<usize> {
        let schemas = self.reported(self.schema_source.load_schemas().await)?;
        let count = schemas.len();
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = SchemaCatalog::new(schemas);
        info!("Loaded {} registration schemas", count);
        Ok(count)
    }

    /// Load (or reload) one node. `Ok(None)` while another load of the node is running.
    pub async fn load_metadata(
        &self,
        node_id: &str,
        base_url: &str,
    ) -> Result<Option<Arc<NodeContext>>> {
        self.contexts.load(node_id, base_url).await
    }

    pub fn context(&self, node_id: &str) -> Option<Arc<NodeContext>> {
        self.contexts.get(node_id)
    }

    pub fn project_metadata(&self, node_id: &str) -> Option<ProjectMetadata> {
        Some(self.contexts.get(node_id)?.project.clone())
    }

    /// `None` when the node is not loaded; `Some(None)` when the path has no metadata.
    pub fn find_metadata(&self, node_id: &str, path: &str) -> Option<Option<FileMetadata>> {
        Some(self.contexts.get(node_id)?.find_file(path).cloned())
    }

    pub fn schema(&self, schema_id: &str) -> Option<Schema> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .find(schema_id)
            .cloned()
    }

    pub fn schemas(&self) -> Vec<Schema> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .schemas()
            .to_vec()
    }

    pub fn resolve_active_schema_id(&self, schema_id: &str) -> Option<String> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .resolve_active_schema_id(schema_id)
            .map(str::to_string)
    }

    /// Schema to edit `path` of `node_id` with.
    pub fn default_schema_for(&self, node_id: &str, path: &str) -> Result<Schema> {
        let record = self.contexts.get(node_id).and_then(|c| c.find_file(path).cloned());
        let schema = self
            .catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .default_schema_for(record.as_ref())
            .cloned();
        self.reported(schema)
    }

    /// Fetch the home node's draft registrations and keep them for `drafts()`.
    pub async fn load_drafts(&self) -> Result<Vec<DraftRegistration>> {
        let drafts = self.reported(self.schema_source.load_drafts(&self.home_node_id).await)?;
        debug!("Loaded {} draft registrations", drafts.len());
        *self.drafts.write().unwrap_or_else(|e| e.into_inner()) = drafts.clone();
        Ok(drafts)
    }

    pub fn drafts(&self) -> Vec<DraftRegistration> {
        self.drafts.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn registries(&self, node_id: &str) -> Vec<Registry> {
        match self.contexts.get(node_id) {
            Some(context) => self.contexts.providers().list_registries(&context.project),
            None => Vec::new(),
        }
    }

    /// Read-only view of one saved item, if its schema is known.
    pub fn render_item(&self, item: &MetadataItem) -> Option<ReadOnlyView> {
        Some(render_item(item, &self.schema(&item.schema)?))
    }

    pub fn render_registration(&self, draft: &DraftRegistration) -> Option<ReadOnlyView> {
        Some(render_registration(draft, &self.schema(draft.schema_id.as_deref()?)?))
    }

    /// Editor page of the draft that lists its files.
    pub fn draft_file_page_url(&self, draft: &DraftRegistration) -> Option<String> {
        draft.file_page_url(&self.schema(draft.schema_id.as_deref()?)?)
    }

    pub async fn validate_file(&self, node_id: &str, path: &str) -> Result<Validation> {
        let context = self.reported(self.contexts.require(node_id))?;
        let record = self.reported(
            context
                .find_file(path)
                .cloned()
                .ok_or_else(|| MetadataError::InvalidInput(format!("no metadata for {path}"))),
        )?;
        self.reported(self.validator.validate_file(&context, path, &record).await)
    }

    /// Validate every record of a node concurrently.
    pub async fn validate_node(&self, node_id: &str) -> Result<Vec<(FileMetadata, Validation)>> {
        let context = self.reported(self.contexts.require(node_id))?;
        let results = join_all(
            context
                .project
                .files
                .iter()
                .map(|record| self.validator.validate_file(&context, &record.path, record)),
        )
        .await;
        context
            .project
            .files
            .iter()
            .cloned()
            .zip(results)
            .map(|(record, result)| self.reported(result).map(|validation| (record, validation)))
            .collect()
    }

    pub async fn save_metadata(
        &self,
        node_id: &str,
        handle: &FileHandle,
        schema_id: &str,
        answers: Answers,
    ) -> Result<FileMetadata> {
        let context = self.reported(self.contexts.require(node_id))?;
        self.reported(self.editor.save(&context, handle, schema_id, answers).await)
    }

    pub async fn save_many(
        &self,
        node_id: &str,
        handles: &[FileHandle],
        schema_id: &str,
        updates: &[FieldUpdate],
    ) -> Result<Vec<FileMetadata>> {
        let context = self.reported(self.contexts.require(node_id))?;
        self.reported(
            self.editor
                .save_many(&context, handles, schema_id, updates)
                .await,
        )
    }

    pub async fn delete_metadata(&self, node_id: &str, path: &str) -> Result<()> {
        let context = self.reported(self.contexts.require(node_id))?;
        self.reported(self.editor.delete(&context, path).await)
    }

    /// Answers parsed from pasted JSON. Bad input is reported and yields `None`.
    pub fn paste_answers(&self, text: &str, schema_id: &str) -> Option<Answers> {
        let parsed = match self.schema(schema_id) {
            Some(schema) => parse_pasted_answers(text, &schema),
            None => Err(MetadataError::InvalidInput(format!(
                "unknown schema {schema_id}"
            ))),
        };
        self.reported(parsed).ok()
    }

    /// Candidates for re-associating the record at `path`.
    pub async fn plan_resolution(&self, node_id: &str, path: &str) -> Result<ResolutionPlan> {
        let context = self.reported(self.contexts.require(node_id))?;
        let orphan = self.reported(
            context
                .find_file(path)
                .cloned()
                .ok_or_else(|| MetadataError::InvalidInput(format!("no metadata for {path}"))),
        )?;
        self.reported(self.reconciler.find_candidates(&context, &orphan).await)
    }

    pub async fn resolve(
        &self,
        node_id: &str,
        path: &str,
        target: ResolveTarget,
    ) -> Result<Resolution> {
        let context = self.reported(self.contexts.require(node_id))?;
        let orphan = self.reported(
            context
                .find_file(path)
                .cloned()
                .ok_or_else(|| MetadataError::InvalidInput(format!("no metadata for {path}"))),
        )?;
        self.reported(self.reconciler.resolve(&context, &orphan, target).await)
    }

    /// Make the drafts and registries in `selected` exactly the ones `path` is linked to.
    pub async fn register(
        &self,
        node_id: &str,
        path: &str,
        selected: &HashSet<String>,
    ) -> Result<Vec<RegistrationResult>> {
        let context = self.reported(self.contexts.require(node_id))?;
        if context.find_file(path).is_none() {
            return self.reported(Err(MetadataError::InvalidInput(format!(
                "no metadata for {path}"
            ))));
        }
        let changes = plan_changes(
            &self.drafts(),
            &self.registries(&self.home_node_id),
            selected,
            &self.home_node_id,
            node_id,
            path,
        );
        let results = self.reported(
            self.poller
                .update_all(&self.home_base_url, &context, path, &changes)
                .await,
        )?;
        for result in &results {
            self.events().emit(MetadataEvent::RegistrationCompleted {
                node_id: node_id.to_string(),
                path: path.to_string(),
                target: result.target_id.clone(),
                result: result.result.clone(),
            });
        }
        if !changes.is_empty() && self.load_drafts().await.is_err() {
            debug!("Draft list not refreshed after registering {}", path);
        }
        Ok(results)
    }

    fn provider_denied(context: &NodeContext, row: &TreeRow) -> bool {
        if !(row.kind == FileKind::Folder && row.provider_root) {
            return false;
        }
        context
            .project
            .repositories
            .iter()
            .find(|repo| repo.provider() == Some(row.provider.as_str()))
            .and_then(|repo| repo.metadata.as_ref()?.permissions.as_ref())
            .is_some_and(|permissions| !permissions.provider)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl FileTreeHooks for MetadataController {
    /// Loads an unknown node first; the row is then pending and should be resolved again.
    async fn on_row_resolved(&self, row: &TreeRow) -> Result<RowDecoration> {
        let Some(context) = self.contexts.get(&row.node_id) else {
            if let Some(api_url) = &row.node_api_url {
                // Load failures are reported by the load itself.
                let _ = self
                    .load_metadata(&row.node_id, &metadata_base_url(api_url))
                    .await;
            } else {
                debug!(
                    "Metadata for {} not loaded and row has no node API URL",
                    row.node_id
                );
            }
            return Ok(RowDecoration::pending());
        };

        let path = row.file_path();
        let extra = row.extra_content().filter(|content| !content.is_null());
        let own = context.find_file(&path);
        let has_own = extra.is_some() || own.is_some();
        if !has_own && !path.ends_with('/') {
            return Ok(RowDecoration::plain());
        }
        let children: Vec<&FileMetadata> = context.project.files_under(&path).collect();
        if !has_own && children.is_empty() {
            return Ok(RowDecoration::plain());
        }

        if let Some(record) = own {
            self.reported(
                self.validator
                    .set_validated_file(&context, &path, &row.handle(), record)
                    .await,
            )?;
        }

        let validations = join_all(
            children
                .iter()
                .map(|child| self.validator.validate_file(&context, &child.path, child)),
        )
        .await;
        let mut missing = Vec::new();
        for (child, validation) in children.iter().zip(validations) {
            if self.reported(validation)?.is_missing() {
                missing.push(MissingChild {
                    path: child.path.clone(),
                    resolvable: context.project.editable,
                });
            }
        }

        Ok(RowDecoration {
            pending: false,
            indicator: if has_own {
                Indicator::Defined
            } else {
                Indicator::ChildrenOnly
            },
            missing,
        })
    }

    fn on_item_buttons(&self, row: &TreeRow) -> Vec<ItemAction> {
        let Some(context) = self.contexts.get(&row.node_id) else {
            debug!("Metadata not loaded for {}", row.node_id);
            return vec![ItemAction::Loading];
        };
        if !context.addon_attached {
            return Vec::new();
        }
        let extra = row.extra_content();
        if matches!(extra, Some(Value::Null)) || Self::provider_denied(&context, row) {
            return Vec::new();
        }

        let current = context.find_file(&row.file_path());
        if !context.project.editable || extra.is_some() {
            return if extra.is_some() || current.is_some() {
                vec![ItemAction::View]
            } else {
                Vec::new()
            };
        }

        let mut actions = Vec::new();
        if row.can_edit() {
            actions.push(ItemAction::Edit);
        }
        if current.is_some() {
            if row.can_register() {
                actions.push(ItemAction::Register);
            }
            if row.can_edit() {
                actions.push(ItemAction::Delete);
            }
        }
        actions
    }

    fn on_multiple_item_buttons(&self, rows: &[TreeRow]) -> Vec<ItemAction> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        let Some(context) = self.contexts.get(&first.node_id) else {
            return vec![ItemAction::Loading];
        };
        if !context.addon_attached || rows.iter().any(|row| row.node_id != first.node_id) {
            return Vec::new();
        }
        let any_readonly = rows
            .iter()
            .any(|row| row.extra_content().is_some_and(|content| !content.is_null()));
        if !context.project.editable || any_readonly {
            return Vec::new();
        }
        vec![ItemAction::EditMultiple]
    }

    async fn on_move_complete(&self, event: &MoveEvent) -> Result<MoveOutcome> {
        self.reported(self.mover.on_move_complete(event).await)
    }
}
