//! In-memory metadata service for testing.
//!
//! Serves the project, file and hash resources for any number of nodes, plus scripted
//! registration jobs and arbitrary JSON routes. Faults can be injected per request and
//! moves can be made to show up only after a number of destination reloads.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::http::{HttpClient, HttpRequest, HttpResponse, Method, TransportError};
use crate::model::{FileMetadata, ProjectMetadata};

/// One scripted answer from a registration progress URL.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressStep {
    Running,
    NotFound,
    Finished(String),
    Fail(u16),
}

struct NodeState {
    attached: bool,
    project: ProjectMetadata,
}

struct Fault {
    method: Method,
    url_suffix: String,
    status: u16,
}

struct PendingMove {
    from_base: String,
    from_prefix: String,
    to_base: String,
    to_prefix: String,
    remaining_loads: usize,
}

#[derive(Default)]
struct ServerState {
    nodes: HashMap<String, NodeState>,
    routes: HashMap<String, Value>,
    registrations: HashMap<String, Value>,
    progress: HashMap<String, VecDeque<ProgressStep>>,
    faults: Vec<Fault>,
    pending_moves: Vec<PendingMove>,
    log: Vec<(Method, String)>,
}

#[derive(Default)]
pub struct InMemoryMetadataServer {
    state: Mutex<ServerState>,
}

impl InMemoryMetadataServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serve `project` under the node metadata base URL `base_url`.
    pub fn add_node(&self, base_url: &str, project: ProjectMetadata) {
        self.lock().nodes.insert(
            base_url.to_string(),
            NodeState {
                attached: true,
                project,
            },
        );
    }

    /// A node whose project resource answers 400.
    pub fn add_detached_node(&self, base_url: &str) {
        self.lock().nodes.insert(
            base_url.to_string(),
            NodeState {
                attached: false,
                project: ProjectMetadata::default(),
            },
        );
    }

    /// Current server-side project metadata for a node.
    pub fn project(&self, base_url: &str) -> Option<ProjectMetadata> {
        self.lock().nodes.get(base_url).map(|n| n.project.clone())
    }

    /// Answer GET `url` with `body`.
    pub fn set_route(&self, url: &str, body: Value) {
        self.lock().routes.insert(url.to_string(), body);
    }

    /// Answer PUT/DELETE on a registration `url` with `body`.
    pub fn set_registration(&self, url: &str, body: Value) {
        self.lock().registrations.insert(url.to_string(), body);
    }

    /// Script the answers of a progress URL. The last step repeats.
    pub fn script_progress(&self, url: &str, steps: Vec<ProgressStep>) {
        self.lock().progress.insert(url.to_string(), steps.into());
    }

    /// Fail the next `method` request whose URL ends with `url_suffix`.
    pub fn fail_next(&self, method: Method, url_suffix: &str, status: u16) {
        self.lock().faults.push(Fault {
            method,
            url_suffix: url_suffix.to_string(),
            status,
        });
    }

    /// Move metadata under `from_prefix` to `to_prefix` once the destination project has
    /// been loaded `loads_before_visible` more times.
    pub fn schedule_move(
        &self,
        from_base: &str,
        from_prefix: &str,
        to_base: &str,
        to_prefix: &str,
        loads_before_visible: usize,
    ) {
        self.lock().pending_moves.push(PendingMove {
            from_base: from_base.to_string(),
            from_prefix: from_prefix.to_string(),
            to_base: to_base.to_string(),
            to_prefix: to_prefix.to_string(),
            remaining_loads: loads_before_visible,
        });
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.lock().log.clone()
    }

    pub fn request_count(&self, method: Method, url_suffix: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(m, url)| *m == method && url.ends_with(url_suffix))
            .count()
    }
}

impl ServerState {
    fn handle(&mut self, request: &HttpRequest) -> HttpResponse {
        if let Some(index) = self
            .faults
            .iter()
            .position(|f| f.method == request.method && request.url.ends_with(&f.url_suffix))
        {
            let fault = self.faults.remove(index);
            return HttpResponse::new(fault.status, Value::Null);
        }

        if let Some(steps) = self.progress.get_mut(&request.url) {
            let step = if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            };
            return match step {
                Some(ProgressStep::Running) | None => {
                    HttpResponse::ok(json!({"data": {"attributes": {}}}))
                }
                Some(ProgressStep::NotFound) => HttpResponse::new(404, Value::Null),
                Some(ProgressStep::Finished(result)) => {
                    HttpResponse::ok(json!({"data": {"attributes": {"result": result}}}))
                }
                Some(ProgressStep::Fail(status)) => HttpResponse::new(status, Value::Null),
            };
        }

        if matches!(request.method, Method::Put | Method::Delete) {
            if let Some(body) = self.registrations.get(&request.url) {
                return HttpResponse::ok(body.clone());
            }
        }

        if request.method == Method::Get {
            if let Some(body) = self.routes.get(&request.url) {
                return HttpResponse::ok(body.clone());
            }
        }

        let Some(base) = self
            .nodes
            .keys()
            .filter(|base| request.url.starts_with(base.as_str()))
            .max_by_key(|base| base.len())
            .cloned()
        else {
            return HttpResponse::new(404, Value::Null);
        };
        let rest = request.url[base.len()..].to_string();
        self.handle_node(&base, &rest, request)
    }

    fn handle_node(&mut self, base: &str, rest: &str, request: &HttpRequest) -> HttpResponse {
        if rest == "project" && request.method == Method::Get {
            self.advance_moves(base);
            let Some(node) = self.nodes.get(base) else {
                return HttpResponse::new(404, Value::Null);
            };
            if !node.attached {
                return HttpResponse::new(400, Value::Null);
            }
            let attributes = serde_json::to_value(&node.project).unwrap_or(Value::Null);
            return HttpResponse::ok(json!({"data": {"type": "metadata-node-project", "attributes": attributes}}));
        }

        let Some(node) = self.nodes.get_mut(base) else {
            return HttpResponse::new(404, Value::Null);
        };
        if let Some(path) = rest.strip_prefix("files/") {
            return match request.method {
                Method::Patch => {
                    let parsed = request
                        .body
                        .clone()
                        .map(serde_json::from_value::<FileMetadata>);
                    let Some(Ok(mut file)) = parsed else {
                        return HttpResponse::new(400, Value::Null);
                    };
                    file.path = path.to_string();
                    match node.project.files.iter_mut().find(|f| f.path == path) {
                        Some(existing) => *existing = file.clone(),
                        None => node.project.files.push(file.clone()),
                    }
                    HttpResponse::ok(json!({"data": {"attributes": file}}))
                }
                Method::Delete => {
                    let before = node.project.files.len();
                    node.project.files.retain(|f| f.path != path);
                    if node.project.files.len() == before {
                        HttpResponse::new(404, Value::Null)
                    } else {
                        HttpResponse::new(204, Value::Null)
                    }
                }
                _ => HttpResponse::new(405, Value::Null),
            };
        }
        if let Some(path) = rest.strip_prefix("hashes/") {
            let hash = request
                .body
                .as_ref()
                .and_then(|b| b.get("hash"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return match (request.method, hash) {
                (Method::Patch, Some(hash)) => {
                    match node.project.files.iter_mut().find(|f| f.path == path) {
                        Some(file) => {
                            file.hash = Some(hash);
                            HttpResponse::ok(json!({}))
                        }
                        None => HttpResponse::new(404, Value::Null),
                    }
                }
                _ => HttpResponse::new(400, Value::Null),
            };
        }
        HttpResponse::new(404, Value::Null)
    }

    /// Count one destination load against every pending move into `base`.
    fn advance_moves(&mut self, base: &str) {
        let mut ready = Vec::new();
        let mut index = 0;
        while index < self.pending_moves.len() {
            let pending = &mut self.pending_moves[index];
            if pending.to_base != base {
                index += 1;
            } else if pending.remaining_loads == 0 {
                ready.push(self.pending_moves.remove(index));
            } else {
                pending.remaining_loads -= 1;
                index += 1;
            }
        }

        for pending in ready {
            let moved: Vec<FileMetadata> = match self.nodes.get_mut(&pending.from_base) {
                Some(source) => {
                    let (moved, kept): (Vec<_>, Vec<_>) = source
                        .project
                        .files
                        .drain(..)
                        .partition(|f| f.path.starts_with(&pending.from_prefix));
                    source.project.files = kept;
                    moved
                }
                None => Vec::new(),
            };
            if let Some(destination) = self.nodes.get_mut(&pending.to_base) {
                for file in moved {
                    let suffix = &file.path[pending.from_prefix.len()..];
                    let path = format!("{}{}", pending.to_prefix, suffix);
                    destination.project.files.push(file.repathed(path));
                }
            }
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl HttpClient for InMemoryMetadataServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.lock();
        state.log.push((request.method, request.url.clone()));
        Ok(state.handle(&request))
    }
}
