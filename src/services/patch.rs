use crate::constants::network::USER_AGENT;
use crate::constants::patch::{CONTENT_BUCKET, META_BUCKET, SETTINGS_BUCKET, SETTINGS_ID};
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::redact::redact_text;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Route parameters shared by every patch issued from one workspace view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchScope {
    pub organization_id: String,
    pub project_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

impl PatchScope {
    pub fn new(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        workspace_id: Option<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            workspace_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchResource {
    Request,
    RequestMeta,
    RequestGroup,
    RequestGroupMeta,
    Settings,
    WorkspaceMeta,
}

pub const PATCH_RESOURCES: &[PatchResource] = &[
    PatchResource::Request,
    PatchResource::RequestMeta,
    PatchResource::RequestGroup,
    PatchResource::RequestGroupMeta,
    PatchResource::Settings,
    PatchResource::WorkspaceMeta,
];

impl PatchResource {
    pub fn parse(raw: &str) -> Option<Self> {
        PATCH_RESOURCES
            .iter()
            .copied()
            .find(|resource| resource.as_str() == raw.trim())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatchResource::Request => "request",
            PatchResource::RequestMeta => "request_meta",
            PatchResource::RequestGroup => "request_group",
            PatchResource::RequestGroupMeta => "request_group_meta",
            PatchResource::Settings => "settings",
            PatchResource::WorkspaceMeta => "workspace_meta",
        }
    }

    /// Content records and UI-state records never share storage.
    pub fn bucket(self) -> &'static str {
        match self {
            PatchResource::Request | PatchResource::RequestGroup => CONTENT_BUCKET,
            PatchResource::RequestMeta
            | PatchResource::RequestGroupMeta
            | PatchResource::WorkspaceMeta => META_BUCKET,
            PatchResource::Settings => SETTINGS_BUCKET,
        }
    }

    pub fn route(self, scope: &PatchScope, resource_id: &str) -> Result<String, ToolError> {
        if self == PatchResource::Settings {
            return Ok("/settings/update".to_string());
        }
        let organization = segment("organization_id", &scope.organization_id)?;
        let project = segment("project_id", &scope.project_id)?;
        let id = segment("resource_id", resource_id)?;
        let (collection, action) = match self {
            PatchResource::WorkspaceMeta => {
                return Ok(format!(
                    "/organization/{}/project/{}/workspace/{}/update-meta",
                    organization, project, id
                ));
            }
            PatchResource::Request => ("request", "update"),
            PatchResource::RequestMeta => ("request", "update-meta"),
            PatchResource::RequestGroup => ("request-group", "update"),
            _ => ("request-group", "update-meta"),
        };
        let workspace = segment(
            "workspace_id",
            scope.workspace_id.as_deref().unwrap_or_default(),
        )?;
        Ok(format!(
            "/organization/{}/project/{}/workspace/{}/debug/{}/{}/{}",
            organization, project, workspace, collection, id, action
        ))
    }
}

fn segment<'a>(name: &str, value: &'a str) -> Result<&'a str, ToolError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ToolError::invalid_params(format!("{} is required", name)));
    }
    if trimmed.contains('/') || trimmed.contains('?') || trimmed.contains('#') {
        return Err(ToolError::invalid_params(format!(
            "{} must be a single path segment",
            name
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchCommand {
    pub sequence: u64,
    pub resource: PatchResource,
    pub resource_id: String,
    pub route: String,
    pub patch: Map<String, Value>,
}

#[async_trait]
pub trait PatchSink: Send + Sync {
    async fn apply(&self, command: &PatchCommand) -> Result<Value, ToolError>;
}

/// Handle for a queued patch. Dropping it is the fire-and-forget path.
#[derive(Debug)]
pub struct PatchReceipt {
    pub sequence: u64,
    pub route: String,
    ack: oneshot::Receiver<Result<Value, ToolError>>,
}

impl PatchReceipt {
    pub async fn acknowledged(self) -> Result<Value, ToolError> {
        self.ack
            .await
            .map_err(|_| ToolError::internal("Patch lane closed before applying the patch"))?
    }
}

struct QueuedPatch {
    command: PatchCommand,
    ack: oneshot::Sender<Result<Value, ToolError>>,
}

/// A route's queue plus the number of patches queued but not yet applied.
struct Lane {
    tx: mpsc::UnboundedSender<QueuedPatch>,
    pending: Arc<AtomicUsize>,
}

type Lanes = Arc<DashMap<String, Lane>>;

/// Queues partial updates so that patches to the same route apply in
/// submission order while different routes proceed independently.
pub struct PatchSubmitter {
    logger: Logger,
    sink: Arc<dyn PatchSink>,
    lanes: Lanes,
    sequence: AtomicU64,
}

impl PatchSubmitter {
    pub fn new(logger: Logger, sink: Arc<dyn PatchSink>) -> Self {
        Self {
            logger: logger.child("patch"),
            sink,
            lanes: Arc::new(DashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Lanes with patches still queued. Idle lanes are dropped.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Must be called from within a tokio runtime; the first patch for a
    /// route spawns its lane.
    pub fn submit(
        &self,
        scope: &PatchScope,
        resource: PatchResource,
        resource_id: &str,
        patch: Value,
    ) -> Result<PatchReceipt, ToolError> {
        let Value::Object(patch) = patch else {
            return Err(ToolError::invalid_params("patch must be a JSON object"));
        };
        let resource_id = match resource {
            PatchResource::Settings => SETTINGS_ID,
            _ => resource_id.trim(),
        };
        let route = resource.route(scope, resource_id)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        let lane = self
            .lanes
            .entry(route.clone())
            .or_insert_with(|| self.spawn_lane(&route));
        // The shard lock is held until `lane` drops, so sequence order and
        // queue order agree.
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let queued = QueuedPatch {
            command: PatchCommand {
                sequence,
                resource,
                resource_id: resource_id.to_string(),
                route: route.clone(),
                patch,
            },
            ack: ack_tx,
        };
        lane.pending.fetch_add(1, Ordering::SeqCst);
        if lane.tx.send(queued).is_err() {
            lane.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ToolError::internal("Patch lane closed"));
        }
        drop(lane);

        self.logger.debug(
            "patch queued",
            Some(&serde_json::json!({"route": route, "sequence": sequence})),
        );
        Ok(PatchReceipt {
            sequence,
            route,
            ack: ack_rx,
        })
    }

    fn spawn_lane(&self, route: &str) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedPatch>();
        let pending = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&self.sink);
        let lanes = Arc::clone(&self.lanes);
        let counter = Arc::clone(&pending);
        let logger = self.logger.child("lane");
        let route = route.to_string();
        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                let result = sink.apply(&queued.command).await;
                if let Err(err) = &result {
                    logger.warn(
                        "patch failed",
                        Some(&serde_json::json!({
                            "route": route,
                            "sequence": queued.command.sequence,
                            "error": err.message,
                        })),
                    );
                }
                // Retire the lane before acknowledging, so a caller that saw
                // the ack never observes an idle lane. `remove_if` runs under
                // the shard lock that `submit` holds while enqueueing.
                let idle = counter.fetch_sub(1, Ordering::SeqCst) == 1
                    && lanes
                        .remove_if(&route, |_, lane| lane.pending.load(Ordering::SeqCst) == 0)
                        .is_some();
                let _ = queued.ack.send(result);
                if idle {
                    logger.debug("lane retired", Some(&serde_json::json!({"route": route})));
                    break;
                }
            }
        });
        Lane { tx, pending }
    }

    pub fn for_scope(&self, scope: PatchScope) -> ScopedPatcher<'_> {
        ScopedPatcher {
            submitter: self,
            scope,
        }
    }
}

/// One patcher per resource kind, bound to the current workspace view.
pub struct ScopedPatcher<'a> {
    submitter: &'a PatchSubmitter,
    scope: PatchScope,
}

impl ScopedPatcher<'_> {
    pub fn request(&self, request_id: &str, patch: Value) -> Result<PatchReceipt, ToolError> {
        self.submitter
            .submit(&self.scope, PatchResource::Request, request_id, patch)
    }

    pub fn request_meta(&self, request_id: &str, patch: Value) -> Result<PatchReceipt, ToolError> {
        self.submitter
            .submit(&self.scope, PatchResource::RequestMeta, request_id, patch)
    }

    pub fn request_group(&self, group_id: &str, patch: Value) -> Result<PatchReceipt, ToolError> {
        self.submitter
            .submit(&self.scope, PatchResource::RequestGroup, group_id, patch)
    }

    pub fn request_group_meta(
        &self,
        group_id: &str,
        patch: Value,
    ) -> Result<PatchReceipt, ToolError> {
        self.submitter
            .submit(&self.scope, PatchResource::RequestGroupMeta, group_id, patch)
    }

    pub fn settings(&self, patch: Value) -> Result<PatchReceipt, ToolError> {
        self.submitter
            .submit(&self.scope, PatchResource::Settings, SETTINGS_ID, patch)
    }

    pub fn workspace_meta(
        &self,
        workspace_id: &str,
        patch: Value,
    ) -> Result<PatchReceipt, ToolError> {
        self.submitter
            .submit(&self.scope, PatchResource::WorkspaceMeta, workspace_id, patch)
    }
}

/// Forwards patches to a remote service as `POST {base_url}{route}`.
pub struct HttpPatchSink {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPatchSink {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ToolError::internal(format!("Failed to build HTTP client: {}", err)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl PatchSink for HttpPatchSink {
    async fn apply(&self, command: &PatchCommand) -> Result<Value, ToolError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, command.route))
            .json(&command.patch)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ToolError::timeout("Patch request timed out")
                } else {
                    ToolError::request_failed(err.to_string())
                }
            })?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ToolError::request_failed(format!(
                "Patch rejected ({})",
                status.as_u16()
            ))
            .with_details(serde_json::json!({
                "route": command.route,
                "status": status.as_u16(),
                "body": redact_text(&text, 4 * 1024),
            })));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
