use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::patch::{PatchResource, PatchScope, PatchSubmitter};
use crate::stores::document_store::DocumentStore;
use crate::utils::tool_errors::{required_str, unknown_action_error};
use serde_json::Value;
use std::sync::Arc;

const PATCH_ACTIONS: &[&str] = &[
    "request",
    "request_meta",
    "request_group",
    "request_group_meta",
    "settings",
    "workspace_meta",
    "get",
];

#[derive(Clone)]
pub struct PatchManager {
    logger: Logger,
    submitter: Arc<PatchSubmitter>,
    documents: Option<DocumentStore>,
}

impl PatchManager {
    /// `documents` is `None` when patches are forwarded to a remote sink.
    pub fn new(
        logger: Logger,
        submitter: Arc<PatchSubmitter>,
        documents: Option<DocumentStore>,
    ) -> Self {
        Self {
            logger: logger.child("patch"),
            submitter,
            documents,
        }
    }

    fn scope(args: &Value) -> PatchScope {
        let read = |key: &str| {
            args.get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let workspace_id = read("workspace_id");
        PatchScope::new(
            read("organization_id"),
            read("project_id"),
            (!workspace_id.is_empty()).then_some(workspace_id),
        )
    }

    async fn submit(&self, resource: PatchResource, args: &Value) -> Result<Value, ToolError> {
        let resource_id = match resource {
            PatchResource::Settings => "",
            _ => required_str(args, "id")?,
        };
        let patch = args.get("patch").cloned().unwrap_or(Value::Null);
        let receipt = self
            .submitter
            .submit(&Self::scope(args), resource, resource_id, patch)?;
        let sequence = receipt.sequence;
        let route = receipt.route.clone();
        let wait = args.get("wait").and_then(|v| v.as_bool()).unwrap_or(false);
        if !wait {
            return Ok(serde_json::json!({
                "queued": true,
                "sequence": sequence,
                "route": route,
            }));
        }
        let applied = receipt.acknowledged().await?;
        Ok(serde_json::json!({
            "applied": true,
            "sequence": sequence,
            "route": route,
            "document": applied,
        }))
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args.get("action");
        let action_name = action.and_then(|v| v.as_str()).unwrap_or("");
        if action_name == "get" {
            let documents = self.documents.as_ref().ok_or_else(|| {
                ToolError::denied("Documents are stored remotely")
                    .with_hint("Unset REQFLOW_PATCH_REMOTE_URL to read local documents.")
            })?;
            let kind = required_str(&args, "resource")?;
            let resource = PatchResource::parse(kind)
                .ok_or_else(|| ToolError::invalid_params(format!("Unknown resource: {}", kind)))?;
            let id = match resource {
                PatchResource::Settings => crate::constants::patch::SETTINGS_ID,
                _ => required_str(&args, "id")?,
            };
            return Ok(serde_json::json!({
                "resource": resource,
                "id": id,
                "document": documents.get(resource.bucket(), id)?,
            }));
        }
        match PatchResource::parse(action_name) {
            Some(resource) => self.submit(resource, &args).await,
            None => Err(unknown_action_error("patch", action, PATCH_ACTIONS)),
        }
    }
}

#[async_trait::async_trait]
impl crate::services::tool_executor::ToolHandler for PatchManager {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.logger.debug("handle_action", args.get("action"));
        self.handle_action(args).await
    }
}
