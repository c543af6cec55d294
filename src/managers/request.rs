use crate::errors::ToolError;
use crate::models::StoredRequest;
use crate::services::lifecycle::{ExecutionSnapshot, RequestController};
use crate::services::logger::Logger;
use crate::services::presenter::{self, ResponseView, RESPONSE_VIEWS};
use crate::utils::tool_errors::{read_positive_int, required_str, unknown_action_error};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_ACTIONS: &[&str] = &["send", "cancel", "disconnect", "status", "view", "list", "wait"];

#[derive(Clone)]
pub struct RequestManager {
    logger: Logger,
    controller: Arc<RequestController>,
}

impl RequestManager {
    pub fn new(logger: Logger, controller: Arc<RequestController>) -> Self {
        Self {
            logger: logger.child("request"),
            controller,
        }
    }

    fn parse_view(args: &Value) -> Result<Option<ResponseView>, ToolError> {
        match args.get("view").and_then(|v| v.as_str()) {
            None => Ok(None),
            Some(raw) => ResponseView::parse(raw).map(Some).ok_or_else(|| {
                ToolError::invalid_params(format!("Unknown view: {}", raw))
                    .with_hint(format!("Use one of: {}.", RESPONSE_VIEWS.join(", ")))
            }),
        }
    }

    fn snapshot_payload(snapshot: &ExecutionSnapshot, view: Option<ResponseView>, console: bool) -> Value {
        let mut out = snapshot.to_json();
        if let Some(response) = &snapshot.response {
            let view = view.unwrap_or_else(|| {
                presenter::default_view(presenter::classify(
                    response.content_type.as_deref(),
                    &response.body,
                ))
            });
            out["view"] = serde_json::json!({
                "name": view,
                "rendering": presenter::render(response, &snapshot.timeline, view),
            });
        }
        if console {
            out["console"] = Value::from(snapshot.console());
        }
        out
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args.get("action");
        let console = args
            .get("console")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        match action.and_then(|v| v.as_str()).unwrap_or("") {
            "send" => {
                let raw = args
                    .get("request")
                    .cloned()
                    .ok_or_else(|| ToolError::invalid_params("request must be an object"))?;
                let request: StoredRequest = serde_json::from_value(raw).map_err(|err| {
                    ToolError::invalid_params(format!("Invalid request: {}", err))
                })?;
                let view = Self::parse_view(&args)?;
                let snapshot = self.controller.send(request).await?;
                Ok(Self::snapshot_payload(&snapshot, view, console))
            }
            "cancel" => {
                let request_id = required_str(&args, "request_id")?;
                let snapshot = self.controller.cancel(request_id)?;
                Ok(Self::snapshot_payload(&snapshot, None, console))
            }
            "disconnect" => {
                let request_id = required_str(&args, "request_id")?;
                let snapshot = self.controller.disconnect(request_id)?;
                Ok(Self::snapshot_payload(&snapshot, None, console))
            }
            "status" => {
                let request_id = required_str(&args, "request_id")?;
                Ok(match self.controller.status(request_id) {
                    Some(snapshot) => Self::snapshot_payload(&snapshot, None, console),
                    None => serde_json::json!({"request_id": request_id, "state": "idle"}),
                })
            }
            "wait" => {
                let request_id = required_str(&args, "request_id")?;
                let timeout_ms = read_positive_int(args.get("timeout_ms")).unwrap_or(30_000);
                let snapshot = self
                    .controller
                    .wait_until_finished(request_id, Duration::from_millis(timeout_ms))
                    .await?;
                Ok(Self::snapshot_payload(&snapshot, None, console))
            }
            "view" => {
                let request_id = required_str(&args, "request_id")?;
                let view = Self::parse_view(&args)?.unwrap_or(ResponseView::Preview);
                let rendering = self.controller.view(request_id, view)?;
                Ok(serde_json::json!({
                    "request_id": request_id,
                    "view": view,
                    "rendering": rendering,
                }))
            }
            "list" => {
                let executions: Vec<Value> = self
                    .controller
                    .list()
                    .iter()
                    .map(ExecutionSnapshot::to_json)
                    .collect();
                Ok(serde_json::json!({"executions": executions}))
            }
            _ => Err(unknown_action_error("request", action, REQUEST_ACTIONS)),
        }
    }
}

#[async_trait::async_trait]
impl crate::services::tool_executor::ToolHandler for RequestManager {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.logger.debug("handle_action", args.get("action"));
        self.handle_action(args).await
    }
}
