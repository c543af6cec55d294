use crate::errors::{ToolError, ToolErrorKind};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// JSON-RPC 2.0 error codes used on the stdio surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    ServerError = -32000,
    RequestTimeout = -32001,
    Unauthorized = -32002,
    RequestCancelled = -32800,
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn from_tool_error(tool: &str, error: &ToolError) -> Self {
        let kind = serde_json::to_value(error.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let mut lines = vec![
            format!("tool: {}", tool),
            format!("kind: {}", kind),
            format!("code: {}", error.code),
            format!("retryable: {}", error.retryable),
            format!("message: {}", error.message),
        ];
        if let Some(hint) = &error.hint {
            lines.push(format!("hint: {}", hint));
        }
        let message = lines.join("\n");

        let code = match error.kind {
            ToolErrorKind::InvalidParams => ErrorCode::InvalidParams,
            ToolErrorKind::Timeout => ErrorCode::RequestTimeout,
            ToolErrorKind::AuthExpired | ToolErrorKind::Denied => ErrorCode::Unauthorized,
            ToolErrorKind::RequestCancelled => ErrorCode::RequestCancelled,
            ToolErrorKind::Conflict | ToolErrorKind::NotFound => ErrorCode::InvalidRequest,
            ToolErrorKind::AuthExchangeFailed
            | ToolErrorKind::ProfileFetchFailed
            | ToolErrorKind::RequestFailed
            | ToolErrorKind::Retryable => ErrorCode::ServerError,
            ToolErrorKind::Internal => ErrorCode::InternalError,
        };
        let mut data = serde_json::json!({
            "tool": tool,
            "kind": kind,
            "code": error.code,
            "retryable": error.retryable,
        });
        if let Some(details) = &error.details {
            data["details"] = details.clone();
        }
        Self::new(code, message).with_data(data)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_invalid_request() {
        let err = RpcError::from_tool_error("request", &ToolError::conflict("busy"));
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert!(err.message.contains("tool: request"));
        assert!(err.message.contains("message: busy"));
        assert!(err.message.contains("kind: conflict"));
        assert_eq!(err.data.as_ref().expect("data")["kind"], "conflict");
    }

    #[test]
    fn expired_auth_maps_to_unauthorized() {
        let err = RpcError::from_tool_error("gitlab_auth", &ToolError::auth_expired("401"));
        assert_eq!(err.code.as_i32(), -32002);
    }
}
