use crate::errors::{ErrorCode, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Decodes one input line. Malformed JSON is a parse error; well-formed
    /// JSON that is not a 2.0 request is an invalid request.
    pub fn parse(line: &str) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|_| RpcError::new(ErrorCode::ParseError, "Parse error"))?;
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) if request.jsonrpc == JSONRPC_VERSION => Ok(request),
            _ => Err(RpcError::new(ErrorCode::InvalidRequest, "Invalid request")),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// `tools/call` params. A missing `arguments` member becomes `{}`.
    pub fn tool_call(&self) -> Result<ToolCall, RpcError> {
        let call: ToolCall = serde_json::from_value(self.params.clone())
            .map_err(|_| RpcError::new(ErrorCode::InvalidParams, "Missing tool name"))?;
        if call.name.trim().is_empty() {
            return Err(RpcError::new(ErrorCode::InvalidParams, "Missing tool name"));
        }
        Ok(call)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "empty_arguments", deserialize_with = "null_as_empty")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(if value.is_null() { empty_arguments() } else { value })
}

/// Tool output as both a pretty text block and the structured value.
pub fn tool_result(result: Value) -> Value {
    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
    serde_json::json!({
        "content": [{"type": "text", "text": text}],
        "structuredContent": result,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Errors raised before an id is known are answered with `null`.
    pub fn failure(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code: error.code.as_i32(),
                message: error.message,
                data: error.data,
            }),
        }
    }
}
