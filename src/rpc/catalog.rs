use crate::errors::{ErrorCode, RpcError};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

static TOOL_CATALOG: Lazy<Vec<ToolDef>> = Lazy::new(|| {
    let raw = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tool_catalog.json"));
    serde_json::from_str(raw).expect("tool_catalog.json must be valid JSON")
});

static TOOL_VALIDATORS: Lazy<HashMap<String, JSONSchema>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for tool in TOOL_CATALOG.iter() {
        if let Ok(schema) = JSONSchema::compile(&tool.input_schema) {
            map.insert(tool.name.clone(), schema);
        }
    }
    map
});

pub fn tool_catalog() -> &'static Vec<ToolDef> {
    &TOOL_CATALOG
}

pub fn tool_by_name(name: &str) -> Option<&'static ToolDef> {
    TOOL_CATALOG.iter().find(|tool| tool.name == name)
}

pub fn validate_tool_args(tool_name: &str, args: &Value) -> Result<(), RpcError> {
    let Some(schema) = TOOL_VALIDATORS.get(tool_name) else {
        return Ok(());
    };
    if let Err(errors) = schema.validate(args) {
        let action = args.get("action").and_then(|v| v.as_str());
        let header = match action {
            Some(action) => format!("Invalid arguments for {}:{}", tool_name, action),
            None => format!("Invalid arguments for {}", tool_name),
        };
        let mut lines = vec![header];
        for err in errors.take(10) {
            let path = err.instance_path.to_string();
            let path = if path.is_empty() { "(root)".to_string() } else { path };
            let detail = match &err.kind {
                jsonschema::error::ValidationErrorKind::AdditionalProperties { unexpected } => {
                    format!("unknown field(s) {}", unexpected.join(", "))
                }
                jsonschema::error::ValidationErrorKind::Enum { options } => {
                    let allowed: Vec<String> = options
                        .as_array()
                        .map(|arr| {
                            arr.iter()
                                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                                .collect()
                        })
                        .unwrap_or_default();
                    format!("expected one of {}", allowed.join(", "))
                }
                jsonschema::error::ValidationErrorKind::Required { property } => format!(
                    "missing required field '{}'",
                    property.as_str().map(str::to_string).unwrap_or_else(|| property.to_string())
                ),
                _ => err.to_string(),
            };
            lines.push(format!("{}: {}", path, detail));
        }
        return Err(RpcError::new(ErrorCode::InvalidParams, lines.join("\n")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_every_tool() {
        let names: Vec<&str> = tool_catalog().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["request", "gitlab_auth", "patch"]);
        assert!(TOOL_VALIDATORS.contains_key("request"));
    }

    #[test]
    fn unknown_fields_and_actions_are_rejected() {
        let err = validate_tool_args("patch", &serde_json::json!({"action": "request", "patches": {}}))
            .expect_err("unknown field");
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert!(err.message.contains("patches"));

        let err = validate_tool_args("request", &serde_json::json!({"action": "resend"}))
            .expect_err("unknown action");
        assert!(err.message.contains("/action"));
        assert!(validate_tool_args("request", &serde_json::json!({"action": "list"})).is_ok());
    }
}
