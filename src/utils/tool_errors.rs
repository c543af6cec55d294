use crate::errors::ToolError;
use serde_json::Value;

pub fn unknown_action_error(
    tool: &str,
    action: Option<&Value>,
    known_actions: &[&str],
) -> ToolError {
    let action_value = action
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let close: Vec<&str> = known_actions
        .iter()
        .copied()
        .filter(|known| {
            !action_value.is_empty()
                && (known.starts_with(action_value.as_str()) || action_value.starts_with(known))
        })
        .collect();

    let mut hint = format!("Use one of: {}.", known_actions.join(", "));
    if !close.is_empty() {
        hint = format!("Did you mean: {}? {}", close.join(", "), hint);
    }
    let message = if action_value.is_empty() {
        format!("{}: action is required", tool)
    } else {
        format!("Unknown {} action: {}", tool, action_value)
    };
    ToolError::invalid_params(message)
        .with_hint(hint)
        .with_details(serde_json::json!({
            "known_actions": known_actions,
            "did_you_mean": close,
        }))
}

pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::invalid_params(format!("{} must be a non-empty string", key)))
}

pub fn read_positive_int(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    if let Some(n) = value.as_u64() {
        if n > 0 {
            return Some(n);
        }
    }
    if let Some(text) = value.as_str() {
        if let Ok(parsed) = text.trim().parse::<u64>() {
            if parsed > 0 {
                return Some(parsed);
            }
        }
    }
    None
}
