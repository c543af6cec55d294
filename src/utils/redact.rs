use crate::utils::text::truncate_utf8_prefix;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_REDACTION: &str = "[REDACTED]";
const INLINE_REDACTION: &str = "***REDACTED***";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "token",
        "access_token",
        "refresh_token",
        "code",
        "code_verifier",
        "client_secret",
        "authorization",
    ]
    .into_iter()
    .collect()
});

static SENSITIVE_HEADER_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "authorization",
        "proxy-authorization",
        "cookie",
        "private-token",
        "x-api-key",
    ]
    .into_iter()
    .collect()
});

static INLINE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\bglpat-[A-Za-z0-9_-]{10,}\b").expect("inline redaction regex"),
            "glpat-***REDACTED***",
        ),
        (
            Regex::new(r"\beyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\b")
                .expect("inline redaction regex"),
            INLINE_REDACTION,
        ),
        (
            Regex::new(r"\b(Bearer|Basic)\s+([A-Za-z0-9._~+/=-]{8,})").expect("inline redaction regex"),
            "$1 ***REDACTED***",
        ),
        (
            Regex::new(r#"\b(access_token|refresh_token|code_verifier|code)=([^&\s"']+)"#)
                .expect("inline redaction regex"),
            "$1=***REDACTED***",
        ),
    ]
});

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    SENSITIVE_KEYS.contains(normalized.as_str()) || normalized.contains("token")
}

pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADER_NAMES.contains(name.trim().to_lowercase().as_str())
}

pub fn redact_text(value: &str, max_length: usize) -> String {
    let mut out = value.to_string();
    for (re, replacement) in INLINE_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }
    if out.len() > max_length {
        return format!("{}...", truncate_utf8_prefix(&out, max_length));
    }
    out
}

/// Masks secrets in log metadata. Header lists (`[{name, value}]`) are
/// matched on the header name.
pub fn redact_value(value: &Value, max_length: usize) -> Value {
    match value {
        Value::String(text) => Value::String(redact_text(text, max_length)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_value(item, max_length))
                .collect(),
        ),
        Value::Object(map) => {
            let header_name = map.get("name").and_then(|v| v.as_str());
            let mut out = serde_json::Map::new();
            for (key, entry) in map.iter() {
                let masked = if key == "value" && header_name.map(is_sensitive_header).unwrap_or(false)
                {
                    true
                } else {
                    is_sensitive_key(key) && !entry.is_null()
                };
                if masked {
                    out.insert(key.clone(), Value::String(DEFAULT_REDACTION.to_string()));
                } else {
                    out.insert(key.clone(), redact_value(entry, max_length));
                }
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_tokens_are_masked_inline() {
        let out = redact_text("Authorization: Bearer abcdef123456789", 1024);
        assert_eq!(out, "Authorization: Bearer ***REDACTED***");
    }

    #[test]
    fn oauth_form_fields_are_masked() {
        let out = redact_text("grant_type=authorization_code&code=xyz987&client_id=abc", 1024);
        assert!(out.contains("code=***REDACTED***"));
        assert!(out.contains("client_id=abc"));
    }

    #[test]
    fn header_lists_mask_by_name() {
        let input = serde_json::json!({
            "headers": [
                {"name": "Authorization", "value": "secret"},
                {"name": "Accept", "value": "*/*"}
            ],
            "refresh_token": "r-123",
        });
        let out = redact_value(&input, 1024);
        assert_eq!(out["headers"][0]["value"], "[REDACTED]");
        assert_eq!(out["headers"][1]["value"], "*/*");
        assert_eq!(out["refresh_token"], "[REDACTED]");
    }
}
