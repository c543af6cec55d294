use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[default]
    Http,
    /// Persistent `text/event-stream` connection with connect/disconnect.
    EventStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub params: Vec<NameValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestAuth {
    #[default]
    None,
    Basic {
        username: String,
        #[serde(default)]
        password: String,
    },
    Bearer {
        token: String,
        #[serde(default)]
        prefix: Option<String>,
    },
}

/// A persisted description of an outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRequest {
    pub id: String,
    #[serde(default)]
    pub kind: RequestKind,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<RequestHeader>,
    #[serde(default)]
    pub body: Option<RequestBody>,
    #[serde(default)]
    pub auth: RequestAuth,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl StoredRequest {
    pub fn get(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: RequestKind::Http,
            method: default_method(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            auth: RequestAuth::None,
            timeout_ms: None,
        }
    }

    pub fn event_stream(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::EventStream,
            ..Self::get(id, url)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(RequestHeader {
            name: name.into(),
            value: value.into(),
            disabled: false,
        });
        self
    }

    pub fn with_auth(mut self, auth: RequestAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn enabled_headers(&self) -> impl Iterator<Item = &RequestHeader> {
        self.headers
            .iter()
            .filter(|h| !h.disabled && !h.name.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_uses_defaults() {
        let request: StoredRequest = serde_json::from_value(serde_json::json!({
            "id": "req_1",
            "url": "http://127.0.0.1/"
        }))
        .expect("request");
        assert_eq!(request.method, "GET");
        assert_eq!(request.kind, RequestKind::Http);
        assert_eq!(request.auth, RequestAuth::None);
    }

    #[test]
    fn auth_and_body_parse_from_collection_shape() {
        let request: StoredRequest = serde_json::from_value(serde_json::json!({
            "id": "req_2",
            "kind": "event_stream",
            "method": "POST",
            "url": "http://127.0.0.1/events",
            "auth": {"type": "basic", "username": "user", "password": "pass"},
            "body": {"mimeType": "application/json", "text": "{}"},
            "headers": [
                {"name": "X-On", "value": "1"},
                {"name": "X-Off", "value": "0", "disabled": true}
            ]
        }))
        .expect("request");
        assert_eq!(request.kind, RequestKind::EventStream);
        assert!(matches!(request.auth, RequestAuth::Basic { .. }));
        assert_eq!(
            request.body.as_ref().and_then(|b| b.mime_type.as_deref()),
            Some("application/json")
        );
        let names: Vec<&str> = request.enabled_headers().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["X-On"]);
    }
}
