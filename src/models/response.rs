use base64::Engine;
use bytes::Bytes;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub name: String,
    pub value: String,
}

/// A received response. Views are derived from it; it is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub status_text: String,
    pub http_version: String,
    pub headers: Vec<ResponseHeader>,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub url: String,
    pub elapsed_ms: u64,
}

impl Response {
    /// `200 OK`, the way the status tag shows it.
    pub fn status_tag(&self) -> String {
        if self.status_text.is_empty() {
            self.status_code.to_string()
        } else {
            format!("{} {}", self.status_code, self.status_text)
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn cookies(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("set-cookie"))
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn summary(&self) -> Value {
        serde_json::json!({
            "status": self.status_code,
            "status_text": self.status_text,
            "status_tag": self.status_tag(),
            "http_version": self.http_version,
            "url": self.url,
            "content_type": self.content_type,
            "headers": self
                .headers
                .iter()
                .map(|h| serde_json::json!({"name": h.name, "value": h.value}))
                .collect::<Vec<_>>(),
            "body_bytes": self.body.len(),
            "elapsed_ms": self.elapsed_ms,
        })
    }

    pub fn body_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Response {
        Response {
            status_code: 200,
            status_text: "OK".to_string(),
            http_version: "HTTP/1.1".to_string(),
            headers: vec![
                ResponseHeader {
                    name: "Content-Type".to_string(),
                    value: "application/json".to_string(),
                },
                ResponseHeader {
                    name: "Set-Cookie".to_string(),
                    value: "a=1".to_string(),
                },
                ResponseHeader {
                    name: "Set-Cookie".to_string(),
                    value: "b=2".to_string(),
                },
            ],
            body: Bytes::from_static(b"{}"),
            content_type: Some("application/json".to_string()),
            url: "http://127.0.0.1/".to_string(),
            elapsed_ms: 3,
        }
    }

    #[test]
    fn status_tag_joins_code_and_reason() {
        assert_eq!(sample().status_tag(), "200 OK");
    }

    #[test]
    fn header_lookup_ignores_case_and_keeps_repeats() {
        let response = sample();
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.cookies(), vec!["a=1", "b=2"]);
    }
}
