use crate::models::{Response, TimelineEntry};
use crate::utils::text::format_byte_size;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Json,
    Xml,
    Html,
    Csv,
    Text,
    Image,
    Pdf,
    Binary,
    Empty,
}

impl ContentClass {
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            ContentClass::Image | ContentClass::Pdf | ContentClass::Binary
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseView {
    Preview,
    RawData,
    Console,
    Headers,
    Cookies,
}

pub const RESPONSE_VIEWS: &[&str] = &["preview", "raw_data", "console", "headers", "cookies"];

impl ResponseView {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "preview" => Some(ResponseView::Preview),
            "raw" | "raw_data" => Some(ResponseView::RawData),
            "console" | "timeline" => Some(ResponseView::Console),
            "headers" => Some(ResponseView::Headers),
            "cookies" => Some(ResponseView::Cookies),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rendering {
    Text {
        text: String,
    },
    Binary {
        mime_type: String,
        size: usize,
        summary: String,
        base64: String,
    },
}

impl Rendering {
    pub fn text(&self) -> Option<&str> {
        match self {
            Rendering::Text { text } => Some(text),
            Rendering::Binary { .. } => None,
        }
    }
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

pub fn classify(content_type: Option<&str>, body: &[u8]) -> ContentClass {
    if body.is_empty() {
        return ContentClass::Empty;
    }
    let mime = content_type.map(essence).unwrap_or_default();
    if mime.contains("html") {
        return ContentClass::Html;
    }
    if mime == "application/json" || mime.ends_with("+json") || mime.ends_with("/json") {
        return ContentClass::Json;
    }
    if mime.ends_with("/xml") || mime.ends_with("+xml") {
        return ContentClass::Xml;
    }
    if mime == "text/csv" {
        return ContentClass::Csv;
    }
    if mime.starts_with("image/") {
        return ContentClass::Image;
    }
    if mime == "application/pdf" {
        return ContentClass::Pdf;
    }
    if mime == "application/octet-stream"
        || mime.starts_with("audio/")
        || mime.starts_with("video/")
        || mime.starts_with("font/")
        || mime == "application/zip"
    {
        return ContentClass::Binary;
    }
    match std::str::from_utf8(body) {
        Ok(text) if mime.is_empty() && looks_like_json(text) => ContentClass::Json,
        Ok(_) => ContentClass::Text,
        Err(_) => ContentClass::Binary,
    }
}

fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim_start();
    (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
}

/// View selected when a response settles.
pub fn default_view(class: ContentClass) -> ResponseView {
    match class {
        ContentClass::Csv => ResponseView::RawData,
        _ => ResponseView::Preview,
    }
}

fn binary_summary(response: &Response) -> Rendering {
    let mime_type = response
        .content_type
        .as_deref()
        .map(essence)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Rendering::Binary {
        summary: format!("{} ({})", mime_type, format_byte_size(response.body.len())),
        size: response.body.len(),
        base64: base64::engine::general_purpose::STANDARD.encode(&response.body),
        mime_type,
    }
}

fn body_text(response: &Response) -> Option<&str> {
    std::str::from_utf8(&response.body).ok()
}

/// Pure: the same response and timeline always render the same way.
pub fn render(response: &Response, timeline: &[TimelineEntry], view: ResponseView) -> Rendering {
    match view {
        ResponseView::Preview => render_preview(response),
        ResponseView::RawData => match body_text(response) {
            Some(text) => Rendering::Text {
                text: text.to_string(),
            },
            None => binary_summary(response),
        },
        ResponseView::Console => Rendering::Text {
            text: console_lines(response, timeline).join("\n"),
        },
        ResponseView::Headers => Rendering::Text {
            text: response
                .headers
                .iter()
                .map(|h| format!("{}: {}", h.name, h.value))
                .collect::<Vec<_>>()
                .join("\n"),
        },
        ResponseView::Cookies => Rendering::Text {
            text: response.cookies().join("\n"),
        },
    }
}

fn render_preview(response: &Response) -> Rendering {
    let class = classify(response.content_type.as_deref(), &response.body);
    if class.is_binary() {
        return binary_summary(response);
    }
    let Some(text) = body_text(response) else {
        return binary_summary(response);
    };
    if class == ContentClass::Json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                return Rendering::Text { text: pretty };
            }
        }
    }
    Rendering::Text {
        text: text.to_string(),
    }
}

/// Recorded timeline when there is one, otherwise the status line and
/// headers in the same notation.
pub fn console_lines(response: &Response, timeline: &[TimelineEntry]) -> Vec<String> {
    if !timeline.is_empty() {
        return timeline.iter().map(TimelineEntry::render).collect();
    }
    let mut lines = Vec::with_capacity(response.headers.len() + 1);
    lines.push(format!("< {} {}", response.http_version, response.status_tag()));
    for header in &response.headers {
        lines.push(format!("< {}: {}", header.name, header.value));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseHeader;
    use bytes::Bytes;

    fn response(content_type: &str, body: &'static [u8]) -> Response {
        Response {
            status_code: 200,
            status_text: "OK".to_string(),
            http_version: "HTTP/1.1".to_string(),
            headers: vec![ResponseHeader {
                name: "Content-Type".to_string(),
                value: content_type.to_string(),
            }],
            body: Bytes::from_static(body),
            content_type: Some(content_type.to_string()),
            url: "http://127.0.0.1/".to_string(),
            elapsed_ms: 1,
        }
    }

    #[test]
    fn classify_by_mime_then_sniff() {
        assert_eq!(
            classify(Some("application/json; charset=utf-8"), b"{}"),
            ContentClass::Json
        );
        assert_eq!(classify(Some("application/problem+json"), b"{}"), ContentClass::Json);
        assert_eq!(classify(Some("text/xml"), b"<a/>"), ContentClass::Xml);
        assert_eq!(classify(Some("application/xhtml+xml"), b"<a/>"), ContentClass::Html);
        assert_eq!(classify(Some("text/csv"), b"a,b"), ContentClass::Csv);
        assert_eq!(classify(Some("application/pdf"), b"%PDF"), ContentClass::Pdf);
        assert_eq!(classify(None, b"[1,2]"), ContentClass::Json);
        assert_eq!(classify(None, b"plain"), ContentClass::Text);
        assert_eq!(classify(None, &[0xff, 0xfe, 0x00]), ContentClass::Binary);
        assert_eq!(classify(Some("text/plain"), b""), ContentClass::Empty);
    }

    #[test]
    fn preview_pretty_prints_json_in_source_order() {
        let rendered = render(
            &response("application/json", br#"{"b":1,"a":{"c":[1]}}"#),
            &[],
            ResponseView::Preview,
        );
        assert_eq!(
            rendered.text(),
            Some("{\n  \"b\": 1,\n  \"a\": {\n    \"c\": [\n      1\n    ]\n  }\n}")
        );
    }

    #[test]
    fn raw_data_is_byte_exact() {
        let rendered = render(
            &response("application/json", br#"{"id":"1"}"#),
            &[],
            ResponseView::RawData,
        );
        assert_eq!(rendered.text(), Some(r#"{"id":"1"}"#));
    }

    #[test]
    fn pdf_preview_is_a_binary_summary() {
        let rendered = render(
            &response("application/pdf", b"%PDF-1.4 fake"),
            &[],
            ResponseView::Preview,
        );
        match rendered {
            Rendering::Binary {
                mime_type, size, ..
            } => {
                assert_eq!(mime_type, "application/pdf");
                assert_eq!(size, 13);
            }
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn console_falls_back_to_headers() {
        let rendered = render(&response("text/csv", b"a,b\n1,2"), &[], ResponseView::Console);
        assert_eq!(
            rendered.text(),
            Some("< HTTP/1.1 200 OK\n< Content-Type: text/csv")
        );
        assert_eq!(default_view(ContentClass::Csv), ResponseView::RawData);
        assert_eq!(default_view(ContentClass::Xml), ResponseView::Preview);
    }

    #[test]
    fn view_names_accept_aliases() {
        assert_eq!(ResponseView::parse("Raw Data"), Some(ResponseView::RawData));
        assert_eq!(ResponseView::parse("timeline"), Some(ResponseView::Console));
        assert_eq!(ResponseView::parse("body"), None);
    }
}
