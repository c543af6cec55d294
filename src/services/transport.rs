use crate::constants::lifecycle::EVENT_STREAM_MIME;
use crate::constants::network::{MAX_REDIRECTS, USER_AGENT};
use crate::constants::protocols::ALLOWED_HTTP;
use crate::errors::ToolError;
use crate::models::{RequestAuth, RequestKind, ResponseHeader, StoredRequest};
use crate::utils::text::canonical_header_name;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,
    #[error("Could not connect: {0}")]
    Connect(String),
    #[error("Failed to read response body: {0}")]
    Body(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

impl From<TransportError> for ToolError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ToolError::timeout("Request timed out"),
            other => ToolError::request_failed(other.to_string()),
        }
    }
}

/// A stored request resolved into exactly what goes on the wire.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub kind: RequestKind,
    pub method: String,
    pub url: url::Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl PreparedRequest {
    pub fn prepare(
        request: &StoredRequest,
        default_timeout: Option<Duration>,
    ) -> Result<Self, ToolError> {
        let method = request.method.trim().to_uppercase();
        reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ToolError::invalid_params(format!("Invalid method: {}", request.method)))?;

        let url = url::Url::parse(request.url.trim())
            .map_err(|err| ToolError::invalid_params(format!("Invalid URL: {}", err)))?;
        if !ALLOWED_HTTP.contains(&format!("{}:", url.scheme()).as_str()) {
            return Err(ToolError::invalid_params(format!(
                "Unsupported protocol: {}",
                url.scheme()
            ))
            .with_hint("Only http and https URLs can be sent."));
        }

        let mut headers = Vec::new();
        for header in request.enabled_headers() {
            let name = header.name.trim();
            reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ToolError::invalid_params(format!("Invalid header name: {}", name))
            })?;
            reqwest::header::HeaderValue::from_str(&header.value).map_err(|_| {
                ToolError::invalid_params(format!("Invalid value for header {}", name))
            })?;
            headers.push((name.to_string(), header.value.clone()));
        }
        let has_header = |headers: &[(String, String)], name: &str| {
            headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
        };

        if !has_header(&headers, "authorization") {
            match &request.auth {
                RequestAuth::None => {}
                RequestAuth::Basic { username, password } => {
                    let encoded = base64::engine::general_purpose::STANDARD
                        .encode(format!("{}:{}", username, password));
                    headers.push(("Authorization".to_string(), format!("Basic {}", encoded)));
                }
                RequestAuth::Bearer { token, prefix } => {
                    let prefix = prefix
                        .as_deref()
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .unwrap_or("Bearer");
                    headers.push(("Authorization".to_string(), format!("{} {}", prefix, token)));
                }
            }
        }

        let mut body = None;
        if let Some(source) = &request.body {
            let mime = source.mime_type.as_deref().map(str::trim).filter(|m| !m.is_empty());
            let is_form = mime
                .map(|m| m.eq_ignore_ascii_case(FORM_URLENCODED))
                .unwrap_or(false);
            if is_form && !source.params.is_empty() {
                let pairs: Vec<(&str, &str)> = source
                    .params
                    .iter()
                    .map(|p| (p.name.as_str(), p.value.as_str()))
                    .collect();
                let encoded = serde_urlencoded::to_string(pairs).map_err(|err| {
                    ToolError::invalid_params(format!("Invalid form body: {}", err))
                })?;
                body = Some(Bytes::from(encoded));
            } else if let Some(text) = &source.text {
                body = Some(Bytes::from(text.clone()));
            }
            if let Some(mime) = mime {
                if body.is_some() && !has_header(&headers, "content-type") {
                    headers.push(("Content-Type".to_string(), mime.to_string()));
                }
            }
        }

        if request.kind == RequestKind::EventStream && !has_header(&headers, "accept") {
            headers.push(("Accept".to_string(), EVENT_STREAM_MIME.to_string()));
        }

        Ok(Self {
            kind: request.kind,
            method,
            url,
            headers,
            body,
            timeout: request
                .timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .or(default_timeout),
        })
    }

    /// `GET /path?query HTTP/1.1`
    pub fn request_line(&self) -> String {
        let mut target = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }
        format!("{} {} HTTP/1.1", self.method, target)
    }

    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub remote_addr: Option<SocketAddr>,
    pub url: String,
    pub headers: Vec<ResponseHeader>,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn status_line(&self) -> String {
        format!("{} {} {}", self.http_version, self.status, self.status_text)
            .trim_end()
            .to_string()
    }

    pub fn content_type(&self) -> Option<String> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-type"))
            .map(|h| h.value.clone())
    }
}

/// Resolves once response headers arrive; the body is consumed by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &PreparedRequest) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|err| ToolError::internal(format!("Failed to build HTTP client: {}", err)))?;
        Ok(Self { client })
    }
}

fn version_label(version: reqwest::Version) -> &'static str {
    match version {
        reqwest::Version::HTTP_09 => "HTTP/0.9",
        reqwest::Version::HTTP_10 => "HTTP/1.0",
        reqwest::Version::HTTP_2 => "HTTP/2",
        reqwest::Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &PreparedRequest) -> Result<TransportResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|err| TransportError::Other(err.to_string()))?;
        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| ResponseHeader {
                name: canonical_header_name(name.as_str()),
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            })
            .collect();
        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            http_version: version_label(response.version()).to_string(),
            remote_addr: response.remote_addr(),
            url: response.url().to_string(),
            headers,
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from))
                .boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NameValue, RequestBody};

    #[test]
    fn basic_auth_becomes_header() {
        let request = StoredRequest::get("req_1", "http://127.0.0.1:9/auth/basic").with_auth(
            RequestAuth::Basic {
                username: "user".to_string(),
                password: "pass".to_string(),
            },
        );
        let prepared = PreparedRequest::prepare(&request, None).expect("prepare");
        assert!(prepared
            .headers
            .contains(&("Authorization".to_string(), "Basic dXNlcjpwYXNz".to_string())));
    }

    #[test]
    fn explicit_authorization_header_wins() {
        let request = StoredRequest::get("req_1", "http://127.0.0.1:9/")
            .with_header("authorization", "Token abc")
            .with_auth(RequestAuth::Bearer {
                token: "ignored".to_string(),
                prefix: None,
            });
        let prepared = PreparedRequest::prepare(&request, None).expect("prepare");
        let auth: Vec<_> = prepared
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("authorization"))
            .collect();
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0].1, "Token abc");
    }

    #[test]
    fn form_params_are_urlencoded() {
        let mut request = StoredRequest::get("req_1", "http://127.0.0.1:9/form");
        request.method = "post".to_string();
        request.body = Some(RequestBody {
            mime_type: Some(FORM_URLENCODED.to_string()),
            text: None,
            params: vec![NameValue {
                name: "q".to_string(),
                value: "a b&c".to_string(),
            }],
        });
        let prepared = PreparedRequest::prepare(&request, None).expect("prepare");
        assert_eq!(prepared.method, "POST");
        assert_eq!(prepared.body.as_deref(), Some(&b"q=a+b%26c"[..]));
        assert!(prepared
            .headers
            .contains(&("Content-Type".to_string(), FORM_URLENCODED.to_string())));
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        let request = StoredRequest::get("req_1", "file:///etc/passwd");
        let err = PreparedRequest::prepare(&request, None).expect_err("rejected");
        assert_eq!(err.code, "INVALID_PARAMS");
    }

    #[test]
    fn event_streams_ask_for_event_stream() {
        let request = StoredRequest::event_stream("req_1", "http://127.0.0.1:9/events?x=1");
        let prepared = PreparedRequest::prepare(&request, Some(Duration::from_secs(1)))
            .expect("prepare");
        assert!(prepared
            .headers
            .contains(&("Accept".to_string(), EVENT_STREAM_MIME.to_string())));
        assert_eq!(prepared.request_line(), "GET /events?x=1 HTTP/1.1");
        assert_eq!(prepared.host_header(), "127.0.0.1:9");
        assert_eq!(prepared.timeout, Some(Duration::from_secs(1)));
    }
}
