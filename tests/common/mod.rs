#![allow(dead_code)]

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use once_cell::sync::Lazy;
use reqflow::app::AppOptions;
use reqflow::services::oauth::OAuthConfig;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

pub const CLIENT_ID: &str = "client-123";
pub const GOOD_CODE: &str = "good-code";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("reqflow-{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn restore_env(key: &str, previous: Option<String>) {
    match previous {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

/// Knobs and recordings shared with the mock handlers.
#[derive(Default)]
pub struct MockState {
    issued: AtomicUsize,
    pub token_forms: Mutex<Vec<HashMap<String, String>>>,
    pub rejected_tokens: Mutex<HashSet<String>>,
    pub fail_refresh: AtomicBool,
    pub profile_error: AtomicBool,
    pub profile_hits: AtomicUsize,
    pub posts: Mutex<Vec<(String, Value)>>,
}

impl MockState {
    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens
            .lock()
            .expect("lock")
            .insert(token.to_string());
    }

    pub fn token_forms(&self) -> Vec<HashMap<String, String>> {
        self.token_forms.lock().expect("lock").clone()
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().expect("lock").clone()
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let router = Router::new()
            .route("/json", get(json_body))
            .route("/delay", get(delayed))
            .route("/events", get(endless_events))
            .route("/events/finite", get(finite_events))
            .route("/cookie", get(cookie))
            .route("/basic-auth", get(basic_auth))
            .route("/csv", get(csv))
            .route("/xml", get(xml))
            .route("/pdf", get(pdf))
            .route("/echo", post(echo))
            .route("/oauth/token", post(token))
            .route("/api/v4/user", get(user))
            .fallback(capture)
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self { addr, state, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig::new(self.base_url())
            .with_client_id(CLIENT_ID)
            .with_redirect_uri("http://127.0.0.1:4333/oauth/gitlab")
    }

    pub fn app_options(&self, dir: &std::path::Path) -> AppOptions {
        AppOptions {
            credentials_path: dir.join("credentials.json"),
            documents_dir: dir.join("documents"),
            patch_remote_url: None,
            oauth: self.oauth_config(),
            token_poll_interval: Duration::from_millis(20),
            request_timeout: None,
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn json_body() -> impl IntoResponse {
    Json(serde_json::json!({"id": "1"}))
}

async fn delayed() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn endless_events() -> impl IntoResponse {
    let frames = futures::stream::unfold(0u64, |n| async move {
        if n > 0 {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        let frame = format!("event: ping\ndata: {}\n\n", n);
        Some((Ok::<_, Infallible>(frame), n + 1))
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(frames),
    )
}

async fn finite_events() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        ": warm-up\n\nid: 1\nevent: update\ndata: first\n\nid: 2\ndata: line one\ndata: line two\n\n",
    )
}

async fn cookie() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, "insomnia-test-cookie=value123")],
        "cookie set",
    )
}

async fn basic_auth(headers: HeaderMap) -> Response {
    // user:pass
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some("Basic dXNlcjpwYXNz") => "authorized".into_response(),
        _ => (StatusCode::UNAUTHORIZED, "denied").into_response(),
    }
}

async fn csv() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/csv")], "name,count\nalpha,1\nbeta,2\n")
}

async fn xml() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        "<note><to>you</to></note>",
    )
}

async fn pdf() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/pdf")],
        b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<<>>\nendobj\n".to_vec(),
    )
}

async fn echo(headers: HeaderMap, body: String) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(serde_json::json!({"content_type": content_type, "body": body}))
}

fn issue_token(state: &MockState) -> Response {
    let n = state.issued.fetch_add(1, Ordering::SeqCst) + 1;
    Json(serde_json::json!({
        "access_token": format!("access-{}", n),
        "refresh_token": format!("refresh-{}", n),
        "token_type": "Bearer",
        "expires_in": 7200,
    }))
    .into_response()
}

fn invalid_grant() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "invalid_grant"})),
    )
        .into_response()
}

async fn token(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_forms.lock().expect("lock").push(form.clone());
    let field = |key: &str| form.get(key).map(String::as_str).unwrap_or_default();
    match field("grant_type") {
        "authorization_code"
            if field("code") == GOOD_CODE
                && field("client_id") == CLIENT_ID
                && !field("code_verifier").is_empty() =>
        {
            issue_token(&state)
        }
        "refresh_token"
            if field("refresh_token").starts_with("refresh-")
                && !state.fail_refresh.load(Ordering::SeqCst) =>
        {
            issue_token(&state)
        }
        _ => invalid_grant(),
    }
}

async fn user(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.profile_hits.fetch_add(1, Ordering::SeqCst);
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    if token.is_empty() || state.rejected_tokens.lock().expect("lock").contains(&token) {
        return (StatusCode::UNAUTHORIZED, "401 Unauthorized").into_response();
    }
    if state.profile_error.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(serde_json::json!({
        "id": 7,
        "username": "octo",
        "name": "Octo Cat",
        "avatar_url": "https://gitlab.example/avatar.png",
        "public_email": "",
        "email": "octo@example.com",
        "commit_email": "octo@users.noreply.gitlab.example",
        "projects_limit": 100000,
    }))
    .into_response()
}

async fn capture(State(state): State<Arc<MockState>>, uri: Uri, body: String) -> Response {
    let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::String(body));
    state
        .posts
        .lock()
        .expect("lock")
        .push((uri.path().to_string(), parsed));
    Json(serde_json::json!({"ok": true, "path": uri.path()})).into_response()
}
