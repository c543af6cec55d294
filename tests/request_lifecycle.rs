mod common;
use common::MockServer;

use reqflow::constants::lifecycle::CANCELLED_MESSAGE;
use reqflow::errors::ToolErrorKind;
use reqflow::models::{ExecutionState, RequestAuth, RequestBody, NameValue, StoredRequest};
use reqflow::services::lifecycle::RequestController;
use reqflow::services::logger::Logger;
use reqflow::services::presenter::ResponseView;
use reqflow::services::transport::HttpTransport;
use std::sync::Arc;
use std::time::Duration;

fn controller() -> Arc<RequestController> {
    let transport = Arc::new(HttpTransport::new().expect("transport"));
    Arc::new(RequestController::new(Logger::new("test"), transport, None))
}

async fn wait_for_state(controller: &RequestController, id: &str, state: ExecutionState) {
    for _ in 0..200 {
        if controller.status(id).map(|s| s.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("request {} never reached {:?}", id, state);
}

#[tokio::test]
async fn send_settles_with_body_and_timeline() {
    let server = MockServer::start().await;
    let controller = controller();

    let snapshot = controller
        .send(StoredRequest::get("req_json", server.url("/json")))
        .await
        .expect("send");

    assert_eq!(snapshot.state, ExecutionState::Settled);
    let response = snapshot.response.as_ref().expect("response");
    assert_eq!(response.status_code, 200);
    let body: serde_json::Value = serde_json::from_slice(&response.body).expect("json body");
    assert_eq!(body, serde_json::json!({"id": "1"}));

    let console = snapshot.console();
    assert!(console[0].starts_with("* Preparing request to http://127.0.0.1:"));
    assert!(console.iter().any(|line| line == "> GET /json HTTP/1.1"));
    assert!(console
        .iter()
        .any(|line| line.starts_with("* Connected to 127.0.0.1 port ")));
    assert!(console.iter().any(|line| line == "< HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn second_send_conflicts_then_cancel_discards_response() {
    let server = MockServer::start().await;
    let controller = controller();

    let pending = {
        let controller = controller.clone();
        let url = server.url("/delay");
        tokio::spawn(async move { controller.send(StoredRequest::get("req_slow", url)).await })
    };
    wait_for_state(&controller, "req_slow", ExecutionState::Sending).await;

    let err = controller
        .send(StoredRequest::get("req_slow", server.url("/json")))
        .await
        .expect_err("second send must be rejected");
    assert_eq!(err.kind, ToolErrorKind::Conflict);

    let cancelled = controller.cancel("req_slow").expect("cancel");
    assert_eq!(cancelled.state, ExecutionState::Cancelled);
    assert!(cancelled.response.is_none());

    let first = pending.await.expect("join").expect("first send");
    assert_eq!(first.state, ExecutionState::Cancelled);
    assert!(first
        .console()
        .iter()
        .any(|line| line == &format!("* {}", CANCELLED_MESSAGE)));

    let err = controller
        .view("req_slow", ResponseView::Preview)
        .expect_err("no response after cancel");
    assert_eq!(err.message, CANCELLED_MESSAGE);

    let err = controller.cancel("req_slow").expect_err("already cancelled");
    assert_eq!(err.kind, ToolErrorKind::Conflict);

    let resent = controller
        .send(StoredRequest::get("req_slow", server.url("/json")))
        .await
        .expect("send after cancel");
    assert_eq!(resent.state, ExecutionState::Settled);
    assert_ne!(resent.execution_id, first.execution_id);
}

#[tokio::test]
async fn event_stream_connects_collects_and_disconnects() {
    let server = MockServer::start().await;
    let controller = controller();

    let connected = controller
        .send(StoredRequest::event_stream("req_sse", server.url("/events")))
        .await
        .expect("connect");
    assert_eq!(connected.state, ExecutionState::Connected);

    let mut received = 0;
    for _ in 0..100 {
        received = controller.status("req_sse").expect("status").events.len();
        if received >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(received >= 3, "expected several events, got {}", received);

    let err = controller
        .send(StoredRequest::event_stream("req_sse", server.url("/events")))
        .await
        .expect_err("stream is still connected");
    assert_eq!(err.kind, ToolErrorKind::Conflict);

    let closed = controller.disconnect("req_sse").expect("disconnect");
    assert_eq!(closed.state, ExecutionState::Settled);
    assert!(closed.events.iter().all(|event| event.event == "ping"));
    assert_eq!(closed.events[0].data, "0");
    let body = closed.response.as_ref().expect("response").body.clone();
    assert!(String::from_utf8_lossy(&body).starts_with("event: ping\ndata: 0\n\n"));
    assert!(closed.console().iter().any(|line| line == "* Disconnected"));

    // The server keeps emitting every 30 ms; nothing more is recorded.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let later = controller.status("req_sse").expect("status");
    assert_eq!(later.state, ExecutionState::Settled);
    assert_eq!(later.events.len(), closed.events.len());
    assert_eq!(
        later.response.as_ref().expect("response").body.len(),
        body.len()
    );

    let err = controller.disconnect("req_sse").expect_err("already closed");
    assert_eq!(err.kind, ToolErrorKind::Conflict);
}

#[tokio::test]
async fn finite_stream_settles_when_server_closes() {
    let server = MockServer::start().await;
    let controller = controller();

    controller
        .send(StoredRequest::event_stream("req_finite", server.url("/events/finite")))
        .await
        .expect("connect");
    let done = controller
        .wait_until_finished("req_finite", Duration::from_secs(5))
        .await
        .expect("finish");

    assert_eq!(done.state, ExecutionState::Settled);
    assert_eq!(done.events.len(), 2);
    assert_eq!(done.events[0].id.as_deref(), Some("1"));
    assert_eq!(done.events[0].event, "update");
    assert_eq!(done.events[1].event, "message");
    assert_eq!(done.events[1].data, "line one\nline two");
    assert!(done
        .console()
        .iter()
        .any(|line| line == "* Connection closed by server"));
}

#[tokio::test]
async fn basic_auth_and_form_bodies_are_applied() {
    let server = MockServer::start().await;
    let controller = controller();

    let authorized = controller
        .send(
            StoredRequest::get("req_auth", server.url("/basic-auth")).with_auth(RequestAuth::Basic {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
        )
        .await
        .expect("send");
    assert_eq!(authorized.response.expect("response").status_code, 200);

    let mut form = StoredRequest::get("req_form", server.url("/echo"));
    form.method = "POST".to_string();
    form.body = Some(RequestBody {
        mime_type: Some("application/x-www-form-urlencoded".to_string()),
        text: None,
        params: vec![
            NameValue {
                name: "name".to_string(),
                value: "a b".to_string(),
            },
            NameValue {
                name: "count".to_string(),
                value: "2".to_string(),
            },
        ],
    });
    let echoed = controller.send(form).await.expect("send form");
    let body: serde_json::Value =
        serde_json::from_slice(&echoed.response.expect("response").body).expect("json");
    assert_eq!(body["content_type"], "application/x-www-form-urlencoded");
    assert_eq!(body["body"], "name=a+b&count=2");
}

#[tokio::test]
async fn transport_failures_and_timeouts_end_in_errored() {
    let server = MockServer::start().await;
    let controller = controller();

    let refused = controller
        .send(StoredRequest::get("req_refused", "http://127.0.0.1:1/"))
        .await
        .expect("snapshot");
    assert_eq!(refused.state, ExecutionState::Errored);
    assert_eq!(
        refused.error.as_ref().map(|e| e.kind),
        Some(ToolErrorKind::RequestFailed)
    );

    let mut slow = StoredRequest::get("req_timeout", server.url("/delay"));
    slow.timeout_ms = Some(100);
    let timed_out = controller.send(slow).await.expect("snapshot");
    assert_eq!(timed_out.state, ExecutionState::Errored);
    assert_eq!(
        timed_out.error.as_ref().map(|e| e.kind),
        Some(ToolErrorKind::Timeout)
    );
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_sending() {
    let controller = controller();

    let err = controller
        .send(StoredRequest::get("req_bad", "ftp://example.com/file"))
        .await
        .expect_err("unsupported scheme");
    assert_eq!(err.kind, ToolErrorKind::InvalidParams);
    assert!(controller.status("req_bad").is_none());

    let err = controller.cancel("req_missing").expect_err("unknown request");
    assert_eq!(err.kind, ToolErrorKind::NotFound);
}
