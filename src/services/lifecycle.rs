use crate::constants::lifecycle::{CANCELLED_MESSAGE, MAX_STREAM_EVENTS};
use crate::constants::network::USER_AGENT;
use crate::errors::ToolError;
use crate::models::{
    ExecutionState, RequestKind, Response, StoredRequest, StreamEvent, TimelineEntry,
    TimelineKind,
};
use crate::services::logger::Logger;
use crate::services::presenter::{self, Rendering, ResponseView};
use crate::services::sse::SseDecoder;
use crate::services::transport::{BodyStream, PreparedRequest, Transport, TransportResponse};
use crate::utils::text::{format_byte_size, truncate_utf8_prefix};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::AbortHandle;

const STREAM_BODY_MAX: usize = 1024 * 1024;
const TIMELINE_DATA_PREVIEW: usize = 256;

/// Point-in-time copy of an execution.
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub request_id: String,
    pub kind: RequestKind,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub response: Option<Response>,
    pub error: Option<ToolError>,
    pub events: Vec<StreamEvent>,
    pub timeline: Vec<TimelineEntry>,
}

impl ExecutionSnapshot {
    pub fn console(&self) -> Vec<String> {
        self.timeline.iter().map(TimelineEntry::render).collect()
    }

    pub fn to_json(&self) -> Value {
        let mut out = serde_json::json!({
            "execution_id": self.execution_id,
            "request_id": self.request_id,
            "kind": self.kind,
            "state": self.state.as_str(),
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.map(|at| at.to_rfc3339()),
            "elapsed_ms": self.elapsed_ms,
            "response": self.response.as_ref().map(Response::summary),
            "error": self.error,
            "timeline_lines": self.timeline.len(),
        });
        if self.kind == RequestKind::EventStream {
            out["events_received"] = Value::from(self.events.len());
            out["events"] = serde_json::to_value(&self.events).unwrap_or(Value::Null);
        }
        if let Some(response) = &self.response {
            let class = presenter::classify(response.content_type.as_deref(), &response.body);
            out["content_class"] = serde_json::to_value(class).unwrap_or(Value::Null);
            out["default_view"] =
                serde_json::to_value(presenter::default_view(class)).unwrap_or(Value::Null);
        }
        out
    }
}

struct ExecutionInner {
    state: ExecutionState,
    timeline: Vec<TimelineEntry>,
    response: Option<Response>,
    stream_body: BytesMut,
    events: Vec<StreamEvent>,
    decoder: SseDecoder,
    error: Option<ToolError>,
    finished_at: Option<DateTime<Utc>>,
}

struct Execution {
    id: String,
    request_id: String,
    kind: RequestKind,
    started_at: DateTime<Utc>,
    started: Instant,
    inner: Mutex<ExecutionInner>,
    state_tx: watch::Sender<ExecutionState>,
    cancelled: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

impl Execution {
    fn new(request: &StoredRequest) -> Self {
        let (state_tx, _) = watch::channel(ExecutionState::Sending);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            kind: request.kind,
            started_at: Utc::now(),
            started: Instant::now(),
            inner: Mutex::new(ExecutionInner {
                state: ExecutionState::Sending,
                timeline: Vec::new(),
                response: None,
                stream_body: BytesMut::new(),
                events: Vec::new(),
                decoder: SseDecoder::new(),
                error: None,
                finished_at: None,
            }),
            state_tx,
            cancelled: AtomicBool::new(false),
            abort: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionInner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn state(&self) -> ExecutionState {
        self.lock().state
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Applies `update` and moves to `next` only when the current state
    /// passes `allowed`. Terminal states are never left.
    fn transition<F>(&self, allowed: fn(ExecutionState) -> bool, next: ExecutionState, update: F) -> bool
    where
        F: FnOnce(&mut ExecutionInner),
    {
        let mut inner = self.lock();
        if !allowed(inner.state) {
            return false;
        }
        inner.state = next;
        if next.is_terminal() {
            inner.finished_at = Some(Utc::now());
        }
        update(&mut *inner);
        drop(inner);
        self.state_tx.send_replace(next);
        true
    }

    /// Timeline lines only land while the execution is live.
    fn record(&self, entries: impl IntoIterator<Item = TimelineEntry>) -> bool {
        let mut inner = self.lock();
        if !inner.state.is_active() {
            return false;
        }
        inner.timeline.extend(entries);
        true
    }

    fn set_abort(&self, handle: AbortHandle) {
        let mut slot = self.abort.lock().unwrap_or_else(|err| err.into_inner());
        if self.cancelled.load(Ordering::SeqCst) {
            handle.abort();
        } else {
            *slot = Some(handle);
        }
    }

    fn abort_task(&self) {
        let handle = self
            .abort
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn cancel(&self) -> bool {
        let changed = self.transition(ExecutionState::is_active, ExecutionState::Cancelled, |inner| {
            inner.timeline.push(TimelineEntry::info(CANCELLED_MESSAGE));
            inner.error = Some(ToolError::request_cancelled(CANCELLED_MESSAGE));
            inner.response = None;
            inner.stream_body.clear();
        });
        if changed {
            self.cancelled.store(true, Ordering::SeqCst);
            self.abort_task();
        }
        changed
    }

    fn disconnect(&self) -> bool {
        let elapsed_ms = self.elapsed_ms();
        let changed = self.transition(
            |state| state == ExecutionState::Connected,
            ExecutionState::Settled,
            |inner| {
                inner.timeline.push(TimelineEntry::info("Disconnected"));
                seal_stream_response(inner, elapsed_ms);
            },
        );
        if changed {
            self.abort_task();
        }
        changed
    }

    fn fail(&self, err: ToolError) -> bool {
        let line = format!("Error: {}", err.message);
        self.transition(ExecutionState::is_active, ExecutionState::Errored, |inner| {
            inner.timeline.push(TimelineEntry::new(TimelineKind::Error, line));
            inner.error = Some(err);
        })
    }

    fn settle(&self, response: Response) -> bool {
        let received = format!("Received {}", format_byte_size(response.body.len()));
        self.transition(
            |state| state == ExecutionState::Sending,
            ExecutionState::Settled,
            |inner| {
                inner.timeline.push(TimelineEntry::new(TimelineKind::DataIn, received));
                inner.response = Some(response);
            },
        )
    }

    fn connect(&self, head: Response) -> bool {
        self.transition(
            |state| state == ExecutionState::Sending,
            ExecutionState::Connected,
            |inner| {
                inner.response = Some(head);
            },
        )
    }

    fn stream_chunk(&self, chunk: &[u8]) -> bool {
        let mut inner = self.lock();
        if inner.state != ExecutionState::Connected {
            return false;
        }
        let room = STREAM_BODY_MAX.saturating_sub(inner.stream_body.len());
        let keep = room.min(chunk.len());
        inner.stream_body.extend_from_slice(&chunk[..keep]);
        let events = inner.decoder.feed(chunk);
        for event in events {
            inner.timeline.push(TimelineEntry::new(
                TimelineKind::DataIn,
                format!(
                    "event: {} data: {}",
                    event.event,
                    truncate_utf8_prefix(&event.data, TIMELINE_DATA_PREVIEW)
                ),
            ));
            inner.events.push(event);
        }
        let overflow = inner.events.len().saturating_sub(MAX_STREAM_EVENTS);
        if overflow > 0 {
            inner.events.drain(..overflow);
        }
        true
    }

    fn end_of_stream(&self) -> bool {
        let elapsed_ms = self.elapsed_ms();
        self.transition(
            |state| state == ExecutionState::Connected,
            ExecutionState::Settled,
            |inner| {
                inner.timeline.push(TimelineEntry::info("Connection closed by server"));
                seal_stream_response(inner, elapsed_ms);
            },
        )
    }

    fn snapshot(&self) -> ExecutionSnapshot {
        let inner = self.lock();
        let response = inner.response.clone().map(|mut response| {
            if self.kind == RequestKind::EventStream {
                if !inner.stream_body.is_empty() {
                    response.body = Bytes::copy_from_slice(&inner.stream_body);
                }
                if !inner.state.is_terminal() {
                    response.elapsed_ms = self.elapsed_ms();
                }
            }
            response
        });
        ExecutionSnapshot {
            execution_id: self.id.clone(),
            request_id: self.request_id.clone(),
            kind: self.kind,
            state: inner.state,
            started_at: self.started_at,
            finished_at: inner.finished_at,
            elapsed_ms: match inner.finished_at {
                Some(finished) => (finished - self.started_at).num_milliseconds().max(0) as u64,
                None => self.elapsed_ms(),
            },
            response,
            error: inner.error.clone(),
            events: inner.events.clone(),
            timeline: inner.timeline.clone(),
        }
    }
}

fn seal_stream_response(inner: &mut ExecutionInner, elapsed_ms: u64) {
    let body = inner.stream_body.split().freeze();
    if let Some(response) = inner.response.as_mut() {
        response.body = body;
        response.elapsed_ms = elapsed_ms;
    }
}

async fn with_deadline<F: Future>(
    deadline: Option<tokio::time::Instant>,
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, ToolError> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.map_err(|_| {
            ToolError::timeout(format!(
                "Request timed out after {} ms",
                limit.map(|d| d.as_millis()).unwrap_or_default()
            ))
        }),
        None => Ok(fut.await),
    }
}

async fn collect_body(mut body: BodyStream) -> Result<Bytes, ToolError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

fn prepare_lines(prepared: &PreparedRequest) -> Vec<TimelineEntry> {
    let mut lines = vec![
        TimelineEntry::info(format!("Preparing request to {}", prepared.url)),
        TimelineEntry::info(format!("Current time is {}", Utc::now().to_rfc3339())),
        TimelineEntry::new(TimelineKind::HeaderOut, prepared.request_line()),
        TimelineEntry::new(
            TimelineKind::HeaderOut,
            format!("Host: {}", prepared.host_header()),
        ),
        TimelineEntry::new(TimelineKind::HeaderOut, format!("User-Agent: {}", USER_AGENT)),
    ];
    for (name, value) in &prepared.headers {
        lines.push(TimelineEntry::new(
            TimelineKind::HeaderOut,
            format!("{}: {}", name, value),
        ));
    }
    if let Some(body) = &prepared.body {
        lines.push(TimelineEntry::info(format!(
            "Sending {} body",
            format_byte_size(body.len())
        )));
    }
    lines
}

fn response_head_lines(prepared: &PreparedRequest, head: &TransportResponse) -> Vec<TimelineEntry> {
    let host = prepared.url.host_str().unwrap_or_default().to_string();
    let connected = match head.remote_addr {
        Some(addr) if addr.ip().to_string() == host.trim_matches(['[', ']']) => {
            format!("Connected to {} port {}", addr.ip(), addr.port())
        }
        Some(addr) => format!("Connected to {} ({}) port {}", host, addr.ip(), addr.port()),
        None => format!(
            "Connected to {} port {}",
            host,
            prepared.url.port_or_known_default().unwrap_or_default()
        ),
    };
    let mut lines = vec![
        TimelineEntry::info(connected),
        TimelineEntry::new(TimelineKind::HeaderIn, head.status_line()),
    ];
    for header in &head.headers {
        lines.push(TimelineEntry::new(
            TimelineKind::HeaderIn,
            format!("{}: {}", header.name, header.value),
        ));
    }
    lines
}

async fn drive(execution: Arc<Execution>, transport: Arc<dyn Transport>, prepared: PreparedRequest) {
    let deadline = prepared.timeout.map(|limit| tokio::time::Instant::now() + limit);
    let head = match with_deadline(deadline, prepared.timeout, transport.execute(&prepared)).await {
        Ok(Ok(head)) => head,
        Ok(Err(err)) => {
            execution.fail(err.into());
            return;
        }
        Err(err) => {
            execution.fail(err);
            return;
        }
    };
    if !execution.record(response_head_lines(&prepared, &head)) {
        return;
    }

    let TransportResponse {
        status,
        status_text,
        http_version,
        url,
        headers,
        body,
        ..
    } = head;
    let content_type = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-type"))
        .map(|h| h.value.clone());
    let mut response = Response {
        status_code: status,
        status_text,
        http_version,
        headers,
        body: Bytes::new(),
        content_type,
        url,
        elapsed_ms: 0,
    };

    match prepared.kind {
        RequestKind::Http => match with_deadline(deadline, prepared.timeout, collect_body(body)).await {
            Ok(Ok(bytes)) => {
                response.body = bytes;
                response.elapsed_ms = execution.elapsed_ms();
                execution.settle(response);
            }
            Ok(Err(err)) | Err(err) => {
                execution.fail(err);
            }
        },
        RequestKind::EventStream => {
            response.elapsed_ms = execution.elapsed_ms();
            if !execution.connect(response) {
                return;
            }
            let mut body = body;
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        if !execution.stream_chunk(&chunk) {
                            return;
                        }
                    }
                    Err(err) => {
                        execution.fail(err.into());
                        return;
                    }
                }
            }
            execution.end_of_stream();
        }
    }
}

/// Owns every in-flight execution, at most one per request id.
pub struct RequestController {
    logger: Logger,
    transport: Arc<dyn Transport>,
    executions: DashMap<String, Arc<Execution>>,
    default_timeout: Option<Duration>,
}

impl RequestController {
    pub fn new(logger: Logger, transport: Arc<dyn Transport>, default_timeout: Option<Duration>) -> Self {
        Self {
            logger: logger.child("lifecycle"),
            transport,
            executions: DashMap::new(),
            default_timeout,
        }
    }

    fn register(&self, request: &StoredRequest) -> Result<Arc<Execution>, ToolError> {
        let execution = Arc::new(Execution::new(request));
        match self.executions.entry(request.id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().state().is_active() {
                    return Err(ToolError::conflict(format!(
                        "Request {} is already in flight",
                        request.id
                    ))
                    .with_hint("Cancel it or wait for it to finish before sending again."));
                }
                occupied.insert(Arc::clone(&execution));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&execution));
            }
        }
        Ok(execution)
    }

    /// Resolves when the response is complete, the stream connects, or the
    /// execution is cancelled or fails. Transport failures are reported in
    /// the snapshot, not as `Err`.
    pub async fn send(&self, request: StoredRequest) -> Result<ExecutionSnapshot, ToolError> {
        if request.id.trim().is_empty() {
            return Err(ToolError::invalid_params("request id must be a non-empty string"));
        }
        let prepared = PreparedRequest::prepare(&request, self.default_timeout)?;
        let execution = self.register(&request)?;
        execution.record(prepare_lines(&prepared));
        self.logger.debug(
            "request sending",
            Some(&serde_json::json!({
                "request_id": request.id,
                "execution_id": execution.id,
                "method": prepared.method,
                "url": prepared.url.as_str(),
            })),
        );

        let mut state_rx = execution.state_tx.subscribe();
        let task = tokio::spawn(drive(
            Arc::clone(&execution),
            Arc::clone(&self.transport),
            prepared,
        ));
        execution.set_abort(task.abort_handle());

        loop {
            if *state_rx.borrow_and_update() != ExecutionState::Sending {
                break;
            }
            if state_rx.changed().await.is_err() {
                break;
            }
        }

        let snapshot = execution.snapshot();
        match (&snapshot.state, &snapshot.error) {
            (ExecutionState::Errored, Some(err)) => self.logger.warn(
                "request failed",
                Some(&serde_json::json!({"request_id": snapshot.request_id, "error": err.message})),
            ),
            (state, _) => self.logger.info(
                "request finished",
                Some(&serde_json::json!({
                    "request_id": snapshot.request_id,
                    "state": state.as_str(),
                    "elapsed_ms": snapshot.elapsed_ms,
                })),
            ),
        }
        Ok(snapshot)
    }

    fn get(&self, request_id: &str) -> Result<Arc<Execution>, ToolError> {
        self.executions
            .get(request_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ToolError::not_found(format!("No execution for request {}", request_id)))
    }

    pub fn cancel(&self, request_id: &str) -> Result<ExecutionSnapshot, ToolError> {
        let execution = self.get(request_id)?;
        if !execution.cancel() {
            return Err(ToolError::conflict(format!(
                "Request {} is not in flight ({})",
                request_id,
                execution.state().as_str()
            )));
        }
        self.logger.info(
            "request cancelled",
            Some(&serde_json::json!({"request_id": request_id})),
        );
        Ok(execution.snapshot())
    }

    pub fn disconnect(&self, request_id: &str) -> Result<ExecutionSnapshot, ToolError> {
        let execution = self.get(request_id)?;
        if !execution.disconnect() {
            return Err(ToolError::conflict(format!(
                "Request {} is not connected ({})",
                request_id,
                execution.state().as_str()
            )));
        }
        self.logger.info(
            "stream disconnected",
            Some(&serde_json::json!({"request_id": request_id})),
        );
        Ok(execution.snapshot())
    }

    pub fn status(&self, request_id: &str) -> Option<ExecutionSnapshot> {
        self.executions
            .get(request_id)
            .map(|entry| entry.value().snapshot())
    }

    pub fn list(&self) -> Vec<ExecutionSnapshot> {
        let mut snapshots: Vec<ExecutionSnapshot> = self
            .executions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    /// Waits until the execution leaves Sending/Connected.
    pub async fn wait_until_finished(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<ExecutionSnapshot, ToolError> {
        let execution = self.get(request_id)?;
        let mut state_rx = execution.state_tx.subscribe();
        let wait = async {
            loop {
                if state_rx.borrow_and_update().is_terminal() {
                    return;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ToolError::timeout(format!("Request {} is still in flight", request_id)))?;
        Ok(execution.snapshot())
    }

    pub fn view(&self, request_id: &str, view: ResponseView) -> Result<Rendering, ToolError> {
        let snapshot = self
            .status(request_id)
            .ok_or_else(|| ToolError::not_found(format!("No execution for request {}", request_id)))?;
        match (&snapshot.response, view) {
            (Some(response), _) => Ok(presenter::render(response, &snapshot.timeline, view)),
            (None, ResponseView::Console) => Ok(Rendering::Text {
                text: snapshot.console().join("\n"),
            }),
            (None, _) => {
                let message = match snapshot.state {
                    ExecutionState::Cancelled => CANCELLED_MESSAGE.to_string(),
                    state => format!("Request {} has no response ({})", request_id, state.as_str()),
                };
                Err(ToolError::not_found(message).with_hint("Use the console view for the timeline."))
            }
        }
    }
}
