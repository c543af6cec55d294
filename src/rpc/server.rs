use crate::app::App;
use crate::errors::{ErrorCode, RpcError, ToolError};
use crate::rpc::catalog::{tool_catalog, validate_tool_args};
use crate::rpc::protocol::{tool_result, JsonRpcRequest, JsonRpcResponse, ToolCall};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "reqflow";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Line-delimited JSON-RPC 2.0 front end over the tool executor.
///
/// `tools/call` requests run concurrently so a long `send` does not block
/// the `cancel` that targets it. Responses are written in completion order.
#[derive(Clone)]
pub struct RpcServer {
    app: Arc<App>,
}

enum Incoming {
    Reply(Option<JsonRpcResponse>),
    Call {
        id: Value,
        name: String,
        args: Value,
    },
}

impl RpcServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"list": true, "call": true}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
        })
    }

    fn handle_tools_list(&self) -> Value {
        serde_json::json!({ "tools": tool_catalog() })
    }

    async fn handle_tools_call(&self, name: &str, args: Value) -> Result<Value, RpcError> {
        validate_tool_args(name, &args)?;
        let result = self
            .app
            .tool_executor
            .execute(name, args)
            .await
            .map_err(|err: ToolError| RpcError::from_tool_error(name, &err))?;
        Ok(tool_result(result))
    }

    fn classify(&self, line: &str) -> Incoming {
        let request = match JsonRpcRequest::parse(line) {
            Ok(request) => request,
            Err(err) => return Incoming::Reply(Some(JsonRpcResponse::failure(None, err))),
        };
        let Some(id) = request.id.clone() else {
            // Notifications never get a reply.
            return Incoming::Reply(None);
        };
        let reply = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.handle_initialize()),
            "tools/list" => JsonRpcResponse::success(id, self.handle_tools_list()),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            m if m.starts_with("notifications/") => {
                JsonRpcResponse::success(id, serde_json::json!({}))
            }
            "tools/call" => match request.tool_call() {
                Ok(ToolCall { name, arguments }) => {
                    return Incoming::Call {
                        id,
                        name,
                        args: arguments,
                    }
                }
                Err(err) => JsonRpcResponse::failure(Some(id), err),
            },
            other => JsonRpcResponse::failure(
                Some(id),
                RpcError::new(ErrorCode::MethodNotFound, format!("Method not found: {}", other)),
            ),
        };
        Incoming::Reply(Some(reply))
    }

    async fn call(&self, id: Value, name: String, args: Value) -> JsonRpcResponse {
        match self.handle_tools_call(&name, args).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(Some(id), err),
        }
    }

    /// Handles one line to completion. Returns `None` for notifications and
    /// blank lines.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match self.classify(trimmed) {
            Incoming::Reply(reply) => reply,
            Incoming::Call { id, name, args } => Some(self.call(id, name, args).await),
        }
    }

    pub async fn run<R, W>(&self, input: R, output: W) -> Result<(), ToolError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(async move {
            let mut writer = BufWriter::new(output);
            while let Some(response) = rx.recv().await {
                let payload = serde_json::to_string(&response).unwrap_or_default();
                writer.write_all(payload.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut calls = JoinSet::new();
        let mut reader = BufReader::new(input).lines();
        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|err| ToolError::internal(err.to_string()))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match self.classify(trimmed) {
                Incoming::Reply(Some(reply)) => {
                    let _ = tx.send(reply);
                }
                Incoming::Reply(None) => {}
                Incoming::Call { id, name, args } => {
                    let server = self.clone();
                    let tx = tx.clone();
                    calls.spawn(async move {
                        let response = server.call(id, name, args).await;
                        let _ = tx.send(response);
                    });
                }
            }
            while calls.try_join_next().is_some() {}
        }

        while calls.join_next().await.is_some() {}
        drop(tx);
        writer_task
            .await
            .map_err(|err| ToolError::internal(err.to_string()))?
            .map_err(ToolError::from)
    }
}

pub async fn run_stdio() -> Result<(), ToolError> {
    let app = Arc::new(App::initialize()?);
    let server = RpcServer::new(app);
    server.run(tokio::io::stdin(), tokio::io::stdout()).await
}
