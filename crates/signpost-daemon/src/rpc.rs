//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC 2.0 calls to the command handlers. A
//! `subscribe` call turns the connection into a one-way stream of node
//! events, sent as `event` notifications.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated message without an ID.
#[derive(Debug, Serialize)]
pub struct RpcNotification<'a, T: Serialize> {
    pub jsonrpc: &'a str,
    pub method: &'a str,
    pub params: T,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Key not found (-32004).
    pub fn not_found(key: &str) -> Self {
        Self {
            code: -32004,
            message: "NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"key": key})),
        }
    }
}

/// The control socket server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(socket = %self.socket_path.display(), "control socket listening");

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!(error = %e, "control connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "control socket accept failed");
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(response) => {
                write_line(&mut writer, &response).await?;
                continue;
            }
        };

        if request.method == "subscribe" {
            let events = state.engine.events().subscribe();
            let response = RpcResponse::success(
                request.id,
                serde_json::json!({"subscribed": true, "sequence": state.engine.events().sequence()}),
            );
            write_line(&mut writer, &response).await?;
            return stream_events(events, &mut writer).await;
        }

        let response = dispatch_request(state.clone(), request).await;
        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

fn parse_request(line: &str) -> Result<RpcRequest, RpcResponse> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|_| RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()))?;
    let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let request: RpcRequest = serde_json::from_value(value)
        .map_err(|_| RpcResponse::error(id.clone(), RpcError::invalid_request()))?;
    if request.jsonrpc != "2.0" {
        return Err(RpcResponse::error(id, RpcError::invalid_request()));
    }
    Ok(request)
}

async fn stream_events<W: AsyncWrite + Unpin>(
    mut events: tokio::sync::broadcast::Receiver<signpost_routing::NodeEvent>,
    writer: &mut W,
) -> anyhow::Result<()> {
    loop {
        match events.recv().await {
            Ok(event) => {
                let notification = RpcNotification {
                    jsonrpc: "2.0",
                    method: "event",
                    params: event,
                };
                write_line(writer, &notification).await?;
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "event subscriber lagging");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();

    debug!(%method, "dispatching control request");

    let result = match method {
        // Store
        "get" => commands::store::get(&state, &request.params).await,
        "put" => commands::store::put(&state, &request.params).await,
        "remove" => commands::store::remove(&state, &request.params).await,
        "list" => commands::store::list(&state).await,

        // Search
        "search" => commands::search::search(&state, &request.params).await,

        // Diagnostics
        "status" => commands::diagnostics::status(&state).await,
        "shutdown" => commands::diagnostics::shutdown(&state).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixStream;

    use crate::commands::test_support::TestDaemon;

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(RpcError::parse_error().code, -32700);
        assert_eq!(RpcError::invalid_request().code, -32600);

        let err = RpcError::method_not_found("unknown");
        assert_eq!(err.code, -32601);

        let err = RpcError::not_found("movie");
        assert_eq!(err.code, -32004);
        assert_eq!(err.message, "NOT_FOUND");
    }

    #[test]
    fn test_rpc_response_shape() {
        let resp = RpcResponse::success(serde_json::json!(1), serde_json::json!({"count": 0}));
        let json = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"count": 0}})
        );

        let resp = RpcResponse::error(serde_json::json!(2), RpcError::internal_error("test"));
        let json = serde_json::to_value(&resp).expect("serialize");
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], -32603);
    }

    #[test]
    fn test_parse_request_errors() {
        let err = parse_request("{nope").expect_err("parse error");
        assert_eq!(err.error.expect("error").code, -32700);

        let err = parse_request(r#"{"jsonrpc":"1.0","id":3,"method":"list"}"#)
            .expect_err("wrong version");
        assert_eq!(err.id, serde_json::json!(3));
        assert_eq!(err.error.expect("error").code, -32600);

        let err = parse_request(r#"{"jsonrpc":"2.0","id":4}"#).expect_err("no method");
        assert_eq!(err.error.expect("error").code, -32600);

        let req = parse_request(r#"{"jsonrpc":"2.0","id":5,"method":"list"}"#).expect("valid");
        assert_eq!(req.method, "list");
        assert!(req.params.is_null());
    }

    async fn call(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        writer: &mut tokio::net::unix::OwnedWriteHalf,
        request: serde_json::Value,
    ) -> serde_json::Value {
        write_line(writer, &request).await.expect("write");
        let line = lines.next_line().await.expect("read").expect("line");
        serde_json::from_str(&line).expect("json")
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let daemon = TestDaemon::start().await;
        let socket_path = daemon.dir.path().join("control.sock");
        let server = RpcServer::new(daemon.state.clone(), socket_path.clone());
        let task = tokio::spawn(async move { server.run().await });

        // Wait for the socket to appear.
        let stream = loop {
            match UnixStream::connect(&socket_path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let resp = call(
            &mut lines,
            &mut writer,
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "put", "params": {"key": "doc", "location": "local"}}),
        )
        .await;
        assert_eq!(resp["id"], 1);
        assert!(resp.get("error").is_none(), "put failed: {resp}");

        let resp = call(
            &mut lines,
            &mut writer,
            serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "search", "params": {"key": "doc"}}),
        )
        .await;
        assert_eq!(resp["result"]["status"], "found");
        assert_eq!(resp["result"]["location"], "local");

        let resp = call(
            &mut lines,
            &mut writer,
            serde_json::json!({"jsonrpc": "2.0", "id": 3, "method": "frobnicate"}),
        )
        .await;
        assert_eq!(resp["error"]["code"], -32601);

        writer.write_all(b"not json\n").await.expect("write");
        let line = lines.next_line().await.expect("read").expect("line");
        let resp: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(resp["error"]["code"], -32700);

        task.abort();
    }

    #[tokio::test]
    async fn test_subscribe_streams_store_changes() {
        let daemon = TestDaemon::start().await;
        let socket_path = daemon.dir.path().join("events.sock");
        let server = RpcServer::new(daemon.state.clone(), socket_path.clone());
        let task = tokio::spawn(async move { server.run().await });

        let stream = loop {
            match UnixStream::connect(&socket_path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let resp = call(
            &mut lines,
            &mut writer,
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "subscribe"}),
        )
        .await;
        assert_eq!(resp["result"]["subscribed"], true);

        daemon
            .state
            .engine
            .put("song", signpost_store::Location::Local)
            .expect("put");

        let line = lines.next_line().await.expect("read").expect("line");
        let note: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(note["method"], "event");
        assert!(note.get("id").is_none());
        assert_eq!(note["params"]["event"], "store_changed");
        assert_eq!(note["params"]["key"], "song");

        task.abort();
    }
}
