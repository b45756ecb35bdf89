//! Key search.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use signpost_routing::SearchOutcome;

use super::{str_param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// How long `search` waits for an answer unless the caller says otherwise.
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 60_000;

/// Search for a key, locally and then through the overlay.
///
/// If no answer arrives within `timeout_ms` the search keeps running and
/// the call returns `"pending"`; its outcome is still published to event subscribers.
pub async fn search(state: &Arc<DaemonState>, params: &Value) -> Result {
    let key = str_param(params, "key")?;
    let timeout_ms = match params.get("timeout_ms") {
        None | Some(Value::Null) => DEFAULT_SEARCH_TIMEOUT_MS,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| RpcError::invalid_params("timeout_ms must be a non-negative integer"))?,
    };

    let handle = state.engine.search(key).await;
    let request_id = handle.request_id().map(str::to_string);

    match tokio::time::timeout(Duration::from_millis(timeout_ms), handle.outcome()).await {
        Ok(SearchOutcome::Found { key, location }) => Ok(serde_json::json!({
            "status": "found",
            "key": key,
            "location": location,
            "request_id": request_id,
        })),
        Ok(SearchOutcome::NotFound { key }) => Err(RpcError::not_found(&key)),
        Err(_) => Ok(serde_json::json!({
            "status": "pending",
            "key": key,
            "request_id": request_id,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::TestDaemon;
    use signpost_store::Location;

    #[tokio::test]
    async fn test_local_hit() {
        let daemon = TestDaemon::start().await;
        daemon
            .state
            .engine
            .put("doc", Location::Local)
            .expect("put");

        let result = search(&daemon.state, &serde_json::json!({"key": "doc"}))
            .await
            .expect("search");
        assert_eq!(result["status"], "found");
        assert_eq!(result["location"], "local");
        assert!(result["request_id"].is_null());
    }

    #[tokio::test]
    async fn test_no_neighbors_is_not_found() {
        let daemon = TestDaemon::start().await;
        let err = search(&daemon.state, &serde_json::json!({"key": "ghost"}))
            .await
            .expect_err("not found");
        assert_eq!(err.code, -32004);
    }

    #[tokio::test]
    async fn test_silent_neighbor_is_pending() {
        let daemon = TestDaemon::start().await;
        // Accepts connections but never answers.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let silent_addr = silent.local_addr().expect("addr").to_string();
        daemon
            .state
            .engine
            .put("neighbor", Location::Peer(silent_addr))
            .expect("put");

        let result = search(
            &daemon.state,
            &serde_json::json!({"key": "elsewhere", "timeout_ms": 50}),
        )
        .await
        .expect("search");
        assert_eq!(result["status"], "pending");
        assert!(result["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_bad_params() {
        let daemon = TestDaemon::start().await;
        let err = search(&daemon.state, &serde_json::json!({}))
            .await
            .expect_err("no key");
        assert_eq!(err.code, -32602);
        let err = search(&daemon.state, &serde_json::json!({"key": "k", "timeout_ms": "soon"}))
            .await
            .expect_err("bad timeout");
        assert_eq!(err.code, -32602);
    }
}
