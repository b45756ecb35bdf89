//! Store inspection and editing.

use std::sync::Arc;

use serde_json::Value;
use signpost_store::Location;

use super::{str_param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Look up one key.
pub async fn get(state: &Arc<DaemonState>, params: &Value) -> Result {
    let key = str_param(params, "key")?;
    match state.engine.get(key) {
        Some(location) => Ok(serde_json::json!({"key": key, "location": location})),
        None => Err(RpcError::not_found(key)),
    }
}

/// Insert or replace an entry. `location` is `"local"` or a `host:port`.
pub async fn put(state: &Arc<DaemonState>, params: &Value) -> Result {
    let key = str_param(params, "key")?;
    let raw = str_param(params, "location")?;
    let location = Location::parse(raw);
    if let Location::Peer(addr) = &location {
        if !is_peer_address(addr) {
            return Err(RpcError::invalid_params("location must be \"local\" or host:port"));
        }
    }

    state
        .engine
        .put(key, location.clone())
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    Ok(serde_json::json!({"key": key, "location": location}))
}

/// Delete an entry.
pub async fn remove(state: &Arc<DaemonState>, params: &Value) -> Result {
    let key = str_param(params, "key")?;
    match state
        .engine
        .remove(key)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?
    {
        Some(previous) => Ok(serde_json::json!({"key": key, "location": previous})),
        None => Err(RpcError::not_found(key)),
    }
}

/// Every entry, ordered by key.
pub async fn list(state: &Arc<DaemonState>) -> Result {
    let entries = state.engine.store_snapshot();
    Ok(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
    }))
}

fn is_peer_address(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
