//! Node status and lifecycle.

use std::sync::Arc;

use super::Result;
use crate::DaemonState;

/// Summary of the running node.
pub async fn status(state: &Arc<DaemonState>) -> Result {
    let engine = &state.engine;
    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "address": engine.local_addr(),
        "store_path": engine.store().path().display().to_string(),
        "control_socket": state.config.socket_path().display().to_string(),
        "entries": engine.store().len(),
        "tracked_requests": engine.tracker().len(),
        "events_emitted": engine.events().sequence(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// Ask the daemon to stop.
pub async fn shutdown(state: &Arc<DaemonState>) -> Result {
    let _ = state.shutdown.send(true);
    Ok(serde_json::json!({"status": "shutting_down"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::TestDaemon;

    #[tokio::test]
    async fn test_status() {
        let daemon = TestDaemon::start().await;
        let result = status(&daemon.state).await.expect("status");
        assert_eq!(result["address"], daemon.node.local_addr().to_string());
        assert_eq!(result["entries"], 0);
        assert_eq!(result["tracked_requests"], 0);
    }

    #[tokio::test]
    async fn test_shutdown_signals() {
        let mut daemon = TestDaemon::start().await;
        shutdown(&daemon.state).await.expect("shutdown");
        daemon.shutdown_rx.changed().await.expect("changed");
        assert!(*daemon.shutdown_rx.borrow());
    }
}
