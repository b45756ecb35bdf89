//! Control socket command handlers.

pub mod diagnostics;
pub mod search;
pub mod store;

use serde_json::Value;

use crate::rpc::RpcError;

type Result = std::result::Result<Value, RpcError>;

/// Required string parameter.
fn str_param<'a>(params: &'a Value, name: &str) -> std::result::Result<&'a str, RpcError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} required")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Instant;

    use signpost_routing::Node;
    use tokio::sync::watch;

    use crate::config::DaemonConfig;
    use crate::DaemonState;

    /// A node on an ephemeral port with daemon state around it.
    pub(crate) struct TestDaemon {
        pub dir: tempfile::TempDir,
        pub node: Node,
        pub state: Arc<DaemonState>,
        pub shutdown_rx: watch::Receiver<bool>,
    }

    impl TestDaemon {
        pub(crate) async fn start() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let mut config = DaemonConfig::default();
            config.network.port = 0;
            config.store.data_dir = dir.path().display().to_string();
            config.store.path = dir.path().join("warehouse.toml").display().to_string();

            let node = Node::start(config.node_config())
                .await
                .expect("start node");
            let (shutdown, shutdown_rx) = watch::channel(false);
            let state = Arc::new(DaemonState {
                engine: Arc::clone(node.engine()),
                config,
                started_at: Instant::now(),
                shutdown,
            });
            Self {
                dir,
                node,
                state,
                shutdown_rx,
            }
        }
    }
}
