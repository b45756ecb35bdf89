//! Integration test harness for signpost.
//!
//! The tests under `tests/` start several real nodes on loopback ports and
//! let them route queries to each other over TCP. [`TestNode`] wraps one
//! node with its own temporary store.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p signpost-integration-tests
//! ```

use std::sync::Arc;
use std::time::Duration;

use signpost_routing::{Engine, Node, NodeConfig, RoutingConfig, SearchOutcome};
use signpost_store::Location;
use tokio::net::TcpListener;

/// Upper bound for any single search in these tests.
pub const SEARCH_DEADLINE: Duration = Duration::from_secs(10);

/// Routing timers short enough for tests.
pub fn fast_routing() -> RoutingConfig {
    RoutingConfig {
        send_timeout: Duration::from_secs(2),
        reply_timeout: Duration::from_secs(3),
        ..RoutingConfig::default()
    }
}

/// A running node with a private store directory.
pub struct TestNode {
    node: Node,
    _dir: tempfile::TempDir,
}

impl TestNode {
    pub async fn start() -> Self {
        Self::start_with(fast_routing()).await
    }

    pub async fn start_with(routing: RoutingConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = Node::start(NodeConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            store_path: dir.path().join("warehouse.toml"),
            advertise_addr: None,
            routing,
        })
        .await
        .expect("start node");
        Self { node, _dir: dir }
    }

    /// Address peers reach this node at.
    pub fn addr(&self) -> String {
        self.node.engine().local_addr().to_string()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        self.node.engine()
    }

    pub fn hold(&self, key: &str) {
        self.engine().put(key, Location::Local).expect("put local");
    }

    /// Add a signpost: `key` is reachable through `addr`.
    pub fn point(&self, key: &str, addr: &str) {
        self.engine()
            .put(key, Location::Peer(addr.to_string()))
            .expect("put peer");
    }

    pub fn location(&self, key: &str) -> Option<Location> {
        self.engine().get(key)
    }

    /// Search and wait for the outcome.
    pub async fn search(&self, key: &str) -> SearchOutcome {
        let handle = self.engine().search(key).await;
        tokio::time::timeout(SEARCH_DEADLINE, handle.outcome())
            .await
            .expect("search finished in time")
    }

    pub async fn shutdown(self) {
        self.node.shutdown().await;
    }
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}
