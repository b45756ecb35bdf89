//! Node assembly.
//!
//! A [`Node`] binds the listener, opens the store, builds the engine with
//! the address peers should use, and runs the accept loop and the request
//! sweeper in the background until [`Node::shutdown`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use signpost_store::Store;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::engine::Engine;
use crate::events::EventBus;
use crate::outbound::TcpSender;
use crate::server::ConnectionServer;
use crate::{Result, RoutingConfig};

/// Everything needed to start a node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// `host:port` to listen on.
    pub listen_addr: String,
    /// Store file; created if missing.
    pub store_path: PathBuf,
    /// Address announced as `sender_id`. Defaults to the bound address.
    pub advertise_addr: Option<String>,
    pub routing: RoutingConfig,
}

/// A running node.
#[derive(Debug)]
pub struct Node {
    engine: Arc<Engine>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Open the store at `config.store_path` and start.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        let store = Store::open(&config.store_path)?;
        Self::start_with_store(config, Arc::new(store)).await
    }

    /// Start around an already opened store.
    pub async fn start_with_store(config: NodeConfig, store: Arc<Store>) -> Result<Self> {
        let server = ConnectionServer::bind(&config.listen_addr).await?;
        let local_addr = server.local_addr();
        let self_addr = config
            .advertise_addr
            .clone()
            .unwrap_or_else(|| local_addr.to_string());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let sender = TcpSender::new(config.routing.send_timeout, shutdown_rx.clone());
        let engine = Arc::new(Engine::new(
            store,
            sender,
            self_addr.clone(),
            config.routing,
            EventBus::default(),
        ));

        let tasks = vec![
            tokio::spawn(server.run(Arc::clone(&engine), shutdown_rx.clone())),
            tokio::spawn(Arc::clone(&engine).run_sweeper(shutdown_rx)),
        ];

        info!(%local_addr, %self_addr, entries = engine.store().len(), "node started");
        Ok(Self {
            engine,
            local_addr,
            shutdown,
            tasks,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The bound listener address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, stop sending, and wait for background tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!(local_addr = %self.local_addr, "node stopped");
    }
}
