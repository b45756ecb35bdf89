//! signpost-daemon: a signpost content-location node.
//!
//! Single OS process running a Tokio async runtime. The node talks to peers
//! over TCP; operators and scripts drive it through JSON-RPC over a Unix
//! socket.

mod cli;
mod commands;
mod config;
mod rpc;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use clap::Parser;
use signpost_routing::{Engine, Node};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::{DaemonConfig, LoggingConfig};
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Routing engine of the running node.
    pub engine: Arc<Engine>,
    /// Effective configuration (file plus flags).
    pub config: DaemonConfig,
    pub started_at: Instant,
    /// Shutdown signal sender.
    pub shutdown: watch::Sender<bool>,
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let directive = if logging.debug {
        "signpost=debug"
    } else {
        "signpost=info"
    };
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    if logging.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.log_file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Load config, then let flags and env vars override it
    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    init_tracing(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "signpost daemon starting");

    // 2. Ensure data directory exists
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 3. Start the node
    let node = Node::start(config.node_config()).await?;
    info!(
        address = %node.engine().local_addr(),
        store = %config.store.path,
        "node ready"
    );

    // 4. Build daemon state
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let socket_path = config.socket_path();
    let state = Arc::new(DaemonState {
        engine: Arc::clone(node.engine()),
        config,
        started_at: Instant::now(),
        shutdown: shutdown_tx,
    });

    // 5. Run the control socket until shutdown
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "control socket failed");
            }
        }
        _ = shutdown_rx.changed() => {
            info!("shutdown requested over control socket");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    node.shutdown().await;
    let _ = std::fs::remove_file(&socket_path);

    info!("daemon stopped");
    Ok(())
}
