//! Command-line arguments.
//!
//! Every flag can also be set through its environment variable. Flags that
//! are given override the config file; the rest leave it alone.

use std::path::PathBuf;

use clap::Parser;

use crate::config::DaemonConfig;

/// signpost content-location node
#[derive(Parser, Debug, Default)]
#[command(name = "signpost", version, about = "signpost content-location node")]
pub struct Cli {
    /// Interface to listen on
    #[arg(long, env = "ADDRESS")]
    pub address: Option<String>,
    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    /// Store file holding key locations
    #[arg(long, env = "STORE")]
    pub store: Option<PathBuf>,
    /// Log signpost crates at debug level
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
    /// Config file (default: $SIGNPOST_DATA_DIR/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Address announced to peers instead of the bound address
    #[arg(long)]
    pub advertise: Option<String>,
}

impl Cli {
    /// Apply the given flags on top of `config`.
    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(address) = &self.address {
            config.network.address = address.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(store) = &self.store {
            config.store.path = store.display().to_string();
        }
        if self.debug {
            config.logging.debug = true;
        }
        if let Some(advertise) = &self.advertise {
            config.network.advertise_addr = advertise.clone();
        }
    }
}
