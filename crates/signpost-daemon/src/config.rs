//! Configuration file management.
//!
//! The daemon reads `config.toml` from its data directory (or the path given
//! with `--config`). Every section and field is optional; command-line flags
//! and environment variables override whatever the file says.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use signpost_routing::{NodeConfig, RoutingConfig};

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "SIGNPOST_DATA_DIR";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub routing: RoutingSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface to listen on.
    #[serde(default = "default_address")]
    pub address: String,
    /// 0 = OS-assigned ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address announced to peers. Empty = the bound address.
    #[serde(default)]
    pub advertise_addr: String,
    /// Control socket path. Empty = `$data_dir/signpost.sock`.
    #[serde(default)]
    pub control_socket: String,
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store file. Relative paths resolve against the working directory.
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Routing timers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSettings {
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_resolved_ttl_secs")]
    pub resolved_ttl_secs: u64,
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log signpost crates at debug level.
    #[serde(default)]
    pub debug: bool,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub log_file: String,
}

// Default value functions

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    43210
}

fn default_store_path() -> String {
    "warehouse.toml".to_string()
}

fn default_send_timeout_ms() -> u64 {
    signpost_routing::SEND_TIMEOUT_MS
}

fn default_reply_timeout_ms() -> u64 {
    signpost_routing::REPLY_TIMEOUT_MS
}

fn default_resolved_ttl_secs() -> u64 {
    signpost_routing::RESOLVED_TTL_SECS
}

fn default_pending_ttl_secs() -> u64 {
    signpost_routing::PENDING_TTL_SECS
}

fn default_sweep_interval_secs() -> u64 {
    signpost_routing::SWEEP_INTERVAL_SECS
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            advertise_addr: String::new(),
            control_socket: String::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            data_dir: String::new(),
        }
    }
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            resolved_ttl_secs: default_resolved_ttl_secs(),
            pending_ttl_secs: default_pending_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RoutingSettings {
    pub fn to_routing_config(&self) -> RoutingConfig {
        RoutingConfig {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            resolved_ttl: Duration::from_secs(self.resolved_ttl_secs),
            pending_ttl: Duration::from_secs(self.pending_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::config_path();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.store.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.store.data_dir)
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        if self.network.control_socket.is_empty() {
            self.data_dir().join("signpost.sock")
        } else {
            PathBuf::from(&self.network.control_socket)
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.address, self.network.port)
    }

    /// Settings for [`signpost_routing::Node::start`].
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            listen_addr: self.listen_addr(),
            store_path: PathBuf::from(&self.store.path),
            advertise_addr: Some(self.network.advertise_addr.clone()).filter(|a| !a.is_empty()),
            routing: self.routing.to_routing_config(),
        }
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Signpost")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".signpost")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/signpost"))
}
