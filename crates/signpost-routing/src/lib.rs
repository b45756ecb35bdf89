//! # signpost-routing
//!
//! Query routing for the signpost content-location overlay.
//!
//! This crate implements:
//! - The in-flight request tracker with per-request visited sets ([`tracker`])
//! - The routing state machine: local lookup, greedy forwarding to the
//!   nearest untried neighbor, backtracking on refusal, success propagation
//!   with route caching ([`engine`])
//! - The TCP accept loop that feeds inbound envelopes to the engine ([`server`])
//! - Store-change and search-outcome notifications ([`events`])
//! - Node assembly and shutdown ([`node`])
//!
//! ## Key Parameters
//!
//! | Parameter | Default |
//! |---|---|
//! | Outbound connect + write timeout | 5 seconds |
//! | Reply deadline per forwarded query | 10 seconds |
//! | Budget handed to the queried peer | 3/4 of the reply deadline |
//! | Shortest window a relay still forwards with | 20 ms |
//! | Resolved request retention | 5 minutes |
//! | Idle request expiry | 10 minutes |
//! | Sweep interval | 30 seconds |

pub mod engine;
pub mod events;
pub mod node;
pub mod outbound;
pub mod server;
pub mod tracker;

use std::time::Duration;

pub use engine::{Engine, SearchHandle, SearchOutcome};
pub use events::{EventBus, NodeEvent};
pub use node::{Node, NodeConfig};
pub use outbound::{PeerSender, TcpSender};
pub use server::ConnectionServer;
pub use tracker::{RequestState, RequestTracker, Resolution, TrackedRequest};

/// Outbound connect + write timeout in milliseconds.
pub const SEND_TIMEOUT_MS: u64 = 5_000;

/// How long a forwarded query may go unanswered before backtracking, in milliseconds.
pub const REPLY_TIMEOUT_MS: u64 = 10_000;

/// Shortest reply window worth forwarding a relayed query with, in milliseconds.
/// A relaying node with less budget left refuses instead.
pub const MIN_REPLY_WINDOW_MS: u64 = 20;

/// How long resolved requests are kept to refuse late duplicates, in seconds.
pub const RESOLVED_TTL_SECS: u64 = 300;

/// How long an unresolved request may sit idle before it is dropped, in seconds.
pub const PENDING_TTL_SECS: u64 = 600;

/// Interval between tracker sweeps in seconds.
pub const SWEEP_INTERVAL_SECS: u64 = 30;

/// Event bus buffer capacity.
pub const EVENT_BUFFER: usize = 1000;

/// Timing knobs for the routing engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingConfig {
    pub send_timeout: Duration,
    pub reply_timeout: Duration,
    pub resolved_ttl: Duration,
    pub pending_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_millis(SEND_TIMEOUT_MS),
            reply_timeout: Duration::from_millis(REPLY_TIMEOUT_MS),
            resolved_ttl: Duration::from_secs(RESOLVED_TTL_SECS),
            pending_ttl: Duration::from_secs(PENDING_TTL_SECS),
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
        }
    }
}

/// Error types for routing operations.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// Store lookup or persistence failed.
    #[error("store error: {0}")]
    Store(#[from] signpost_store::StoreError),

    /// Encoding, decoding or sending an envelope failed.
    #[error("transport error: {0}")]
    Transport(#[from] signpost_transport::TransportError),

    /// A reply references a request this node does not track.
    #[error("unknown request {0}")]
    UnknownRequest(String),

    /// Listener setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;
