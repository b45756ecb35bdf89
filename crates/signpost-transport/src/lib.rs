//! # signpost-transport
//!
//! Wire protocol and TCP plumbing for signpost peers.
//!
//! - **Message payloads** (query, found, not-found) via [`messages`]
//! - **Envelope** carrying type, payload and the sender's listen address via [`wire`]
//! - **Framing and per-message connections** over TCP via [`tcp`]
//!
//! ## Architecture
//!
//! ```text
//! Message (messages.rs)   -- typed payload: request / positive / negative
//!     |
//!     v
//! Envelope (wire.rs)      -- JSON { type, data, sender_id }
//!     |
//!     v
//! frame (tcp.rs)          -- [length:4 LE][json]
//!     |
//!     v
//! TCP connection          -- one connection per outbound message
//! ```
//!
//! Peers never answer on the socket a message arrived on. An answer is a new
//! message on a new connection to the sender's advertised address.

pub mod messages;
pub mod tcp;
pub mod wire;

pub use messages::{Found, Message, MessageKind, NotFound, Query};
pub use wire::Envelope;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// JSON deserialization error (malformed envelope or payload).
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (oversized frame, payload not matching its type).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Could not reach the peer.
    #[error("connection error to {peer}: {detail}")]
    Connection { peer: String, detail: String },

    /// I/O error on an established connection.
    #[error("I/O error: {0}")]
    Io(String),

    /// Connect or write did not complete in time.
    #[error("timed out after {millis} ms sending to {peer}")]
    Timeout { peer: String, millis: u64 },

    /// The node is shutting down and no longer sends.
    #[error("transport is shutting down")]
    ShuttingDown,
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
