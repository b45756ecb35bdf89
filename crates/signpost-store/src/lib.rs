//! # signpost-store
//!
//! Persistent key → location table for a signpost node.
//!
//! Every entry maps a content key to either [`Location::Local`] (this node
//! holds the content) or [`Location::Peer`] (the listen address of a peer
//! that holds it, or knows more about it). The table doubles as the routing
//! table: [`Store::nearest_neighbor`] treats each `(key, peer)` pair as a
//! signpost toward peers that are likely to know about keys with a similar
//! fingerprint.
//!
//! ## File format
//!
//! The table lives in a single TOML file with one `[files]` table:
//!
//! ```toml
//! [files]
//! "song.mp3" = "local"
//! "paper.pdf" = "10.0.0.7:43210"
//! ```
//!
//! The file is rewritten on every mutation, under the same lock as the
//! in-memory change.

pub mod file;
pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use store::{fingerprint, Store};

/// Sentinel location string meaning "held by this node".
pub const LOCAL_SENTINEL: &str = "local";

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No entry, or no eligible neighbor, for the given key.
    #[error("not found: {0}")]
    NotFound(String),

    /// Reading or writing the store file failed.
    #[error("persistence failure on {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The store file exists but is not valid.
    #[error("malformed store file {path}: {detail}")]
    Format { path: String, detail: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Where the content for a key can be found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Location {
    /// Held by this node.
    Local,
    /// Held by (or reachable through) the peer listening at this address.
    Peer(String),
}

impl Location {
    /// Parse a location string; `"local"` is the only reserved value.
    pub fn parse(s: &str) -> Self {
        if s == LOCAL_SENTINEL {
            Location::Local
        } else {
            Location::Peer(s.to_string())
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Location::Local)
    }

    /// The peer address, if this is a peer location.
    pub fn peer(&self) -> Option<&str> {
        match self {
            Location::Local => None,
            Location::Peer(addr) => Some(addr),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Location::Local => LOCAL_SENTINEL,
            Location::Peer(addr) => addr,
        }
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        if s == LOCAL_SENTINEL {
            Location::Local
        } else {
            Location::Peer(s)
        }
    }
}

impl From<Location> for String {
    fn from(location: Location) -> Self {
        match location {
            Location::Local => LOCAL_SENTINEL.to_string(),
            Location::Peer(addr) => addr,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
