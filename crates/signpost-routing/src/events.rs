//! Node event broadcasting.
//!
//! Store mutations and search resolutions are published on an [`EventBus`]
//! so observers (the daemon's control socket, tests) can follow the node
//! without polling. Each subscriber has its own buffer; a slow subscriber
//! lags and loses the oldest events rather than blocking the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use signpost_store::Location;
use tokio::sync::broadcast;

use crate::engine::SearchOutcome;

/// An event emitted by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A store entry was inserted or replaced.
    StoreChanged { key: String, location: Location },
    /// A store entry was deleted.
    StoreRemoved { key: String },
    /// A search finished. `request_id` is `None` for local hits.
    SearchResolved {
        request_id: Option<String>,
        outcome: SearchOutcome,
    },
}

/// Event bus for broadcasting node events to subscribers.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: NodeEvent) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::EVENT_BUFFER)
    }
}
