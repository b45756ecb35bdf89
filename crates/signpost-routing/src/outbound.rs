//! Outbound message delivery.
//!
//! The engine hands every outgoing envelope to a [`PeerSender`]. Production
//! nodes use [`TcpSender`], which opens one connection per message; tests
//! substitute a recorder.

use std::future::Future;
use std::time::Duration;

use signpost_transport::tcp::send_envelope;
use signpost_transport::{Envelope, TransportError};
use tokio::sync::watch;

/// Delivers envelopes to peers.
pub trait PeerSender: Send + Sync + 'static {
    /// Deliver `envelope` to the peer listening at `peer`.
    ///
    /// `Ok` means the envelope was handed to the peer, not that it was
    /// processed.
    fn send(
        &self,
        peer: &str,
        envelope: Envelope,
    ) -> impl Future<Output = signpost_transport::Result<()>> + Send;
}

/// Sends each envelope over a fresh TCP connection.
#[derive(Debug, Clone)]
pub struct TcpSender {
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl TcpSender {
    /// `timeout` bounds connect plus write. Once `shutdown` reads `true`,
    /// every send fails with [`TransportError::ShuttingDown`].
    pub fn new(timeout: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self { timeout, shutdown }
    }
}

impl PeerSender for TcpSender {
    async fn send(&self, peer: &str, envelope: Envelope) -> signpost_transport::Result<()> {
        if *self.shutdown.borrow() {
            return Err(TransportError::ShuttingDown);
        }
        send_envelope(peer, &envelope, self.timeout).await
    }
}
