//! Inbound connection handling.
//!
//! The accept loop hands every connection to its own task. A connection
//! carries one or more frames; each frame is decoded to an envelope and
//! passed to the engine in arrival order. Anything malformed is a protocol
//! violation that closes that connection and nothing else.

use std::net::SocketAddr;
use std::sync::Arc;

use signpost_transport::tcp::read_frame;
use signpost_transport::wire::MAX_FRAME_SIZE;
use signpost_transport::Envelope;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::outbound::PeerSender;
use crate::Result;

/// TCP listener feeding a routing [`Engine`].
#[derive(Debug)]
pub struct ConnectionServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ConnectionServer {
    /// Bind to `addr` (`host:port`; port 0 picks a free port).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening for peers");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Connections already accepted keep running until their peer closes.
    pub async fn run<S: PeerSender>(
        self,
        engine: Arc<Engine<S>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "peer connected");
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move {
                            handle_connection(engine, stream, remote).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!(local_addr = %self.local_addr, "accept loop stopped");
    }
}

async fn handle_connection<S: PeerSender>(
    engine: Arc<Engine<S>>,
    mut stream: TcpStream,
    remote: SocketAddr,
) {
    loop {
        let frame = match read_frame(&mut stream, MAX_FRAME_SIZE).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(%remote, error = %e, "protocol violation, closing connection");
                break;
            }
        };

        let envelope = match Envelope::from_bytes(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%remote, error = %e, "protocol violation, closing connection");
                break;
            }
        };

        if let Err(e) = engine.handle_envelope(envelope).await {
            warn!(%remote, error = %e, "protocol violation, closing connection");
            break;
        }
    }
    debug!(%remote, "peer disconnected");
}
