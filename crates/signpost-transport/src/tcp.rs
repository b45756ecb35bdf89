//! Length-prefixed framing and per-message TCP connections.
//!
//! Wire format of one frame: `[length:4 LE][data:length]`.
//!
//! A connection may carry any number of frames; a reader keeps reading until
//! the peer closes the connection at a frame boundary.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::wire::{Envelope, MAX_FRAME_SIZE};
use crate::TransportError;

/// Write one frame.
///
/// # Errors
///
/// Returns [`TransportError::ProtocolViolation`] if `data` is larger than
/// [`MAX_FRAME_SIZE`], or [`TransportError::Io`] if the write fails.
pub async fn write_frame<W>(stream: &mut W, data: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_SIZE {
        return Err(TransportError::ProtocolViolation(format!(
            "frame length {} exceeds maximum {MAX_FRAME_SIZE}",
            data.len()
        )));
    }
    let len = u32::try_from(data.len()).map_err(|_| {
        TransportError::ProtocolViolation("frame too large for 4-byte length prefix".to_string())
    })?;
    stream
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    stream
        .write_all(data)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the connection before the next
/// length prefix.
///
/// # Errors
///
/// Returns [`TransportError::ProtocolViolation`] if the announced length
/// exceeds `max_size` or the connection closes inside the length prefix, or [`TransportError::Io`] if the stream fails or ends
/// in the middle of a frame.
pub async fn read_frame<R>(stream: &mut R, max_size: usize) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = stream
            .read(&mut len_buf[filled..])
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::ProtocolViolation(format!(
                "truncated length prefix: connection closed after {filled} of 4 bytes"
            )));
        }
        filled += n;
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > max_size {
        return Err(TransportError::ProtocolViolation(format!(
            "frame length {len} exceeds maximum {max_size}"
        )));
    }

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| TransportError::Io(format!("truncated frame: {e}")))?;
    Ok(Some(buf))
}

/// Open a connection to `peer`, send one envelope, and close.
///
/// Connect and write together must finish within `timeout`.
///
/// # Errors
///
/// Returns [`TransportError::Connection`] if the peer cannot be reached,
/// [`TransportError::Timeout`] if the deadline passes, or the encoding and
/// I/O errors of [`Envelope::to_bytes`] and [`write_frame`].
pub async fn send_envelope(
    peer: &str,
    envelope: &Envelope,
    timeout: Duration,
) -> Result<(), TransportError> {
    let bytes = envelope.to_bytes()?;

    let exchange = async {
        let mut stream =
            TcpStream::connect(peer)
                .await
                .map_err(|e| TransportError::Connection {
                    peer: peer.to_string(),
                    detail: e.to_string(),
                })?;
        write_frame(&mut stream, &bytes).await?;
        stream
            .shutdown()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok::<_, TransportError>(())
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            peer: peer.to_string(),
            millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }?;

    tracing::debug!(%peer, kind = %envelope.kind, "envelope sent");
    Ok(())
}
