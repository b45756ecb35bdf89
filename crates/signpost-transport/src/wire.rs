//! Message envelope for the signpost wire protocol.
//!
//! Every message exchanged between peers is wrapped in an [`Envelope`]. The
//! envelope is JSON-serialized and sent as one frame (see [`crate::tcp`]).
//!
//! ## Wire format
//!
//! ```text
//! Envelope {
//!     type:      "request" | "positive" | "negative",
//!     data:      { ...payload matching type... },
//!     sender_id: "host:port",   // sender's own listen address
//! }
//! ```
//!
//! `sender_id` is both the sender's identity and the address answers go to.

use serde::{Deserialize, Serialize};

use crate::messages::{Message, MessageKind};
use crate::TransportError;

/// Maximum encoded envelope size (to prevent allocation attacks).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol message envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Which payload `data` holds.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// JSON payload.
    pub data: serde_json::Value,
    /// Listen address of the sender.
    pub sender_id: String,
}

impl Envelope {
    /// Wrap a typed message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn new(msg: &Message, sender_id: impl Into<String>) -> Result<Self, TransportError> {
        let data = match msg {
            Message::Query(q) => serde_json::to_value(q),
            Message::Found(f) => serde_json::to_value(f),
            Message::NotFound(n) => serde_json::to_value(n),
        }
        .map_err(|e| TransportError::Serialization(format!("{} payload: {e}", msg.kind())))?;

        Ok(Self {
            kind: msg.kind(),
            data,
            sender_id: sender_id.into(),
        })
    }

    /// Decode `data` according to `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ProtocolViolation`] if the payload does not
    /// match the schema its declared type requires.
    pub fn decode_message(&self) -> Result<Message, TransportError> {
        let data = self.data.clone();
        let decoded = match self.kind {
            MessageKind::Request => serde_json::from_value(data).map(Message::Query),
            MessageKind::Positive => serde_json::from_value(data).map(Message::Found),
            MessageKind::Negative => serde_json::from_value(data).map(Message::NotFound),
        };
        decoded.map_err(|e| {
            TransportError::ProtocolViolation(format!(
                "{} payload from {} does not decode: {e}",
                self.kind, self.sender_id
            ))
        })
    }

    /// Serialize for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if serialization fails, or
    /// [`TransportError::ProtocolViolation`] if the result exceeds
    /// [`MAX_FRAME_SIZE`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| TransportError::Serialization(e.to_string()))?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(TransportError::ProtocolViolation(format!(
                "envelope too large: {} bytes, max {MAX_FRAME_SIZE}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Deserialize an envelope received from the wire.
    ///
    /// Unknown `type` values and missing fields are rejected here.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Deserialization`] if the bytes are not a
    /// valid envelope.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(data).map_err(|e| TransportError::Deserialization(e.to_string()))
    }
}
