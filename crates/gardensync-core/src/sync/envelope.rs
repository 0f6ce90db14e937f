//! Routing envelopes around protocol messages
//!
//! Every frame on a peer channel is one postcard-encoded [`Envelope`].
//!
//! ## Wire Format
//!
//! ```text
//! +----------+------------+--------+------------+---------+
//! | version  | message_id | from   | use_gossip | payload |
//! | (1 byte) | (uuid)     | (str)  | (bool)     | Message |
//! +----------+------------+--------+------------+---------+
//! ```
//!
//! The `message_id` is the only dedup key. A forwarded gossip envelope is
//! re-sent byte-for-byte with its original id.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::sync::protocol::Message;
use crate::types::{MessageId, PeerId};

/// Current envelope protocol version
pub const ENVELOPE_VERSION: u8 = 1;

/// Routing wrapper for a [`Message`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for forward compatibility
    pub version: u8,
    /// Globally unique per originating send
    pub message_id: MessageId,
    /// Peer that originated the message (not the forwarding hop)
    pub from: PeerId,
    /// Whether receivers re-broadcast this envelope
    pub use_gossip: bool,
    /// The protocol message
    pub payload: Message,
}

impl Envelope {
    /// Wrap a payload, minting a fresh message id unless one is given
    pub fn new(
        from: PeerId,
        payload: Message,
        message_id: Option<MessageId>,
        use_gossip: bool,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            message_id: message_id.unwrap_or_default(),
            from,
            use_gossip,
            payload,
        }
    }

    /// Encode the envelope to a transport frame.
    pub fn to_bytes(&self) -> SyncResult<Bytes> {
        postcard::to_allocvec(self)
            .map(Bytes::from)
            .map_err(|e| SyncError::Serialization(format!("Failed to encode envelope: {}", e)))
    }

    /// Decode an envelope from a transport frame.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Protocol` if the frame is malformed or carries an
    /// unknown version.
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        let envelope: Envelope = postcard::from_bytes(bytes)
            .map_err(|e| SyncError::Protocol(format!("Failed to decode envelope: {}", e)))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(SyncError::Protocol(format!(
                "Envelope version {} is not supported",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}
