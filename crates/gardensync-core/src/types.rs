//! Core types for Garden Sync

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a peer
///
/// Assigned by the transport (an iroh endpoint id, or a name on the memory
/// transport). Components other than the registry refer to peers only by id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a PeerId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for an envelope
///
/// Minted once per originating send and preserved verbatim when a gossip
/// envelope is forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Create a new random MessageId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg_{}", self.0.simple())
    }
}

/// Identifier shared by every chunk of one bulk garden send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(pub Uuid);

impl TransferId {
    /// Create a new random TransferId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "xfer_{}", &self.0.simple().to_string()[..8])
    }
}

/// Key of a live document: `garden#path`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocKey {
    /// Garden the document belongs to
    pub garden: String,
    /// Path of the document inside the garden
    pub path: String,
}

impl DocKey {
    /// Create a new document key
    pub fn new(garden: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            garden: garden.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.garden, self.path)
    }
}

/// Identity a peer presents to others
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Transport-assigned id
    pub id: PeerId,
    /// Human-readable device name
    pub display_name: String,
}

impl PeerInfo {
    /// Create peer info
    pub fn new(id: impl Into<PeerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Connection state of a peer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Channel is open and delivering frames
    Open,
    /// Channel closed cleanly
    Closed,
    /// Channel failed (rendezvous unreachable, transport error)
    Failed,
}

impl ConnectionState {
    /// Whether this state ends the peer's lifetime in the registry
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_short() {
        let id = PeerId::new("abcdefghijklmnop");
        assert_eq!(id.short(), "abcdefgh");
        assert_eq!(PeerId::new("abc").short(), "abc");
    }

    #[test]
    fn test_peer_id_ordering_is_lexicographic() {
        assert!(PeerId::new("alice") < PeerId::new("bob"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn test_doc_key_display() {
        let key = DocKey::new("notes", "daily/today.md");
        assert_eq!(key.to_string(), "notes#daily/today.md");
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Open.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
    }
}
