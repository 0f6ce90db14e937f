//! Peer registry: identities, channels and connection state
//!
//! The registry is the only owner of live [`TransportChannel`] objects.
//! Every other component refers to peers by [`PeerId`] and goes through the
//! registry to send a frame or read a channel's buffered level.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TransportEvent::Opened   → add_peer (Connecting → Open)        │
//! │  PeerIntroduction         → set_display_name                    │
//! │  TransportEvent::Message  → MessageRouter::receive              │
//! │  TransportEvent::State    → connection_state_changed            │
//! │     Closed | Failed       → entry removed, PeerLeft returned    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::types::{ConnectionState, PeerId, PeerInfo};

/// Per-peer, ordered, reliable, message-framed duplex channel.
///
/// Implementations queue frames without blocking; `buffered_bytes` reports
/// how much of that queue has not reached the wire yet.
pub trait TransportChannel: Send + Sync + 'static {
    /// Queue one frame for delivery
    fn send(&self, frame: Bytes) -> SyncResult<()>;

    /// Bytes queued but not yet delivered
    fn buffered_bytes(&self) -> usize;

    /// Close the channel; further sends fail
    fn close(&self);

    /// Whether the channel still accepts frames
    fn is_open(&self) -> bool;
}

/// What happened on a transport
pub enum TransportEventKind {
    /// A direct channel to the peer exists
    Opened(Arc<dyn TransportChannel>),
    /// A frame arrived
    Message(Bytes),
    /// The connection changed state
    State(ConnectionState),
}

impl std::fmt::Debug for TransportEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEventKind::Opened(_) => f.write_str("Opened(<channel>)"),
            TransportEventKind::Message(b) => write!(f, "Message({} bytes)", b.len()),
            TransportEventKind::State(s) => write!(f, "State({})", s),
        }
    }
}

/// Event from a transport, tagged with the remote peer
#[derive(Debug)]
pub struct TransportEvent {
    /// Remote peer
    pub peer: PeerId,
    /// What happened
    pub kind: TransportEventKind,
}

/// A peer as seen by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Transport-assigned id
    pub id: PeerId,
    /// Display name (the id until the peer introduces itself)
    pub display_name: String,
    /// Current connection state
    pub connection_state: ConnectionState,
}

impl Peer {
    /// Identity portion of the peer
    pub fn info(&self) -> PeerInfo {
        PeerInfo::new(self.id.clone(), self.display_name.clone())
    }
}

struct PeerEntry {
    peer: Peer,
    channel: Arc<dyn TransportChannel>,
}

/// Registry of connected peers
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<PeerId, PeerEntry>>>,
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.peers.read().len())
            .finish()
    }
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and its channel
    ///
    /// A peer id appears at most once: re-adding an existing id replaces
    /// (and closes) the previous channel.
    pub fn add_peer(&self, id: PeerId, channel: Arc<dyn TransportChannel>) -> Peer {
        let state = if channel.is_open() {
            ConnectionState::Open
        } else {
            ConnectionState::Connecting
        };
        let peer = Peer {
            id: id.clone(),
            display_name: id.to_string(),
            connection_state: state,
        };
        let previous = self.peers.write().insert(
            id.clone(),
            PeerEntry {
                peer: peer.clone(),
                channel,
            },
        );
        if let Some(previous) = previous {
            debug!(peer = %id.short(), "Replacing existing channel");
            previous.channel.close();
        }
        info!(peer = %id.short(), %state, "Peer added");
        peer
    }

    /// Remove a peer, closing its channel
    pub fn remove_peer(&self, id: &PeerId) -> Option<Peer> {
        let entry = self.peers.write().remove(id)?;
        entry.channel.close();
        info!(peer = %id.short(), "Peer removed");
        Some(Peer {
            connection_state: ConnectionState::Closed,
            ..entry.peer
        })
    }

    /// Apply a connection state change
    ///
    /// Returns the removed peer when the new state is terminal; callers
    /// forward that to the coordinators so they can react to the loss.
    pub fn connection_state_changed(&self, id: &PeerId, state: ConnectionState) -> Option<Peer> {
        if state.is_terminal() {
            return self.remove_peer(id);
        }
        let mut peers = self.peers.write();
        match peers.get_mut(id) {
            Some(entry) => {
                debug!(peer = %id.short(), %state, "Connection state changed");
                entry.peer.connection_state = state;
            }
            None => warn!(peer = %id.short(), %state, "State change for unknown peer"),
        }
        None
    }

    /// Record the display name a peer introduced itself with
    pub fn set_display_name(&self, id: &PeerId, display_name: impl Into<String>) -> bool {
        match self.peers.write().get_mut(id) {
            Some(entry) => {
                entry.peer.display_name = display_name.into();
                true
            }
            None => false,
        }
    }

    /// Look up a peer
    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        self.peers.read().get(id).map(|e| e.peer.clone())
    }

    /// Whether the peer has an open channel
    pub fn is_open(&self, id: &PeerId) -> bool {
        self.peers
            .read()
            .get(id)
            .map(|e| e.peer.connection_state == ConnectionState::Open && e.channel.is_open())
            .unwrap_or(false)
    }

    /// Ids of all peers with an open channel, sorted
    pub fn open_peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .read()
            .iter()
            .filter(|(_, e)| e.peer.connection_state == ConnectionState::Open && e.channel.is_open())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of all known peers
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.read().values().map(|e| e.peer.clone()).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Number of known peers
    pub fn count(&self) -> usize {
        self.peers.read().len()
    }

    /// Queue a frame on a peer's channel
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Transport` if the peer is unknown or its channel
    /// is not open.
    pub fn send_to(&self, id: &PeerId, frame: Bytes) -> SyncResult<()> {
        let channel = {
            let peers = self.peers.read();
            let entry = peers
                .get(id)
                .ok_or_else(|| SyncError::Transport(format!("unknown peer {}", id.short())))?;
            if entry.peer.connection_state != ConnectionState::Open || !entry.channel.is_open() {
                return Err(SyncError::Transport(format!(
                    "channel to {} is {}",
                    id.short(),
                    entry.peer.connection_state
                )));
            }
            entry.channel.clone()
        };
        channel.send(frame)
    }

    /// Bytes buffered on a peer's channel
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Transport` if the peer is unknown.
    pub fn buffered_bytes(&self, id: &PeerId) -> SyncResult<usize> {
        self.peers
            .read()
            .get(id)
            .map(|e| e.channel.buffered_bytes())
            .ok_or_else(|| SyncError::Transport(format!("unknown peer {}", id.short())))
    }

    /// Close and remove every peer
    pub fn clear(&self) -> Vec<Peer> {
        let drained: Vec<PeerEntry> = self.peers.write().drain().map(|(_, e)| e).collect();
        drained
            .into_iter()
            .map(|e| {
                e.channel.close();
                e.peer
            })
            .collect()
    }
}
