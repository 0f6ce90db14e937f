//! Peer protocol messages
//!
//! Every payload carried inside an [`Envelope`](super::Envelope) is one
//! variant of [`Message`]. Routing is an exhaustive match, so adding a
//! variant forces a decision about which coordinator consumes it.
//!
//! ## Message Flow
//!
//! ```text
//! Bulk garden send                       Live sync election
//!
//! Sender              Receiver           Peer A               Peer B
//!   |-- SendInitiation -->|                |-- Announce -------->|
//!   |-- GardenZipChunk -->|  (x N)         |<-- AnnounceReply ---|
//!   |-- GardenZipComplete>|                |   (timer fires)     |
//!   |      ... per garden |                |-- HostChosen ------>|
//!   |-- FullSyncComplete->|                |-- SessionStart ---->|
//!                                          |<-- RequestDocState -|
//!                                          |-- DocState -------->|
//!                                          |<=> YjsUpdate <=====>|
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{PeerId, PeerInfo, TransferId};

/// Live-sync role of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LiveState {
    /// Live sync is off
    #[default]
    Disabled,
    /// Election in progress
    Pending,
    /// Owns the session and serves document state
    Host,
    /// Participates in a session owned by another peer
    Follower,
}

impl LiveState {
    /// Host or follower in a running session
    pub fn in_session(self) -> bool {
        matches!(self, LiveState::Host | LiveState::Follower)
    }
}

impl std::fmt::Display for LiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveState::Disabled => write!(f, "disabled"),
            LiveState::Pending => write!(f, "pending"),
            LiveState::Host => write!(f, "host"),
            LiveState::Follower => write!(f, "follower"),
        }
    }
}

/// A peer's view of its own live-sync session, sent in announces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePeer {
    /// Who is announcing
    pub info: PeerInfo,
    /// Their current role
    pub state: LiveState,
    /// Host of the session they belong to, if any
    pub host_id: Option<PeerId>,
    /// Gardens shared in their session
    pub syncable_gardens: Vec<String>,
}

/// Which coordinator consumes a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// LiveSyncCoordinator (election + document replicas)
    LiveSync,
    /// PeerRegistry (identity bookkeeping)
    Peer,
    /// FileSyncCoordinator (bulk transfer, incremental updates)
    FileSync,
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Sent on channel open so the other side learns our display name
    PeerIntroduction {
        /// The introducing peer
        peer: PeerInfo,
    },

    /// Ask the recipient to run a bulk send of these gardens back to us
    RequestGardens {
        /// Gardens wanted
        gardens: Vec<String>,
    },

    /// Announces a bulk send before any data arrives
    SendInitiation {
        /// Gardens that will follow
        gardens: Vec<String>,
        /// Transfer all chunks will carry
        transfer_id: TransferId,
    },

    /// One slice of a compressed garden archive
    GardenZipChunk {
        /// Garden the archive belongs to
        garden: String,
        /// Transfer this chunk belongs to
        transfer_id: TransferId,
        /// Zero-based position of this chunk
        chunk_index: u32,
        /// Total chunks in this garden's archive
        total_chunks: u32,
        /// Chunk bytes
        data: Vec<u8>,
        /// Size of the whole compressed archive
        zip_size: u64,
    },

    /// All chunks of one garden have been sent
    GardenZipComplete {
        /// Garden that finished
        garden: String,
        /// Transfer it belongs to
        transfer_id: TransferId,
    },

    /// Every garden of the transfer has been sent
    FullSyncComplete {
        /// Transfer that finished
        transfer_id: TransferId,
    },

    /// Abort a transfer (either direction)
    SyncCancel {
        /// Transfer to cancel
        transfer_id: TransferId,
    },

    /// Incremental single-file update, last writer wins
    FileUpdate {
        /// Garden of the file
        garden: String,
        /// Path inside the garden
        path: String,
        /// New file content
        content: Vec<u8>,
        /// Logical timestamp of this version
        timestamp: i64,
    },

    /// Join (or revalidate) a live-sync election
    LiveSyncAnnounce {
        /// Announcer's session view
        peer: LivePeer,
    },

    /// Answer to an announce from a peer that is itself pending
    LiveSyncAnnounceReply {
        /// Replier's session view
        peer: LivePeer,
    },

    /// Answer to an announce from a peer already in a session
    LiveSyncSessionInfo {
        /// Host of the running session
        host_id: PeerId,
        /// Gardens shared in it
        syncable_gardens: Vec<String>,
    },

    /// Result of a host-selection decision
    LiveSyncHostChosen {
        /// Peer that will host
        chosen_host_id: PeerId,
        /// Peer whose decision this was
        chosen_by: PeerId,
    },

    /// Host has picked its gardens; followers should fetch a snapshot
    LiveSyncSessionStart {
        /// Gardens shared in the session
        syncable_gardens: Vec<String>,
    },

    /// Follower asks the host for a full document snapshot
    LiveSyncRequestDocState {
        /// Garden of the document
        garden: String,
        /// Path of the document
        path: String,
    },

    /// Full document snapshot from the host
    LiveSyncDocState {
        /// Garden of the document
        garden: String,
        /// Path of the document
        path: String,
        /// Saved CRDT state
        state: Vec<u8>,
    },

    /// Incremental CRDT update from a local edit
    LiveSyncYjsUpdate {
        /// Garden of the document
        garden: String,
        /// Path of the document
        path: String,
        /// Encoded incremental changes
        update: Vec<u8>,
    },

    /// Sender left live sync
    LiveSyncDisable {
        /// Peer that disabled
        peer_id: PeerId,
    },

    /// Everyone should restart the election
    LiveSyncReelect,
}

impl Message {
    /// Coordinator responsible for this message
    pub fn route(&self) -> Route {
        match self {
            Message::LiveSyncAnnounce { .. }
            | Message::LiveSyncAnnounceReply { .. }
            | Message::LiveSyncSessionInfo { .. }
            | Message::LiveSyncHostChosen { .. }
            | Message::LiveSyncSessionStart { .. }
            | Message::LiveSyncRequestDocState { .. }
            | Message::LiveSyncDocState { .. }
            | Message::LiveSyncYjsUpdate { .. }
            | Message::LiveSyncDisable { .. }
            | Message::LiveSyncReelect => Route::LiveSync,
            Message::PeerIntroduction { .. } => Route::Peer,
            Message::RequestGardens { .. }
            | Message::SendInitiation { .. }
            | Message::GardenZipChunk { .. }
            | Message::GardenZipComplete { .. }
            | Message::FullSyncComplete { .. }
            | Message::SyncCancel { .. }
            | Message::FileUpdate { .. } => Route::FileSync,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::PeerIntroduction { .. } => "PeerIntroduction",
            Message::RequestGardens { .. } => "RequestGardens",
            Message::SendInitiation { .. } => "SendInitiation",
            Message::GardenZipChunk { .. } => "GardenZipChunk",
            Message::GardenZipComplete { .. } => "GardenZipComplete",
            Message::FullSyncComplete { .. } => "FullSyncComplete",
            Message::SyncCancel { .. } => "SyncCancel",
            Message::FileUpdate { .. } => "FileUpdate",
            Message::LiveSyncAnnounce { .. } => "LiveSyncAnnounce",
            Message::LiveSyncAnnounceReply { .. } => "LiveSyncAnnounceReply",
            Message::LiveSyncSessionInfo { .. } => "LiveSyncSessionInfo",
            Message::LiveSyncHostChosen { .. } => "LiveSyncHostChosen",
            Message::LiveSyncSessionStart { .. } => "LiveSyncSessionStart",
            Message::LiveSyncRequestDocState { .. } => "LiveSyncRequestDocState",
            Message::LiveSyncDocState { .. } => "LiveSyncDocState",
            Message::LiveSyncYjsUpdate { .. } => "LiveSyncYjsUpdate",
            Message::LiveSyncDisable { .. } => "LiveSyncDisable",
            Message::LiveSyncReelect => "LiveSyncReelect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_messages_route_to_live_sync() {
        let msgs = [
            Message::LiveSyncReelect,
            Message::LiveSyncDisable {
                peer_id: PeerId::new("a"),
            },
            Message::LiveSyncYjsUpdate {
                garden: "g".into(),
                path: "p".into(),
                update: vec![],
            },
        ];
        for msg in msgs {
            assert_eq!(msg.route(), Route::LiveSync, "{}", msg.kind());
        }
    }

    #[test]
    fn test_introduction_routes_to_registry() {
        let msg = Message::PeerIntroduction {
            peer: PeerInfo::new("a", "Laptop"),
        };
        assert_eq!(msg.route(), Route::Peer);
    }

    #[test]
    fn test_transfer_messages_route_to_file_sync() {
        let transfer_id = TransferId::new();
        let msgs = [
            Message::SendInitiation {
                gardens: vec!["notes".into()],
                transfer_id,
            },
            Message::FullSyncComplete { transfer_id },
            Message::SyncCancel { transfer_id },
            Message::RequestGardens { gardens: vec![] },
        ];
        for msg in msgs {
            assert_eq!(msg.route(), Route::FileSync, "{}", msg.kind());
        }
    }

    #[test]
    fn test_in_session() {
        assert!(LiveState::Host.in_session());
        assert!(LiveState::Follower.in_session());
        assert!(!LiveState::Pending.in_session());
        assert!(!LiveState::Disabled.in_session());
    }
}
