//! Events emitted by the sync engine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncEvent                                                      │
//! │  ├── PeerJoined / PeerLeft: registry lifecycle                  │
//! │  ├── Progress: {message, kind: info|error|complete|cancelled}   │
//! │  ├── FullSyncFinished: completion barrier passed (reload now)   │
//! │  ├── FileUpdated: incremental update applied                    │
//! │  ├── LiveStateChanged: election state machine moved             │
//! │  └── DocumentChanged: remote update applied to a live replica   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::sync::protocol::LiveState;
use crate::types::{DocKey, PeerId, PeerInfo, TransferId};

/// Severity of a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    /// Ordinary progress
    Info,
    /// Something failed
    Error,
    /// An operation finished
    Complete,
    /// An operation was cancelled
    Cancelled,
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressKind::Info => write!(f, "info"),
            ProgressKind::Error => write!(f, "error"),
            ProgressKind::Complete => write!(f, "complete"),
            ProgressKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Progress/log line for the UI collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Human-readable text
    pub message: String,
    /// Severity
    pub kind: ProgressKind,
    /// Transfer the line refers to, if any
    pub transfer_id: Option<TransferId>,
}

impl Progress {
    /// Info line
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_kind(message, ProgressKind::Info)
    }

    /// Error line
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_kind(message, ProgressKind::Error)
    }

    /// Completion line
    pub fn complete(message: impl Into<String>) -> Self {
        Self::with_kind(message, ProgressKind::Complete)
    }

    /// Cancellation line
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::with_kind(message, ProgressKind::Cancelled)
    }

    fn with_kind(message: impl Into<String>, kind: ProgressKind) -> Self {
        Self {
            message: message.into(),
            kind,
            transfer_id: None,
        }
    }

    /// Attach a transfer id
    pub fn for_transfer(mut self, transfer_id: TransferId) -> Self {
        self.transfer_id = Some(transfer_id);
        self
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Events emitted during synchronization
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A peer channel opened
    PeerJoined {
        /// The peer
        peer: PeerInfo,
    },
    /// A peer channel closed or failed
    PeerLeft {
        /// The peer's id
        peer_id: PeerId,
    },
    /// Progress/log line
    Progress(Progress),
    /// A full receive passed the completion barrier
    FullSyncFinished {
        /// Gardens written during the receive session
        gardens: Vec<String>,
    },
    /// An incremental file update was applied locally
    FileUpdated {
        /// Garden of the file
        garden: String,
        /// Path of the file
        path: String,
        /// Timestamp of the applied version
        timestamp: i64,
    },
    /// Live-sync state machine changed state
    LiveStateChanged {
        /// New state
        state: LiveState,
        /// Session host, if known
        host_id: Option<PeerId>,
    },
    /// A live document changed because of a remote update
    DocumentChanged {
        /// The document
        key: DocKey,
    },
}

impl SyncEvent {
    /// Get the progress payload, if this is a progress event
    pub fn as_progress(&self) -> Option<&Progress> {
        match self {
            SyncEvent::Progress(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_display() {
        assert_eq!(
            Progress::cancelled("Transfer cancelled").to_string(),
            "[cancelled] Transfer cancelled"
        );
        assert_eq!(Progress::info("Sending").to_string(), "[info] Sending");
    }

    #[test]
    fn test_progress_for_transfer() {
        let id = TransferId::new();
        let progress = Progress::complete("done").for_transfer(id);
        assert_eq!(progress.transfer_id, Some(id));
        assert_eq!(progress.kind, ProgressKind::Complete);
    }

    #[test]
    fn test_as_progress() {
        let event = SyncEvent::Progress(Progress::error("boom"));
        assert_eq!(event.as_progress().map(|p| p.kind), Some(ProgressKind::Error));

        let event = SyncEvent::PeerLeft {
            peer_id: PeerId::new("a"),
        };
        assert!(event.as_progress().is_none());
    }
}
