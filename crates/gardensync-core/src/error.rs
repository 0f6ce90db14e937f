//! Error types for Garden Sync

use thiserror::Error;

use crate::types::TransferId;

/// Main error type for Garden Sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Peer channel is closed, unknown or unreachable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Envelope or message could not be parsed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A garden transfer completed with missing chunks
    #[error(
        "Transfer {transfer_id} for garden {garden} incomplete: received {received} of {expected} chunks"
    )]
    TransferIntegrity {
        /// Garden the transfer belonged to
        garden: String,
        /// Transfer that was abandoned
        transfer_id: TransferId,
        /// Chunks announced by the sender
        expected: u32,
        /// Chunks actually buffered
        received: u32,
    },

    /// Unexpected failure while handling a message
    #[error("Handler error: {0}")]
    Handler(String),

    /// Content store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// File does not exist in the content store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Automerge document error
    #[error("Automerge error: {0}")]
    Automerge(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network-related error (endpoint, gossip)
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The engine task is no longer running
    #[error("Sync engine stopped")]
    EngineStopped,
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

impl From<postcard::Error> for SyncError {
    fn from(e: postcard::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<automerge::AutomergeError> for SyncError {
    fn from(e: automerge::AutomergeError) -> Self {
        SyncError::Automerge(e.to_string())
    }
}
