//! Garden archive codec: postcard entry list, zstd-compressed.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// One file inside a garden archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Path relative to the garden root
    pub path: String,
    /// File bytes
    pub data: Vec<u8>,
}

/// Serialize and compress a list of files
pub fn pack(entries: &[ArchiveEntry], level: i32) -> SyncResult<Vec<u8>> {
    let serialized = postcard::to_allocvec(entries)
        .map_err(|e| SyncError::Serialization(format!("Failed to encode archive: {}", e)))?;
    zstd::encode_all(&serialized[..], level)
        .map_err(|e| SyncError::Serialization(format!("Failed to compress archive: {}", e)))
}

/// Decompress and deserialize an archive
pub fn unpack(compressed: &[u8]) -> SyncResult<Vec<ArchiveEntry>> {
    let serialized = zstd::decode_all(compressed)
        .map_err(|e| SyncError::Serialization(format!("Failed to decompress archive: {}", e)))?;
    postcard::from_bytes(&serialized)
        .map_err(|e| SyncError::Serialization(format!("Failed to decode archive: {}", e)))
}
