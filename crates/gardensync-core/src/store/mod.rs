//! Content store boundary
//!
//! Gardens are persisted by an external store; the sync core only needs the
//! operations in [`ContentStore`]. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: in-memory, used by tests and the demo mesh
//! - [`FsStore`]: one directory per garden under a root directory
//!
//! Version-control history lives under [`HISTORY_DIR`] inside each garden and
//! travels with bulk transfers like any other file.

pub mod archive;
mod fs;
mod memory;

use std::future::Future;

pub use archive::ArchiveEntry;
pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::SyncResult;

/// Directory (path prefix) holding a garden's version-control history
pub const HISTORY_DIR: &str = ".history";

/// Timestamp used when a file has no local copy: any update wins.
pub const MISSING_TIMESTAMP: i64 = -1;

/// Storage operations the sync core consumes
pub trait ContentStore: Send + Sync + 'static {
    /// Read one file.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if the file does not exist.
    fn read_file(
        &self,
        garden: &str,
        path: &str,
    ) -> impl Future<Output = SyncResult<Vec<u8>>> + Send;

    /// Create or overwrite one file
    fn write_file(
        &self,
        garden: &str,
        path: &str,
        data: &[u8],
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// List every file of a garden (history included), sorted
    fn list_files(&self, garden: &str) -> impl Future<Output = SyncResult<Vec<String>>> + Send;

    /// Delete a garden's version-control history
    fn delete_history(&self, garden: &str) -> impl Future<Output = SyncResult<()>> + Send;

    /// Read every file of a garden into one compressed archive
    fn read_all_files_compressed(
        &self,
        garden: &str,
        level: i32,
    ) -> impl Future<Output = SyncResult<Vec<u8>>> + Send {
        async move {
            let mut entries = Vec::new();
            for path in self.list_files(garden).await? {
                let data = self.read_file(garden, &path).await?;
                entries.push(ArchiveEntry { path, data });
            }
            archive::pack(&entries, level)
        }
    }

    /// Decompress an archive and write every file it contains.
    ///
    /// Returns the paths written.
    fn extract_and_write(
        &self,
        garden: &str,
        compressed: &[u8],
    ) -> impl Future<Output = SyncResult<Vec<String>>> + Send {
        async move {
            let entries = archive::unpack(compressed)?;
            let mut written = Vec::with_capacity(entries.len());
            for entry in entries {
                self.write_file(garden, &entry.path, &entry.data).await?;
                written.push(entry.path);
            }
            Ok(written)
        }
    }
}

/// Timestamp embedded in a stored file.
///
/// Files that are JSON objects carry an integer top-level `"timestamp"`.
/// Anything else has no timestamp.
pub fn embedded_timestamp(data: &[u8]) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_slice(data).ok()?;
    value.get("timestamp")?.as_i64()
}

/// Whether a path lies inside the history directory
pub fn is_history_path(path: &str) -> bool {
    path == HISTORY_DIR || path.starts_with(&format!("{}/", HISTORY_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_timestamp() {
        assert_eq!(embedded_timestamp(br#"{"timestamp": 42, "body": "x"}"#), Some(42));
        assert_eq!(embedded_timestamp(br#"{"body": "x"}"#), None);
        assert_eq!(embedded_timestamp(b"# plain markdown"), None);
        assert_eq!(embedded_timestamp(br#"{"timestamp": "soon"}"#), None);
    }

    #[test]
    fn test_history_paths() {
        assert!(is_history_path(".history/HEAD"));
        assert!(is_history_path(".history"));
        assert!(!is_history_path(".historyfile"));
        assert!(!is_history_path("notes/.history"));
    }
}
