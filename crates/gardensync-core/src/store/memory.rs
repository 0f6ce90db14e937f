use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::{is_history_path, ContentStore};
use crate::error::{SyncError, SyncResult};

#[derive(Default)]
struct MemoryStoreInner {
    files: BTreeMap<(String, String), Vec<u8>>,
    history_deletions: HashMap<String, usize>,
}

/// In-memory content store
///
/// Cheap to clone; clones share contents. An optional write delay makes
/// writes suspend like a real disk so completion ordering can be tested,
/// and writes can be switched to fail like a full disk.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
    write_delay: Option<Duration>,
    fail_writes: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("files", &self.inner.read().files.len())
            .field("write_delay", &self.write_delay)
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write sleep for `delay` before landing
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Make every later write fail (`false` restores them)
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Insert a file synchronously (test and demo seeding)
    pub fn insert(&self, garden: &str, path: &str, data: impl Into<Vec<u8>>) {
        self.inner
            .write()
            .files
            .insert((garden.to_string(), path.to_string()), data.into());
    }

    /// Read a file synchronously
    pub fn get(&self, garden: &str, path: &str) -> Option<Vec<u8>> {
        self.inner
            .read()
            .files
            .get(&(garden.to_string(), path.to_string()))
            .cloned()
    }

    /// All `(path, bytes)` pairs of a garden, sorted by path
    pub fn snapshot(&self, garden: &str) -> Vec<(String, Vec<u8>)> {
        self.inner
            .read()
            .files
            .iter()
            .filter(|((g, _), _)| g == garden)
            .map(|((_, p), d)| (p.clone(), d.clone()))
            .collect()
    }

    /// How many times `delete_history` ran for a garden
    pub fn history_deletions(&self, garden: &str) -> usize {
        self.inner
            .read()
            .history_deletions
            .get(garden)
            .copied()
            .unwrap_or(0)
    }
}

impl ContentStore for MemoryStore {
    async fn read_file(&self, garden: &str, path: &str) -> SyncResult<Vec<u8>> {
        self.get(garden, path)
            .ok_or_else(|| SyncError::NotFound(format!("{}/{}", garden, path)))
    }

    async fn write_file(&self, garden: &str, path: &str, data: &[u8]) -> SyncResult<()> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Store(format!("{}/{}: disk full", garden, path)));
        }
        self.insert(garden, path, data);
        Ok(())
    }

    async fn list_files(&self, garden: &str) -> SyncResult<Vec<String>> {
        Ok(self.snapshot(garden).into_iter().map(|(p, _)| p).collect())
    }

    async fn delete_history(&self, garden: &str) -> SyncResult<()> {
        let mut inner = self.inner.write();
        inner
            .files
            .retain(|(g, p), _| !(g == garden && is_history_path(p)));
        *inner
            .history_deletions
            .entry(garden.to_string())
            .or_default() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_list() {
        let store = MemoryStore::new();
        store.write_file("notes", "b.md", b"B").await.unwrap();
        store.write_file("notes", "a.md", b"A").await.unwrap();
        store.write_file("other", "c.md", b"C").await.unwrap();

        assert_eq!(store.read_file("notes", "a.md").await.unwrap(), b"A");
        assert_eq!(
            store.list_files("notes").await.unwrap(),
            vec!["a.md".to_string(), "b.md".to_string()]
        );
        assert!(matches!(
            store.read_file("notes", "zzz.md").await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_history_keeps_content() {
        let store = MemoryStore::new();
        store.insert("notes", "a.md", "A");
        store.insert("notes", ".history/HEAD", "ref");
        store.insert("other", ".history/HEAD", "ref");

        store.delete_history("notes").await.unwrap();

        assert_eq!(store.list_files("notes").await.unwrap(), vec!["a.md".to_string()]);
        assert!(store.get("other", ".history/HEAD").is_some());
        assert_eq!(store.history_deletions("notes"), 1);
        assert_eq!(store.history_deletions("other"), 0);
    }

    #[tokio::test]
    async fn test_archive_roundtrip_through_store() {
        let source = MemoryStore::new();
        source.insert("notes", "a.md", "A");
        source.insert("notes", ".history/HEAD", "ref");
        let archive = source.read_all_files_compressed("notes", 3).await.unwrap();

        let target = MemoryStore::new();
        let written = target.extract_and_write("notes", &archive).await.unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(target.snapshot("notes"), source.snapshot("notes"));
    }
}
