use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::{ContentStore, HISTORY_DIR};
use crate::error::{SyncError, SyncResult};

/// Directory-backed content store: `<root>/<garden>/<path>`
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root` (created on first write)
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of all gardens (top-level directories)
    pub async fn list_gardens(&self) -> SyncResult<Vec<String>> {
        let mut gardens = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(gardens),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    gardens.push(name.to_string());
                }
            }
        }
        gardens.sort();
        Ok(gardens)
    }

    fn garden_dir(&self, garden: &str) -> SyncResult<PathBuf> {
        let rel = checked_relative(garden)?;
        if rel.components().count() != 1 {
            return Err(SyncError::Store(format!("invalid garden name: {}", garden)));
        }
        Ok(self.root.join(rel))
    }

    fn file_path(&self, garden: &str, path: &str) -> SyncResult<PathBuf> {
        Ok(self.garden_dir(garden)?.join(checked_relative(path)?))
    }
}

/// Reject absolute paths and parent-directory escapes from received archives
fn checked_relative(path: &str) -> SyncResult<&Path> {
    let p = Path::new(path);
    if path.is_empty() || !p.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(SyncError::Store(format!("invalid path: {}", path)));
    }
    Ok(p)
}

impl ContentStore for FsStore {
    async fn read_file(&self, garden: &str, path: &str) -> SyncResult<Vec<u8>> {
        let full = self.file_path(garden, path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::NotFound(format!("{}/{}", garden, path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, garden: &str, path: &str, data: &[u8]) -> SyncResult<()> {
        let full = self.file_path(garden, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        Ok(())
    }

    async fn list_files(&self, garden: &str) -> SyncResult<Vec<String>> {
        let base = self.garden_dir(garden)?;
        let mut files = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&base) {
                    let parts: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.push(parts.join("/"));
                }
            }
        }
        files.sort();
        Ok(files)
    }

    async fn delete_history(&self, garden: &str) -> SyncResult<()> {
        let history = self.garden_dir(garden)?.join(HISTORY_DIR);
        match tokio::fs::remove_dir_all(&history).await {
            Ok(()) => {
                debug!(garden, "Deleted garden history");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        store.write_file("notes", "daily/a.md", b"A").await.unwrap();
        store.write_file("notes", ".history/HEAD", b"ref").await.unwrap();

        assert_eq!(store.read_file("notes", "daily/a.md").await.unwrap(), b"A");
        assert_eq!(
            store.list_files("notes").await.unwrap(),
            vec![".history/HEAD".to_string(), "daily/a.md".to_string()]
        );
        assert_eq!(store.list_gardens().await.unwrap(), vec!["notes".to_string()]);

        store.delete_history("notes").await.unwrap();
        assert_eq!(
            store.list_files("notes").await.unwrap(),
            vec!["daily/a.md".to_string()]
        );
        // Deleting absent history is fine
        store.delete_history("notes").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.write_file("notes", "../evil", b"x").await.is_err());
        assert!(store.write_file("notes", "/etc/passwd", b"x").await.is_err());
        assert!(store.write_file("..", "a.md", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert!(matches!(
            store.read_file("notes", "a.md").await,
            Err(SyncError::NotFound(_))
        ));
        assert!(store.list_files("notes").await.unwrap().is_empty());
    }
}
