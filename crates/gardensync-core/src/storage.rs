//! Durable local settings using redb.
//!
//! Holds the state that must survive restarts:
//! - whether live sync was enabled (drives re-enable on reconnect)
//! - the local display name
//! - the iroh endpoint secret key (stable peer id across runs)
//!
//! Session-only state (sticky host, syncable gardens) is deliberately kept
//! out of here; see [`SessionMemory`](crate::live::SessionMemory).

use crate::error::SyncError;
use parking_lot::RwLock;
use redb::{Database, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const SETTINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");
const ENDPOINT_SECRET_KEY_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("endpoint_secret_key");

const LIVE_SYNC_ENABLED_KEY: &str = "live_sync_enabled";
const DISPLAY_NAME_KEY: &str = "display_name";
const SECRET_KEY_KEY: &str = "default";

/// Device settings database shared by the engine and the CLI
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Open (or create) the settings database at `path`, creating parent
    /// directories and both tables on first use.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SETTINGS_TABLE)?;
            let _ = write_txn.open_table(ENDPOINT_SECRET_KEY_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Settings
    // ═══════════════════════════════════════════════════════════════════════

    fn put_setting(&self, key: &str, value: &[u8]) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SETTINGS_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SETTINGS_TABLE)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Remember whether live sync is enabled
    pub fn set_live_sync_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        self.put_setting(LIVE_SYNC_ENABLED_KEY, &[u8::from(enabled)])
    }

    /// Whether live sync was enabled when the app last ran
    pub fn live_sync_enabled(&self) -> Result<bool, SyncError> {
        Ok(self
            .get_setting(LIVE_SYNC_ENABLED_KEY)?
            .map(|v| v.first() == Some(&1))
            .unwrap_or(false))
    }

    /// Save the local display name
    pub fn set_display_name(&self, name: &str) -> Result<(), SyncError> {
        self.put_setting(DISPLAY_NAME_KEY, name.as_bytes())
    }

    /// Load the local display name
    pub fn display_name(&self) -> Result<Option<String>, SyncError> {
        self.get_setting(DISPLAY_NAME_KEY)?
            .map(|v| String::from_utf8(v).map_err(|e| SyncError::Serialization(e.to_string())))
            .transpose()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Endpoint Secret Key
    // ═══════════════════════════════════════════════════════════════════════

    /// Save the iroh endpoint secret key
    pub fn save_endpoint_secret_key(&self, key: &[u8; 32]) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENDPOINT_SECRET_KEY_TABLE)?;
            table.insert(SECRET_KEY_KEY, key.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the iroh endpoint secret key, if one was saved
    pub fn load_endpoint_secret_key(&self) -> Result<Option<[u8; 32]>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENDPOINT_SECRET_KEY_TABLE)?;
        match table.get(SECRET_KEY_KEY)? {
            Some(v) => {
                let bytes: [u8; 32] = v.value().try_into().map_err(|_| {
                    SyncError::Serialization("endpoint secret key is not 32 bytes".into())
                })?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::new(&db_path).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_live_sync_flag_defaults_to_false() {
        let (storage, _dir) = create_test_storage();
        assert!(!storage.live_sync_enabled().unwrap());
    }

    #[test]
    fn test_live_sync_flag_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        {
            let storage = Storage::new(&db_path).unwrap();
            storage.set_live_sync_enabled(true).unwrap();
        }
        let storage = Storage::new(&db_path).unwrap();
        assert!(storage.live_sync_enabled().unwrap());

        storage.set_live_sync_enabled(false).unwrap();
        assert!(!storage.live_sync_enabled().unwrap());
    }

    #[test]
    fn test_display_name() {
        let (storage, _dir) = create_test_storage();
        assert_eq!(storage.display_name().unwrap(), None);
        storage.set_display_name("Laptop").unwrap();
        assert_eq!(storage.display_name().unwrap().as_deref(), Some("Laptop"));
    }

    #[test]
    fn test_endpoint_secret_key() {
        let (storage, _dir) = create_test_storage();
        assert!(storage.load_endpoint_secret_key().unwrap().is_none());
        storage.save_endpoint_secret_key(&[7u8; 32]).unwrap();
        assert_eq!(storage.load_endpoint_secret_key().unwrap(), Some([7u8; 32]));
    }
}
