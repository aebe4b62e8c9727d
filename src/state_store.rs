//! Persistent state store (C3): a crash-safe, WAL-capable key/value mapping
//! from relative path to [`SyncedFile`] fingerprint, surviving restart.
//!
//! Grounded on the teacher's persistence idiom (atomic write-then-rename
//! JSON in `security::KeyStore`) but upgraded to a real WAL-mode store since
//! spec §4.3 calls for crash resilience beyond what rename-on-write gives a
//! single file; `redb` (already present in the retrieved pack) provides
//! durable, transactional commits without adding a server process.
use crate::error::{Result, SwarmError};
use crate::model::SyncedFile;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("fingerprints");
const LEGACY_SNAPSHOT_NAME: &str = "state.json";
const DB_NAME: &str = "state.redb";

/// Guarded by an external mutex around all mutations per spec §5; reads may
/// snapshot under the same lock.
pub struct StateStore {
    db: Mutex<Database>,
}

impl StateStore {
    /// Open (creating if absent) the store at `vault_dir`, transparently
    /// migrating an earlier JSON snapshot if one is found and no database
    /// exists yet.
    pub fn open(vault_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(vault_dir)?;
        let db_path = vault_dir.join(DB_NAME);
        let is_new = !db_path.exists();

        let db = Database::create(&db_path)
            .map_err(|e| SwarmError::StateStore(format!("failed to open state store: {e}")))?;

        {
            let txn = db
                .begin_write()
                .map_err(|e| SwarmError::StateStore(e.to_string()))?;
            {
                let _ = txn
                    .open_table(TABLE)
                    .map_err(|e| SwarmError::StateStore(e.to_string()))?;
            }
            txn.commit()
                .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        }

        let store = Self { db: Mutex::new(db) };

        if is_new {
            let legacy_path = vault_dir.join(LEGACY_SNAPSHOT_NAME);
            if legacy_path.exists() {
                store.migrate_legacy_snapshot(&legacy_path)?;
            }
        }

        Ok(store)
    }

    fn migrate_legacy_snapshot(&self, path: &Path) -> Result<()> {
        info!("migrating legacy JSON state snapshot from {path:?}");
        let data = std::fs::read(path)?;
        let entries: Vec<SyncedFile> = match serde_json::from_slice(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("legacy snapshot {path:?} is unreadable ({e}); skipping migration");
                return Ok(());
            }
        };
        for entry in entries {
            self.add_or_update(&entry)?;
        }
        let archived = path.with_extension("json.migrated");
        let _ = std::fs::rename(path, archived);
        Ok(())
    }

    pub fn add_or_update(&self, file: &SyncedFile) -> Result<()> {
        let key = file.lookup_key();
        let value = serde_json::to_vec(file)?;
        let db = self.db.lock().expect("state store mutex poisoned");
        let txn = db
            .begin_write()
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        {
            let mut table = txn
                .open_table(TABLE)
                .map_err(|e| SwarmError::StateStore(e.to_string()))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, relative_path: &str) -> Result<()> {
        let key = relative_path.to_lowercase();
        let db = self.db.lock().expect("state store mutex poisoned");
        let txn = db
            .begin_write()
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        {
            let mut table = txn
                .open_table(TABLE)
                .map_err(|e| SwarmError::StateStore(e.to_string()))?;
            table
                .remove(key.as_str())
                .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        Ok(())
    }

    /// Update the path of an entry in place (rename); for directories the
    /// caller is responsible for rewriting all descendants via repeated calls.
    pub fn rename(&self, old_relative_path: &str, new_relative_path: &str) -> Result<()> {
        if let Some(mut entry) = self.get(old_relative_path)? {
            self.remove(old_relative_path)?;
            entry.old_relative_path = Some(entry.relative_path.clone());
            entry.relative_path = new_relative_path.to_string();
            self.add_or_update(&entry)?;
        }
        Ok(())
    }

    pub fn get(&self, relative_path: &str) -> Result<Option<SyncedFile>> {
        let key = relative_path.to_lowercase();
        let db = self.db.lock().expect("state store mutex poisoned");
        let txn = db
            .begin_read()
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        let table = txn
            .open_table(TABLE)
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        match table
            .get(key.as_str())
            .map_err(|e| SwarmError::StateStore(e.to_string()))?
        {
            Some(value) => {
                let file: SyncedFile = serde_json::from_slice(value.value())?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    pub fn exists(&self, relative_path: &str) -> Result<bool> {
        Ok(self.get(relative_path)?.is_some())
    }

    pub fn enumerate_all(&self) -> Result<Vec<SyncedFile>> {
        let db = self.db.lock().expect("state store mutex poisoned");
        let txn = db
            .begin_read()
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        let table = txn
            .open_table(TABLE)
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        let mut out = Vec::new();
        for row in table
            .iter()
            .map_err(|e| SwarmError::StateStore(e.to_string()))?
        {
            let (_, value) = row.map_err(|e| SwarmError::StateStore(e.to_string()))?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    /// Rewrite all entries whose relative path starts with `old_prefix` to
    /// instead start with `new_prefix` (directory rename propagation).
    pub fn rename_prefix(&self, old_prefix: &str, new_prefix: &str) -> Result<usize> {
        let old_prefix_lower = format!("{}/", old_prefix.to_lowercase());
        let mut renamed = 0;
        for entry in self.enumerate_all()? {
            if entry.lookup_key() == old_prefix.to_lowercase()
                || entry.lookup_key().starts_with(&old_prefix_lower)
            {
                let suffix = &entry.relative_path[old_prefix.len()..];
                let new_path = format!("{new_prefix}{suffix}");
                self.rename(&entry.relative_path, &new_path)?;
                renamed += 1;
            }
        }
        Ok(renamed)
    }

    pub fn count(&self) -> Result<u64> {
        let db = self.db.lock().expect("state store mutex poisoned");
        let txn = db
            .begin_read()
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        let table = txn
            .open_table(TABLE)
            .map_err(|e| SwarmError::StateStore(e.to_string()))?;
        table
            .len()
            .map_err(|e| SwarmError::StateStore(e.to_string()))
    }

    /// No-op beyond redb's own durability guarantees: every commit above is
    /// already fsync'd. Exposed so callers (shutdown sequence, §5) have an
    /// explicit flush point to call without caring about the backing engine.
    pub fn flush(&self) -> Result<()> {
        Ok(())
    }
}

pub fn default_vault_dir(managed_root: &Path) -> PathBuf {
    managed_root.join(".swarm-vault")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn mk_file(path: &str) -> SyncedFile {
        SyncedFile::new_file(path, "deadbeef", 4, UNIX_EPOCH)
    }

    #[test]
    fn add_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.add_or_update(&mk_file("a/b.txt")).unwrap();
        assert!(store.exists("a/b.txt").unwrap());
        assert_eq!(store.count().unwrap(), 1);
        store.remove("a/b.txt").unwrap();
        assert!(!store.exists("a/b.txt").unwrap());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.add_or_update(&mk_file("Notes/Todo.TXT")).unwrap();
        assert!(store.get("notes/todo.txt").unwrap().is_some());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::open(dir.path()).unwrap();
            store.add_or_update(&mk_file("persisted.txt")).unwrap();
        }
        let reopened = StateStore::open(dir.path()).unwrap();
        assert!(reopened.exists("persisted.txt").unwrap());
    }

    #[test]
    fn migrates_legacy_json_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![mk_file("old1.txt"), mk_file("old2.txt")];
        std::fs::write(
            dir.path().join(LEGACY_SNAPSHOT_NAME),
            serde_json::to_vec(&entries).unwrap(),
        )
        .unwrap();

        let store = StateStore::open(dir.path()).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert!(!dir.path().join(LEGACY_SNAPSHOT_NAME).exists());
    }

    #[test]
    fn rename_prefix_updates_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.add_or_update(&mk_file("old_dir/a.txt")).unwrap();
        store.add_or_update(&mk_file("old_dir/sub/b.txt")).unwrap();
        let n = store.rename_prefix("old_dir", "new_dir").unwrap();
        assert_eq!(n, 2);
        assert!(store.get("new_dir/a.txt").unwrap().is_some());
        assert!(store.get("new_dir/sub/b.txt").unwrap().is_some());
        assert!(store.get("old_dir/a.txt").unwrap().is_none());
    }
}
