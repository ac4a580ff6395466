use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ::fjall::{
    Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::StorageError;
use crate::backend::KvBackend;
use crate::entry::StoredEntry;

const PARTITION: &str = "entries";

/// Fjall-backed store (default persistent backend).
///
/// Layout:
/// - `entries`: key -> [`StoredEntry`] envelope (timestamps + payload)
///
/// The keyspace is opened lazily by the first operation or by `open`, and
/// released by `close`. Writes and expiry removals share one lock, so an
/// expired slot is only removed if no newer value replaced it.
pub struct FjallKv {
    path: PathBuf,
    handles: Mutex<Option<Handles>>,
    writes: Mutex<()>,
}

#[derive(Clone)]
struct Handles {
    db: Keyspace,
    entries: PartitionHandle,
}

impl FjallKv {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            handles: Mutex::new(None),
            writes: Mutex::new(()),
        }
    }

    /// Construct and open right away, surfacing unusable paths early.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let kv = Self::new(path);
        kv.open()?;
        Ok(kv)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handles(&self) -> Result<Handles, StorageError> {
        let mut guard = self.handles.lock()?;
        if let Some(handles) = guard.as_ref() {
            return Ok(handles.clone());
        }

        let db = Config::new(&self.path).open().map_err(|e| {
            StorageError::InitFailure(format!(
                "cannot open fjall keyspace at {}: {e}",
                self.path.display()
            ))
        })?;
        let entries = db
            .open_partition(PARTITION, PartitionCreateOptions::default())
            .map_err(|e| StorageError::InitFailure(e.to_string()))?;
        info!(path = %self.path.display(), "fjall keyspace opened");

        let handles = Handles { db, entries };
        *guard = Some(handles.clone());
        Ok(handles)
    }
}

impl KvBackend for FjallKv {
    fn name(&self) -> &'static str {
        "fjall"
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<(), StorageError> {
        self.handles().map(|_| ())
    }

    fn close(&self) -> Result<(), StorageError> {
        if let Some(handles) = self.handles.lock()?.take() {
            handles.db.persist(PersistMode::SyncAll)?;
            info!(path = %self.path.display(), "fjall keyspace closed");
        }
        Ok(())
    }

    fn raw_get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let handles = self.handles()?;
        let Some(raw) = handles.entries.get(key)? else {
            return Ok(None);
        };

        let now = Utc::now();
        if StoredEntry::peek_expired(&raw, now) {
            // Re-check under the write lock in case it was replaced.
            let _writes = self.writes.lock()?;
            let current = handles.entries.get(key)?;
            if current.is_some_and(|raw| StoredEntry::peek_expired(&raw, now)) {
                debug!(key, "dropping expired entry");
                handles.entries.remove(key)?;
            }
            return Ok(None);
        }
        let entry = StoredEntry::decode(raw.to_vec())?;
        Ok(Some(entry.payload))
    }

    fn raw_set(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let handles = self.handles()?;
        let envelope = StoredEntry::new(value, expires_at).encode();
        let _writes = self.writes.lock()?;
        handles.entries.insert(key, envelope)?;
        handles.db.persist(PersistMode::Buffer)?;
        Ok(())
    }

    fn raw_delete(&self, key: &str) -> Result<(), StorageError> {
        let handles = self.handles()?;
        let _writes = self.writes.lock()?;
        handles.entries.remove(key)?;
        handles.db.persist(PersistMode::Buffer)?;
        Ok(())
    }

    fn raw_iterate(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let handles = self.handles()?;
        let now = Utc::now();
        let mut out = Vec::new();
        for item in handles.entries.prefix(prefix) {
            let (key, raw) = item?;
            if StoredEntry::peek_expired(&raw, now) {
                continue;
            }
            let key = String::from_utf8(key.to_vec()).map_err(|e| {
                StorageError::BackendIo(format!("non UTF-8 key: {e}"))
            })?;
            let entry = StoredEntry::decode(raw.to_vec())?;
            out.push((key, entry.payload));
        }
        Ok(out)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let handles = self.handles()?;
        let _writes = self.writes.lock()?;
        let keys = handles
            .entries
            .iter()
            .map(|item| item.map(|(key, _)| key))
            .collect::<Result<Vec<_>, _>>()?;
        for key in keys {
            handles.entries.remove(key)?;
        }
        handles.db.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let handles = self.handles()?;
        let mut expired = Vec::new();
        for item in handles.entries.iter() {
            let (key, raw) = item?;
            if StoredEntry::peek_expired(&raw, now) {
                expired.push(key);
            }
        }
        let _writes = self.writes.lock()?;
        let mut evicted = 0;
        for key in expired {
            let current = handles.entries.get(&key)?;
            if current.is_some_and(|raw| StoredEntry::peek_expired(&raw, now)) {
                handles.entries.remove(key)?;
                evicted += 1;
            }
        }
        if evicted > 0 {
            handles.db.persist(PersistMode::Buffer)?;
        }
        Ok(evicted)
    }
}

impl std::fmt::Debug for FjallKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FjallKv").field("path", &self.path).finish()
    }
}
