//! In-process backend over an ordered map. Nothing survives the process,
//! which makes it the engine of choice for tests and single-node caches.
use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::StorageError;
use crate::backend::KvBackend;
use crate::entry::StoredEntry;

#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvBackend for MemoryKv {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn raw_get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let now = Utc::now();
        {
            let entries = self.entries.read()?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(Some(entry.payload.clone()));
                }
                Some(_) => {}
            }
        }

        // Lazy expiry; re-check under the write lock in case it was replaced.
        let mut entries = self.entries.write()?;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    fn raw_set(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let entry = StoredEntry::new(value, expires_at);
        self.entries.write()?.insert(key.to_string(), entry);
        Ok(())
    }

    fn raw_delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write()?.remove(key);
        Ok(())
    }

    fn raw_iterate(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let now = Utc::now();
        let entries = self.entries.read()?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| (k.clone(), e.payload.clone()))
            .collect())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries.write()?.clear();
        Ok(())
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut entries = self.entries.write()?;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }
}

impl std::fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKv")
            .field("entries", &self.len())
            .finish()
    }
}
