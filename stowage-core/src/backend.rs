//! Raw key-value capability required from an embedded engine.
//!
//! Engines only move opaque byte slots around; compression, the key index
//! and the TTL rules of the cache are layered on top by
//! [`Storage`](crate::Storage). Expiry is emulated with the
//! [`StoredEntry`](crate::entry::StoredEntry) envelope and checked on every
//! read, so an engine without native TTL still never returns an expired
//! value.
use chrono::{DateTime, Utc};

use crate::StorageError;

#[cfg(feature = "fjall")]
pub mod fjall;
pub mod memory;

#[cfg(feature = "fjall")]
pub use self::fjall::FjallKv;
pub use self::memory::MemoryKv;

pub trait KvBackend: Send + Sync {
    /// Short engine name, e.g. `"fjall"`.
    fn name(&self) -> &'static str;

    /// Where the data lives; feeds the store identifier.
    fn location(&self) -> String;

    /// Open or create the underlying storage. Must be idempotent.
    fn open(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Flush and release engine handles. A later `open` starts over.
    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Payload stored under `key`, `None` when absent or expired.
    fn raw_get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the whole slot under `key` with one write.
    fn raw_set(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    /// Remove `key`; absent keys are not an error.
    fn raw_delete(&self, key: &str) -> Result<(), StorageError>;

    /// Live `(key, payload)` pairs whose key starts with `prefix`, in key order.
    fn raw_iterate(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    /// Drop every slot.
    fn clear(&self) -> Result<(), StorageError>;

    /// Eagerly remove expired slots, returning how many were dropped.
    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
}
