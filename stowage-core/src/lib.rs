//! Byte-level cache storage for HTTP proxies and crawlers.
//!
//! Values are opaque byte buffers stored under string keys with a TTL.
//! On top of that flat store the crate keeps a persistent index from a
//! *real key* (the resource) to its *variant keys* (one per negotiated
//! representation) and from *surrogate keys* (tags) to variants, so whole
//! groups of responses can be looked up or purged at once.
//!
//! Backends:
//! - [`MemoryKv`]: in-process `BTreeMap`, nothing survives a restart
//! - [`FjallKv`]: embedded LSM keyspace (with the `fjall` feature, on by default)
//!
//! ```no_run
//! use chrono::TimeDelta;
//! use stowage_core::{MemoryKv, Storage, Storer};
//!
//! # async fn run() -> Result<(), stowage_core::StorageError> {
//! let storage = Storage::new(MemoryKv::new());
//! storage.init().await?;
//! storage.set("key", b"value".to_vec(), TimeDelta::minutes(5)).await?;
//! assert_eq!(storage.get("key").await?, Some(b"value".to_vec()));
//! # Ok(())
//! # }
//! ```
pub mod backend;
pub mod codec;
pub mod compression;
pub mod entry;
mod error;
pub mod factory;
pub mod index;
pub mod keys;
mod stats;
mod storage;
mod storer;

#[cfg(feature = "fjall")]
pub use backend::FjallKv;
pub use backend::{KvBackend, MemoryKv};
pub use codec::{CachedResponse, Headers};
pub use error::{CodecError, StorageError};
pub use factory::{StorerHandle, build_storer};
pub use index::{KeyIndex, VariantMapping, VariantRecord};
pub use stats::{StatsSnapshot, StorageStats};
pub use storage::Storage;
pub use storer::{
    AbstractStorer, Freshness, MultiLevelEntry, PurgeReport, Storer, VariantHit,
    VariantRequest,
};
