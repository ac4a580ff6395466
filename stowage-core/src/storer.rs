//! The storage contract every cache backend exposes.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;

use crate::codec::{self, CachedResponse, Headers};
use crate::index::VariantRecord;
use crate::{CodecError, StorageError, compression, keys};

/// Core storage trait that backends must implement.
///
/// # TTL semantics
///
/// A TTL of zero or less is the *evict-now* idiom: the write stores
/// nothing, the key is deleted (and unindexed), and a following `get`
/// returns `None`. It is not an error.
#[async_trait]
pub trait Storer: Send + Sync {
    /// Backend name, e.g. `"fjall"`.
    fn name(&self) -> &str;

    /// Stable identifier derived from the backend and its settings.
    fn uuid(&self) -> &str;

    /// Open or create the underlying storage. Safe to call repeatedly.
    async fn init(&self) -> Result<(), StorageError>;

    /// Flush and release the backend. `init` reopens it.
    async fn close(&self) -> Result<(), StorageError>;

    /// Raw stored bytes for `key`; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key` until `now + ttl`, replacing any previous
    /// value as a whole.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: TimeDelta,
    ) -> Result<(), StorageError>;

    /// Remove `key` and its index references. Missing keys are fine.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Delete every stored key matching the regular expression `pattern`.
    async fn delete_many(&self, pattern: &str) -> Result<usize, StorageError>;

    /// Keys of all live entries, index records excluded.
    async fn list_keys(&self) -> Result<Vec<String>, StorageError>;

    /// Live entries whose key starts with `prefix`, keyed by the remainder
    /// of the key.
    async fn map_keys(
        &self,
        prefix: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, StorageError>;

    /// Drop every entry and index record.
    async fn reset(&self) -> Result<(), StorageError>;

    /// Compress and store one variant, then index it under its real key
    /// and surrogate keys.
    async fn set_multi_level(
        &self,
        entry: MultiLevelEntry,
    ) -> Result<(), StorageError>;

    /// Pick the variant of `real_key` matching `request`, fresh before
    /// stale.
    async fn get_multi_level(
        &self,
        real_key: &str,
        request: &VariantRequest,
    ) -> Result<Option<VariantHit>, StorageError>;

    async fn lookup_variants(
        &self,
        real_key: &str,
    ) -> Result<BTreeSet<String>, StorageError>;

    async fn lookup_by_surrogate(
        &self,
        tag: &str,
    ) -> Result<BTreeSet<String>, StorageError>;

    /// Delete every variant tagged with `tag`. Individual failures are
    /// collected in the report; successful removals stay committed.
    async fn purge_by_surrogate(
        &self,
        tag: &str,
    ) -> Result<PurgeReport, StorageError>;
}

pub type AbstractStorer = Arc<dyn Storer>;

/// Input of [`Storer::set_multi_level`].
#[derive(Debug, Clone)]
pub struct MultiLevelEntry {
    pub real_key: String,
    /// Derived from the real key, varied headers and label when `None`.
    pub variant_key: Option<String>,
    /// Uncompressed bytes, usually an encoded [`CachedResponse`].
    pub value: Vec<u8>,
    pub varied_headers: Headers,
    pub label: Option<String>,
    pub ttl: TimeDelta,
    pub surrogate_keys: Vec<String>,
}

impl MultiLevelEntry {
    pub fn new(
        real_key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        ttl: TimeDelta,
    ) -> Self {
        Self {
            real_key: real_key.into(),
            variant_key: None,
            value: value.into(),
            varied_headers: Headers::new(),
            label: None,
            ttl,
            surrogate_keys: Vec::new(),
        }
    }

    /// Entry whose value is the encoded `response`.
    pub fn from_response(
        real_key: impl Into<String>,
        response: &CachedResponse,
        ttl: TimeDelta,
    ) -> Result<Self, CodecError> {
        Ok(Self::new(real_key, codec::encode(response)?, ttl))
    }

    pub fn variant_key(mut self, key: impl Into<String>) -> Self {
        self.variant_key = Some(key.into());
        self
    }

    pub fn varied_headers(mut self, headers: Headers) -> Self {
        self.varied_headers = headers;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn surrogate_keys<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.surrogate_keys = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn resolved_variant_key(&self) -> String {
        match self.variant_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => keys::variant_key(
                &self.real_key,
                &self.varied_headers,
                self.label.as_deref(),
            ),
        }
    }
}

/// Negotiation context of an incoming request.
#[derive(Debug, Clone, Default)]
pub struct VariantRequest {
    pub headers: Headers,
    /// When set, only variants stored with this label match.
    pub label: Option<String>,
}

impl VariantRequest {
    pub fn new(headers: Headers) -> Self {
        Self {
            headers,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Every header the variant varied on must carry the same value in the
    /// request; a header missing on both sides counts as equal.
    pub fn matches(&self, record: &VariantRecord) -> bool {
        let headers_match = record.varied_headers.iter().all(|(name, value)| {
            let actual: Vec<&str> = self.headers.get_all(name).collect();
            actual.join(", ") == value
        });
        let label_match = match self.label.as_deref() {
            Some(label) => record.label.as_deref() == Some(label),
            None => true,
        };
        headers_match && label_match
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Past its TTL but inside the stale window.
    Stale,
}

/// A variant elected by [`Storer::get_multi_level`].
#[derive(Debug, Clone)]
pub struct VariantHit {
    pub key: String,
    /// Compressed bytes exactly as stored.
    pub payload: Vec<u8>,
    pub freshness: Freshness,
    pub record: VariantRecord,
}

impl VariantHit {
    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }

    pub fn decompress(&self) -> Result<Vec<u8>, CodecError> {
        compression::decompress(&self.payload)
    }

    /// Decompress and decode the stored response.
    pub fn response(&self) -> Result<CachedResponse, CodecError> {
        codec::unpack(&self.payload)
    }
}

#[derive(Debug, Default)]
pub struct PurgeReport {
    pub removed: Vec<String>,
    pub failed: Vec<(String, StorageError)>,
}

impl PurgeReport {
    pub fn count(&self) -> usize {
        self.removed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
