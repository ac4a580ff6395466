use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::KvBackend;
use crate::index::{KeyIndex, VariantRecord};
use crate::stats::{StatsSnapshot, StorageStats};
use crate::storer::{
    Freshness, MultiLevelEntry, PurgeReport, Storer, VariantHit, VariantRequest,
};
use crate::{StorageError, compression, keys};

/// Cache store over any [`KvBackend`].
///
/// Owns the backend handle; share it as an
/// [`AbstractStorer`](crate::AbstractStorer) or behind an `Arc`.
pub struct Storage<B: KvBackend> {
    backend: Arc<B>,
    index: KeyIndex<B>,
    stale: TimeDelta,
    uuid: String,
    stats: StorageStats,
}

impl<B: KvBackend> Storage<B> {
    pub fn new(backend: B) -> Self {
        let backend = Arc::new(backend);
        let stale = TimeDelta::zero();
        Self {
            index: KeyIndex::new(backend.clone()),
            uuid: store_uuid(backend.as_ref(), stale),
            backend,
            stale,
            stats: StorageStats::new(),
        }
    }

    /// How long variants outlive their TTL as stale copies.
    pub fn with_stale(mut self, stale: std::time::Duration) -> Self {
        self.stale = TimeDelta::from_std(stale)
            .unwrap_or(TimeDelta::MAX)
            .min(max_lifetime());
        self.uuid = store_uuid(self.backend.as_ref(), self.stale);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn index(&self) -> &KeyIndex<B> {
        &self.index
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Eagerly drop expired entries and unindex outdated variants.
    pub fn sweep_expired(&self) -> Result<usize, StorageError> {
        let now = Utc::now();
        let pruned = self.index.prune_outdated(now)?;
        let evicted = self.backend.evict_expired(now)?;
        if evicted > 0 || !pruned.is_empty() {
            debug!(evicted, unindexed = pruned.len(), "expiry sweep");
        }
        Ok(evicted)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `every` on the
    /// current tokio runtime until the handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()>
    where
        B: 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(err) = self.sweep_expired() {
                    warn!(?err, "expiry sweep failed");
                }
            }
        })
    }

    // Removes the entry and unindexes it as one step.
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.index
            .drop_variant(key, || self.backend.raw_delete(&keys::entry_key(key)))
    }

    fn evict(&self, key: &str) -> Result<(), StorageError> {
        self.remove(key)?;
        self.stats.record_eviction();
        debug!(key, "non-positive ttl, evicted");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.backend.raw_get(&keys::entry_key(key)) {
            // Unreadable envelopes are treated as absent.
            Err(StorageError::Codec(err)) => {
                warn!(key, %err, "corrupted entry treated as absent");
                Ok(None)
            }
            other => other,
        }
    }

    // Caller entries under `prefix`, keyed by caller key.
    fn user_entries(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        Ok(self
            .backend
            .raw_iterate(&keys::entry_key(prefix))?
            .into_iter()
            .filter_map(|(slot, value)| {
                keys::user_key(&slot).map(|key| (key.to_string(), value))
            })
            .collect())
    }
}

#[async_trait]
impl<B: KvBackend> Storer for Storage<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    async fn init(&self) -> Result<(), StorageError> {
        self.backend.open()?;
        info!(backend = self.name(), location = %self.backend.location(), "storage ready");
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.backend.close()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self.read(key)?;
        match value {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: TimeDelta,
    ) -> Result<(), StorageError> {
        if ttl <= TimeDelta::zero() {
            return self.evict(key);
        }
        let expires_at = deadline(Utc::now(), ttl);
        self.backend
            .raw_set(&keys::entry_key(key), value, Some(expires_at))?;
        self.stats.record_set();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.remove(key)?;
        self.stats.record_delete();
        Ok(())
    }

    async fn delete_many(&self, pattern: &str) -> Result<usize, StorageError> {
        let re = Regex::new(pattern)?;
        let mut deleted = 0;
        for (key, _) in self.user_entries("")? {
            if re.is_match(&key) {
                self.delete(&key).await?;
                deleted += 1;
            }
        }
        debug!(pattern, deleted, "delete_many");
        Ok(deleted)
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.user_entries("")?.into_iter().map(|(k, _)| k).collect())
    }

    async fn map_keys(
        &self,
        prefix: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        Ok(self
            .user_entries(prefix)?
            .into_iter()
            .map(|(key, value)| (key[prefix.len()..].to_string(), value))
            .collect())
    }

    async fn reset(&self) -> Result<(), StorageError> {
        self.backend.clear()?;
        info!(backend = self.name(), "storage reset");
        Ok(())
    }

    async fn set_multi_level(
        &self,
        entry: MultiLevelEntry,
    ) -> Result<(), StorageError> {
        let variant_key = entry.resolved_variant_key();
        if entry.ttl <= TimeDelta::zero() {
            return self.evict(&variant_key);
        }

        // Compress the whole value before the single write.
        let compressed = compression::compress(&entry.value)?;
        let now = Utc::now();
        let fresh_until = deadline(now, entry.ttl);
        let stale_until = deadline(fresh_until, self.stale);

        let record = VariantRecord {
            stored_at: now,
            fresh_until,
            stale_until,
            varied_headers: entry.varied_headers,
            label: entry.label,
        };
        let slot = keys::entry_key(&variant_key);
        self.index.store_variant(
            &entry.real_key,
            &variant_key,
            record,
            &entry.surrogate_keys,
            || self.backend.raw_set(&slot, compressed, Some(stale_until)),
        )?;

        self.stats.record_set();
        debug!(
            real_key = %entry.real_key,
            variant_key = %variant_key,
            size = entry.value.len(),
            surrogates = entry.surrogate_keys.len(),
            "stored variant"
        );
        Ok(())
    }

    async fn get_multi_level(
        &self,
        real_key: &str,
        request: &VariantRequest,
    ) -> Result<Option<VariantHit>, StorageError> {
        let now = Utc::now();
        let mut candidates: Vec<(String, VariantRecord)> = self
            .index
            .variant_records(real_key)?
            .variants
            .into_iter()
            .filter(|(_, record)| request.matches(record) && now < record.stale_until)
            .collect();
        // Newest first; fresh variants ahead of stale ones.
        candidates.sort_by(|(_, a), (_, b)| b.stored_at.cmp(&a.stored_at));
        candidates.sort_by_key(|(_, record)| now >= record.fresh_until);

        for (key, record) in candidates {
            // The entry may already be gone while the index lags behind.
            let Some(payload) = self.read(&key)? else {
                continue;
            };
            let freshness = if now < record.fresh_until {
                Freshness::Fresh
            } else {
                Freshness::Stale
            };
            self.stats.record_hit();
            return Ok(Some(VariantHit {
                key,
                payload,
                freshness,
                record,
            }));
        }

        self.stats.record_miss();
        Ok(None)
    }

    async fn lookup_variants(
        &self,
        real_key: &str,
    ) -> Result<BTreeSet<String>, StorageError> {
        self.index.lookup_variants(real_key)
    }

    async fn lookup_by_surrogate(
        &self,
        tag: &str,
    ) -> Result<BTreeSet<String>, StorageError> {
        self.index.lookup_by_surrogate(tag)
    }

    async fn purge_by_surrogate(
        &self,
        tag: &str,
    ) -> Result<PurgeReport, StorageError> {
        let mut report = PurgeReport::default();
        for key in self.index.lookup_by_surrogate(tag)? {
            match self.remove(&key) {
                Ok(()) => report.removed.push(key),
                Err(err) => {
                    warn!(tag, key = %key, ?err, "failed to purge variant");
                    report.failed.push((key, err));
                }
            }
        }

        self.stats.record_purged(report.count());
        info!(
            tag,
            removed = report.count(),
            failed = report.failed.len(),
            "purged surrogate key"
        );
        Ok(report)
    }
}

// Upper bound on any TTL or stale window.
fn max_lifetime() -> TimeDelta {
    TimeDelta::days(100 * 365)
}

// `from + span`, with `span` clamped to `max_lifetime`.
fn deadline(from: DateTime<Utc>, span: TimeDelta) -> DateTime<Utc> {
    from.checked_add_signed(span.min(max_lifetime()))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn store_uuid<B: KvBackend>(backend: &B, stale: TimeDelta) -> String {
    let descriptor = format!(
        "{}|{}|{}",
        backend.name(),
        backend.location(),
        stale.num_milliseconds()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, descriptor.as_bytes()).to_string()
}

impl<B: KvBackend> std::fmt::Debug for Storage<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend.name())
            .field("uuid", &self.uuid)
            .field("stale", &self.stale)
            .finish()
    }
}
