//! Real-key and surrogate-key index.
//!
//! The index is persisted in the same backend as the entries (see
//! [`keys`](crate::keys) for the layout), so it survives restarts exactly
//! when the engine does. Every mutation is a read-modify-write of a few
//! JSON records and runs under one lock, which keeps concurrent writers
//! for the same real key or tag from losing each other's updates.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::backend::KvBackend;
use crate::codec::Headers;
use crate::keys::{
    MAPPING_PREFIX, mapping_key, surrogate_key, variant_links_key,
};
use crate::{CodecError, StorageError};

/// What the index knows about one cached variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub stored_at: DateTime<Utc>,
    pub fresh_until: DateTime<Utc>,
    pub stale_until: DateTime<Utc>,
    /// Request headers this variant was negotiated on.
    #[serde(default)]
    pub varied_headers: Headers,
    #[serde(default)]
    pub label: Option<String>,
}

/// Variants cached for one real key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantMapping {
    pub variants: BTreeMap<String, VariantRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SurrogateSet {
    keys: BTreeSet<String>,
}

// Reverse links so a variant can be unindexed without scanning.
#[derive(Debug, Default, Serialize, Deserialize)]
struct VariantLinks {
    real_key: Option<String>,
    #[serde(default)]
    surrogates: BTreeSet<String>,
}

pub struct KeyIndex<B> {
    backend: Arc<B>,
    lock: Mutex<()>,
}

impl<B: KvBackend> KeyIndex<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
        }
    }

    /// Record `variant_key` as a cached variant of `real_key`.
    ///
    /// Variants of `real_key` whose stale window has passed are unindexed on
    /// the way. A variant indexed under another real key before is moved.
    pub fn index_variant(
        &self,
        real_key: &str,
        variant_key: &str,
        record: VariantRecord,
    ) -> Result<(), StorageError> {
        let _guard = self.lock.lock()?;
        self.index_variant_locked(real_key, variant_key, record)
    }

    /// Tag `variant_key` with every surrogate key in `tags`.
    pub fn index_surrogates<S: AsRef<str>>(
        &self,
        variant_key: &str,
        tags: &[S],
    ) -> Result<(), StorageError> {
        if tags.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock()?;
        self.index_surrogates_locked(variant_key, tags)
    }

    /// Run the entry write `write`, then index the variant under
    /// `real_key` and `tags`, all under the index lock. Nothing is indexed
    /// when the write fails.
    pub fn store_variant<S, F>(
        &self,
        real_key: &str,
        variant_key: &str,
        record: VariantRecord,
        tags: &[S],
        write: F,
    ) -> Result<(), StorageError>
    where
        S: AsRef<str>,
        F: FnOnce() -> Result<(), StorageError>,
    {
        let _guard = self.lock.lock()?;
        write()?;
        self.index_variant_locked(real_key, variant_key, record)?;
        self.index_surrogates_locked(variant_key, tags)
    }

    /// Run the entry removal `remove`, then unindex `variant_key`, under
    /// the index lock. The index is left untouched when the removal fails.
    pub fn drop_variant<F>(
        &self,
        variant_key: &str,
        remove: F,
    ) -> Result<(), StorageError>
    where
        F: FnOnce() -> Result<(), StorageError>,
    {
        let _guard = self.lock.lock()?;
        remove()?;
        self.remove_locked(variant_key)
    }

    fn index_variant_locked(
        &self,
        real_key: &str,
        variant_key: &str,
        record: VariantRecord,
    ) -> Result<(), StorageError> {
        let now = Utc::now();

        let mapping: VariantMapping = self.load(&mapping_key(real_key))?;
        let outdated: Vec<String> = mapping
            .variants
            .iter()
            .filter(|(k, r)| k.as_str() != variant_key && r.stale_until <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &outdated {
            debug!(real_key, variant_key = %key, "pruning outdated variant");
            self.remove_locked(key)?;
        }

        let mut links: VariantLinks = self.load(&variant_links_key(variant_key))?;
        if let Some(previous) = links.real_key.as_deref().filter(|p| *p != real_key)
        {
            let mut old: VariantMapping = self.load(&mapping_key(previous))?;
            old.variants.remove(variant_key);
            self.save_mapping(previous, &old)?;
        }

        let mut mapping: VariantMapping = self.load(&mapping_key(real_key))?;
        mapping.variants.insert(variant_key.to_string(), record);
        self.save_mapping(real_key, &mapping)?;

        links.real_key = Some(real_key.to_string());
        self.save_links(variant_key, &links)
    }

    fn index_surrogates_locked<S: AsRef<str>>(
        &self,
        variant_key: &str,
        tags: &[S],
    ) -> Result<(), StorageError> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut links: VariantLinks = self.load(&variant_links_key(variant_key))?;
        for tag in tags.iter().map(|t| t.as_ref()).filter(|t| !t.is_empty()) {
            let key = surrogate_key(tag);
            let mut set: SurrogateSet = self.load(&key)?;
            if set.keys.insert(variant_key.to_string()) {
                self.save(&key, &set)?;
            }
            links.surrogates.insert(tag.to_string());
        }
        self.save_links(variant_key, &links)
    }

    pub fn lookup_variants(
        &self,
        real_key: &str,
    ) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.variant_records(real_key)?.variants.into_keys().collect())
    }

    pub fn variant_records(
        &self,
        real_key: &str,
    ) -> Result<VariantMapping, StorageError> {
        self.load(&mapping_key(real_key))
    }

    pub fn lookup_by_surrogate(
        &self,
        tag: &str,
    ) -> Result<BTreeSet<String>, StorageError> {
        let set: SurrogateSet = self.load(&surrogate_key(tag))?;
        Ok(set.keys)
    }

    /// Drop `variant_key` from its real key and from every tag. Absent keys
    /// are a no-op.
    pub fn remove_variant(&self, variant_key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock()?;
        self.remove_locked(variant_key)
    }

    /// Unindex every variant whose stale window ended before `now`, across
    /// all real keys. Returns the unindexed variant keys.
    pub fn prune_outdated(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StorageError> {
        let _guard = self.lock.lock()?;
        let mut outdated = Vec::new();
        for (key, raw) in self.backend.raw_iterate(MAPPING_PREFIX)? {
            let mapping: VariantMapping = serde_json::from_slice(&raw).map_err(
                |e| CodecError::Deserialization(format!("{key}: {e}")),
            )?;
            outdated.extend(
                mapping
                    .variants
                    .into_iter()
                    .filter(|(_, r)| r.stale_until <= now)
                    .map(|(k, _)| k),
            );
        }
        for key in &outdated {
            self.remove_locked(key)?;
        }
        Ok(outdated)
    }

    fn remove_locked(&self, variant_key: &str) -> Result<(), StorageError> {
        let links_key = variant_links_key(variant_key);
        let Some(links) = self.load_opt::<VariantLinks>(&links_key)? else {
            return Ok(());
        };

        if let Some(real_key) = links.real_key.as_deref() {
            let mut mapping: VariantMapping = self.load(&mapping_key(real_key))?;
            if mapping.variants.remove(variant_key).is_some() {
                self.save_mapping(real_key, &mapping)?;
            }
        }

        for tag in &links.surrogates {
            let key = surrogate_key(tag);
            let mut set: SurrogateSet = self.load(&key)?;
            if set.keys.remove(variant_key) {
                if set.keys.is_empty() {
                    self.backend.raw_delete(&key)?;
                } else {
                    self.save(&key, &set)?;
                }
            }
        }

        self.backend.raw_delete(&links_key)
    }

    fn save_mapping(
        &self,
        real_key: &str,
        mapping: &VariantMapping,
    ) -> Result<(), StorageError> {
        let key = mapping_key(real_key);
        if mapping.variants.is_empty() {
            return self.backend.raw_delete(&key);
        }
        self.save(&key, mapping)
    }

    fn save_links(
        &self,
        variant_key: &str,
        links: &VariantLinks,
    ) -> Result<(), StorageError> {
        self.save(&variant_links_key(variant_key), links)
    }

    fn load<T: DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<T, StorageError> {
        Ok(self.load_opt(key)?.unwrap_or_default())
    }

    fn load_opt<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.backend.raw_get(key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| CodecError::Deserialization(format!("{key}: {e}")).into()),
        }
    }

    fn save<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(value)
            .map_err(|e| CodecError::Serialization(e.to_string()))?;
        // Index records never expire on their own; see `prune_outdated`.
        self.backend.raw_set(key, raw, None)
    }
}

impl<B> std::fmt::Debug for KeyIndex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyIndex").finish()
    }
}
