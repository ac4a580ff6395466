//! Build a ready-to-use [`AbstractStorer`] from a [`StorageConfig`].
use std::sync::Arc;
use std::time::Duration;

use stowage_config::{BackendKind, StorageConfig};
use tokio::task::JoinHandle;
use tracing::info;

use crate::backend::{KvBackend, MemoryKv};
use crate::{AbstractStorer, Storage, StorageError, Storer};

/// An initialized store plus its background expiry sweeper, if any.
///
/// Dropping the handle stops the sweeper; the store itself lives on as
/// long as clones of [`storer`](Self::storer) do.
pub struct StorerHandle {
    pub storer: AbstractStorer,
    pub default_ttl: Duration,
    sweeper: Option<JoinHandle<()>>,
}

impl StorerHandle {
    pub fn storer(&self) -> AbstractStorer {
        self.storer.clone()
    }

    pub fn has_sweeper(&self) -> bool {
        self.sweeper.is_some()
    }

    /// Stop the sweeper and close the store.
    pub async fn shutdown(mut self) -> Result<(), StorageError> {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        self.storer.close().await
    }
}

impl Drop for StorerHandle {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl std::fmt::Debug for StorerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorerHandle")
            .field("backend", &self.storer.name())
            .field("uuid", &self.storer.uuid())
            .field("sweeper", &self.sweeper.is_some())
            .finish()
    }
}

/// Validate `config`, open the configured backend and start the sweeper
/// when `sweep_interval_secs` is set. Must run inside a tokio runtime.
pub async fn build_storer(
    config: &StorageConfig,
) -> Result<StorerHandle, StorageError> {
    config
        .validate()
        .map_err(|e| StorageError::InitFailure(e.to_string()))?;

    let handle = match config.backend {
        BackendKind::Memory => assemble(MemoryKv::new(), config).await?,
        BackendKind::Fjall => build_fjall(config).await?,
    };
    info!(
        backend = config.backend.as_str(),
        uuid = handle.storer.uuid(),
        sweeper = handle.has_sweeper(),
        "storer built"
    );
    Ok(handle)
}

#[cfg(feature = "fjall")]
async fn build_fjall(config: &StorageConfig) -> Result<StorerHandle, StorageError> {
    let path = config.path.as_ref().ok_or_else(|| {
        StorageError::InitFailure("fjall backend requires a path".to_string())
    })?;
    assemble(crate::backend::FjallKv::new(path), config).await
}

#[cfg(not(feature = "fjall"))]
async fn build_fjall(_config: &StorageConfig) -> Result<StorerHandle, StorageError> {
    Err(StorageError::InitFailure(
        "fjall backend not compiled in, enable the `fjall` feature".to_string(),
    ))
}

async fn assemble<B: KvBackend + 'static>(
    backend: B,
    config: &StorageConfig,
) -> Result<StorerHandle, StorageError> {
    let storage = Arc::new(Storage::new(backend).with_stale(config.stale()));
    storage.init().await?;

    let sweeper = config
        .sweep_interval()
        .map(|every| storage.clone().spawn_sweeper(every));

    Ok(StorerHandle {
        storer: storage,
        default_ttl: config.default_ttl(),
        sweeper,
    })
}
