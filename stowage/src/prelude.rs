pub use crate::config::{BackendKind, Configurable, StorageConfig};
pub use crate::core::codec::{CachedResponse, Headers};
pub use crate::core::{
    AbstractStorer, Freshness, MultiLevelEntry, PurgeReport, StorageError,
    Storer, StorerHandle, VariantHit, VariantRequest, build_storer,
};
pub use chrono::TimeDelta;
