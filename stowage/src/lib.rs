//! # stowage
//!
//! Cache storage for HTTP proxies, crawlers and other response-heavy
//! applications. Responses are kept as compressed byte buffers with a TTL,
//! indexed by the resource they belong to and by surrogate tags so that
//! whole groups can be found or purged in one call.
//!
//! ## Features
//!
//! - **Pluggable engines**: in-memory for tests and short-lived processes,
//!   [fjall](https://docs.rs/fjall) for a persistent embedded store.
//! - **Multi-level keys**: one real key, many negotiated variants, with
//!   fresh/stale election on read.
//! - **Surrogate keys**: tag variants and purge by tag.
//! - **YAML configuration** and a factory that assembles a ready store.
//!
//! ## Getting Started
//!
//! ```toml
//! [dependencies]
//! stowage = "0.1"
//! ```
//!
//! ```no_run
//! use stowage::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! stowage::observability::init_tracing(None)?;
//! let handle = build_storer(&StorageConfig::memory()).await?;
//! let entry = MultiLevelEntry::new("https://example.com/", b"body".to_vec(), TimeDelta::minutes(5))
//!     .surrogate_keys(["home"]);
//! handle.storer.set_multi_level(entry).await?;
//! handle.storer.purge_by_surrogate("home").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - `config`: YAML configuration and [`StorageConfig`](config::StorageConfig).
//! - `core`: the storage contract, engines, index and response codec.
//! - `observability`: tracing subscriber setup.
pub mod observability;
pub mod prelude;
pub use stowage_config as config;
pub use stowage_core as core;
// re-export
pub use async_trait;
pub use bytes;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use tracing_subscriber;
