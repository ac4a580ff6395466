pub mod config;
pub mod storage;

pub use config::{ConfigError, Configurable};
pub use storage::{BackendKind, StorageConfig};
