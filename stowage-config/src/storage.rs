//! Typed storage section of the configuration file.
//!
//! ```yaml
//! storage:
//!   backend: fjall
//!   path: /var/cache/stowage
//!   stale_secs: 30
//!   default_ttl_secs: 300
//!   sweep_interval_secs: 60
//! ```
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::config::{get_value_recursive, load_yaml};

/// Longest accepted TTL or stale window: 100 years.
pub const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Embedded KV engine used to back a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Fjall,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Fjall => "fjall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Directory of the on-disk engine. Required for `fjall`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Extra time a variant is kept and served as stale after its TTL.
    #[serde(default)]
    pub stale_secs: u64,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Interval of the background expiry sweep, disabled when absent.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

fn default_ttl_secs() -> u64 {
    120
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: None,
            stale_secs: 0,
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: None,
        }
    }
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn fjall(path: impl AsRef<Path>) -> Self {
        Self {
            backend: BackendKind::Fjall,
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Build from an already parsed `storage` section.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Self, ConfigError> {
        let config: StorageConfig = serde_yaml::from_value(value.clone())?;
        config.validate()?;
        Ok(config)
    }

    /// Read the `storage` section of a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = load_yaml(path)?;
        let section = get_value_recursive(&root, &["storage"])
            .ok_or_else(|| ConfigError::MissingSection("storage".to_string()))?;
        Self::from_config(section)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == BackendKind::Fjall && self.path.is_none() {
            return Err(ConfigError::Invalid(
                "fjall backend requires `path`".to_string(),
            ));
        }
        for (name, secs) in [
            ("stale_secs", self.stale_secs),
            ("default_ttl_secs", self.default_ttl_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must not exceed {MAX_WINDOW_SECS}"
                )));
            }
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stale(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_memory() {
        let config = StorageConfig::from_config(&serde_yaml::Value::Mapping(
            Default::default(),
        ))
        .unwrap();
        assert_eq!(config, StorageConfig::default());
        assert_eq!(config.default_ttl(), Duration::from_secs(120));
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn parses_fjall_section() {
        let yaml = r#"
        backend: fjall
        path: /tmp/stowage
        stale_secs: 15
        sweep_interval_secs: 5
        "#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let config = StorageConfig::from_config(&value).unwrap();

        assert_eq!(config.backend, BackendKind::Fjall);
        assert_eq!(config.path, Some(PathBuf::from("/tmp/stowage")));
        assert_eq!(config.stale(), Duration::from_secs(15));
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn fjall_without_path_is_invalid() {
        let value: serde_yaml::Value =
            serde_yaml::from_str("backend: fjall").unwrap();
        let res = StorageConfig::from_config(&value);
        assert!(matches!(res, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn oversized_windows_are_invalid() {
        let value: serde_yaml::Value =
            serde_yaml::from_str("stale_secs: 18446744073709551615").unwrap();
        let res = StorageConfig::from_config(&value);
        assert!(matches!(res, Err(ConfigError::Invalid(_))));

        let config = StorageConfig {
            default_ttl_secs: MAX_WINDOW_SECS + 1,
            ..StorageConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StorageConfig {
            stale_secs: MAX_WINDOW_SECS,
            ..StorageConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let value: serde_yaml::Value =
            serde_yaml::from_str("backend: badger").unwrap();
        let res = StorageConfig::from_config(&value);
        assert!(matches!(res, Err(ConfigError::YamlParse(_))));
    }

    #[test]
    fn loads_from_file() {
        let config = StorageConfig::from_file("tests/simple_config.yml").unwrap();
        assert_eq!(config.backend, BackendKind::Fjall);
        assert_eq!(config.stale_secs, 30);
        assert_eq!(config.default_ttl_secs, 300);
    }

    #[test]
    fn missing_section_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "logging:\n  filter: info\n").unwrap();

        let res = StorageConfig::from_file(&path);
        assert!(matches!(res, Err(ConfigError::MissingSection(_))));
    }
}
