#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use stowage_config::{BackendKind, StorageConfig};
    use stowage_core::{StorageError, build_storer};

    #[tokio::test]
    async fn test_build_memory_storer() {
        let handle = build_storer(&StorageConfig::memory()).await.unwrap();
        assert_eq!(handle.storer.name(), "memory");
        assert!(!handle.has_sweeper());
        assert_eq!(handle.default_ttl, Duration::from_secs(120));

        let storer = handle.storer();
        storer.set("k", b"v".to_vec(), TimeDelta::minutes(1)).await.unwrap();
        assert_eq!(storer.get("k").await.unwrap(), Some(b"v".to_vec()));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_build_fjall_storer_with_sweeper() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::fjall(dir.path());
        config.sweep_interval_secs = Some(1);
        config.stale_secs = 10;

        let handle = build_storer(&config).await.unwrap();
        assert_eq!(handle.storer.name(), "fjall");
        assert!(handle.has_sweeper());

        handle
            .storer
            .set("persisted", b"yes".to_vec(), TimeDelta::minutes(1))
            .await
            .unwrap();
        handle.shutdown().await.unwrap();

        let reopened = build_storer(&StorageConfig::fjall(dir.path())).await.unwrap();
        assert_eq!(
            reopened.storer.get("persisted").await.unwrap(),
            Some(b"yes".to_vec())
        );
    }

    #[tokio::test]
    async fn test_invalid_config_is_init_failure() {
        let config = StorageConfig {
            backend: BackendKind::Fjall,
            path: None,
            ..StorageConfig::memory()
        };
        let res = build_storer(&config).await;
        assert!(matches!(res, Err(StorageError::InitFailure(_))));
    }

    #[tokio::test]
    async fn test_oversized_stale_window_is_init_failure() {
        let mut config = StorageConfig::memory();
        config.stale_secs = u64::MAX;
        let res = build_storer(&config).await;
        assert!(matches!(res, Err(StorageError::InitFailure(_))));
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let mut config = StorageConfig::memory();
        config.sweep_interval_secs = Some(1);
        let handle = build_storer(&config).await.unwrap();

        handle
            .storer
            .set("brief", b"v".to_vec(), TimeDelta::milliseconds(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(handle.storer.list_keys().await.unwrap().is_empty());
    }
}
