//! Unit tests for coordinator configuration

#[cfg(test)]
mod tests {
    use crate::client::config::{Config, RpcAuth, DEFAULT_SYNC_HEIGHT};
    use crate::types::{StartBound, WatchTarget};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.sync_height, DEFAULT_SYNC_HEIGHT);
        assert_eq!(config.sync_height, 81373);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.status_interval, Duration::from_secs(5));
        assert_eq!(config.store_open_timeout, Duration::from_secs(5));
        assert!(!config.persist_to_disk);
        assert!(config.rescan.is_none());
        assert!(config.handle_signals);
        assert_eq!(config.rpc.auth, RpcAuth::None);
        assert!(config.data_dir.ends_with(".spv-rescan/data"));
        assert!(config.log_dir.ends_with(".spv-rescan"));
    }

    #[test]
    fn test_builder_pattern() {
        let watch = WatchTarget::from_hex("0014abcd").unwrap();
        let config = Config::default()
            .with_data_dir("/test/data")
            .with_log_dir("/test/logs")
            .with_persist_to_disk(true)
            .with_sync_height(100)
            .with_poll_interval(Duration::from_secs(1))
            .with_rescan(watch.clone(), StartBound::Height(42))
            .without_signal_handling();

        assert_eq!(config.store_path(), PathBuf::from("/test/data/filters.db"));
        assert_eq!(config.log_file(), PathBuf::from("/test/logs/spv-rescan.log"));
        assert!(config.persist_to_disk);
        assert_eq!(config.sync_height, 100);
        assert!(!config.handle_signals);

        let rescan = config.rescan.unwrap();
        assert_eq!(rescan.watch, watch);
        assert_eq!(rescan.start, StartBound::Height(42));
    }

    #[test]
    fn test_validation_creates_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("nested").join("data");
        let config = Config::default().with_data_dir(&data_dir);

        config.validate().unwrap();
        assert!(data_dir.is_dir());
    }

    #[test]
    fn test_validation_rejects_zero_intervals() {
        let temp_dir = TempDir::new().unwrap();

        let config = Config::default()
            .with_data_dir(temp_dir.path())
            .with_poll_interval(Duration::ZERO);
        assert!(config.validate().unwrap_err().contains("poll_interval"));

        let config = Config::default()
            .with_data_dir(temp_dir.path())
            .with_status_interval(Duration::ZERO);
        assert!(config.validate().unwrap_err().contains("status_interval"));
    }
}
