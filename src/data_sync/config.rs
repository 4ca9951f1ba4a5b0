use crate::utils::config_loader::{
    LoadConfigError, SectionLoader, SectionLoaderSync, load_from_file, load_from_file_sync,
};
use crate::utils::constants::{FEED_LIMIT, POLL_INTERVAL, REGISTRY_REFRESH_INTERVAL};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the collection sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Minimum seconds between two unforced directory refreshes
    pub registry_refresh_interval_secs: u64,
    /// Seconds between two poll cycles of the same bucket
    pub poll_interval_secs: u64,
    /// Maximum number of entries kept in the feed
    pub feed_limit: usize,
    /// Where the state snapshot is stored, if anywhere
    pub state_path: Option<PathBuf>,
}

#[derive(Clone, Deserialize, Debug)]
struct SyncConfigRoot {
    sync: SyncConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            registry_refresh_interval_secs: REGISTRY_REFRESH_INTERVAL.as_secs(),
            poll_interval_secs: POLL_INTERVAL.as_secs(),
            feed_limit: FEED_LIMIT,
            state_path: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable source on top of the defaults.
    pub fn from_vars<F>(var: F) -> eyre::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(interval_str) = var("REGISTRY_REFRESH_INTERVAL_SECS") {
            config.registry_refresh_interval_secs = interval_str
                .parse()
                .map_err(|e| eyre::eyre!("Invalid REGISTRY_REFRESH_INTERVAL_SECS: {}", e))?;
        }

        if let Some(interval_str) = var("POLL_INTERVAL_SECS") {
            config.poll_interval_secs =
                interval_str.parse().map_err(|e| eyre::eyre!("Invalid POLL_INTERVAL_SECS: {}", e))?;
        }

        if let Some(limit_str) = var("FEED_LIMIT") {
            config.feed_limit =
                limit_str.parse().map_err(|e| eyre::eyre!("Invalid FEED_LIMIT: {}", e))?;
        }

        if let Some(path) = var("STATE_PATH") {
            config.state_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoadConfigError> {
        if self.feed_limit == 0 {
            return Err(LoadConfigError::ConfigError("feed_limit must be at least 1".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(LoadConfigError::ConfigError("poll_interval_secs must be at least 1".to_string()));
        }
        if self.registry_refresh_interval_secs == 0 {
            return Err(LoadConfigError::ConfigError("registry_refresh_interval_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn registry_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.registry_refresh_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[async_trait]
impl SectionLoader for SyncConfig {
    type SectionType = SyncConfig;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: SyncConfigRoot = load_from_file(file_name).await?;
        root.sync.validate()?;
        Ok(root.sync)
    }
}

impl SectionLoaderSync for SyncConfig {
    type SectionType = SyncConfig;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: SyncConfigRoot = load_from_file_sync(file_name)?;
        root.sync.validate()?;
        Ok(root.sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.registry_refresh_interval_secs, 600);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.feed_limit, 100);
        assert!(config.state_path.is_none());
    }

    #[test]
    fn test_durations() {
        let config = SyncConfig::default();
        assert_eq!(config.registry_refresh_interval(), Duration::from_secs(600));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_vars_overrides() {
        let vars: HashMap<&str, &str> =
            [("POLL_INTERVAL_SECS", "2"), ("FEED_LIMIT", "25"), ("STATE_PATH", "/tmp/feed.json")].into();
        let config = SyncConfig::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.feed_limit, 25);
        assert_eq!(config.state_path, Some(PathBuf::from("/tmp/feed.json")));
        assert_eq!(config.registry_refresh_interval_secs, 600);
    }

    #[test]
    fn test_from_vars_rejects_garbage() {
        assert!(SyncConfig::from_vars(|k| (k == "FEED_LIMIT").then(|| "lots".to_string())).is_err());
        assert!(SyncConfig::from_vars(|k| (k == "FEED_LIMIT").then(|| "0".to_string())).is_err());
    }

    #[test]
    fn test_load_section_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\npoll_interval_secs = 1\nfeed_limit = 10\n").unwrap();

        let config = SyncConfig::load_section_from_file_sync(path.to_string_lossy().to_string()).unwrap();
        assert_eq!(config.poll_interval_secs, 1);
        assert_eq!(config.feed_limit, 10);
        assert_eq!(config.registry_refresh_interval_secs, 600);
    }

    #[tokio::test]
    async fn test_load_section_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\npoll_every = 1\n").unwrap();

        let result = SyncConfig::load_section_from_file(path.to_string_lossy().to_string()).await;
        assert!(matches!(result, Err(LoadConfigError::TomlError(_))));
    }
}
