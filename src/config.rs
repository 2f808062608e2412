//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use log::warn;

use crate::fetch::DownloadConfig;
use crate::timestamp::TimezonePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default guide source for the CLI
    #[serde(default)]
    pub guide_url: String,
    /// Age after which cached guide data is treated as absent
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default)]
    pub timezone_policy: TimezonePolicy,
    /// How many upcoming programs to list
    #[serde(default = "default_next_count")]
    pub next_count: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Overrides the platform data directory for persisted snapshots
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

fn default_retention_secs() -> u64 { 3600 }
fn default_next_count() -> usize { 5 }
fn default_user_agent() -> String { DownloadConfig::default().user_agent }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 2000 }
fn default_connect_timeout() -> u64 { 30 }
fn default_read_timeout() -> u64 { 120 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            guide_url: String::new(),
            retention_secs: default_retention_secs(),
            timezone_policy: TimezonePolicy::default(),
            next_count: default_next_count(),
            user_agent: default_user_agent(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            store_dir: None,
        }
    }
}

impl EngineConfig {
    /// `<config dir>/guide_engine/config.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("guide_engine");
        path.push("config.json");
        path
    }

    /// Load from the default location; missing or unreadable files give defaults
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => warn!("Ignoring invalid config {}: {}", path.display(), e),
                },
                Err(e) => warn!("Cannot read config {}: {}", path.display(), e),
            }
        }

        Self::default()
    }

    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn retention(&self) -> TimeDelta {
        TimeDelta::try_seconds(i64::try_from(self.retention_secs).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            connect_timeout_secs: self.connect_timeout_secs,
            read_timeout_secs: self.read_timeout_secs,
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(crate::store::FileBlobStore::default_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"guide_url": "http://x/epg.xml"}"#).unwrap();
        assert_eq!(config.guide_url, "http://x/epg.xml");
        assert_eq!(config.retention_secs, 3600);
        assert_eq!(config.next_count, 5);
        assert_eq!(config.timezone_policy, TimezonePolicy::LocalWallClock);
        assert_eq!(config.retention(), TimeDelta::hours(1));
    }

    #[test]
    fn test_timezone_policy_names() {
        let config: EngineConfig = serde_json::from_str(r#"{"timezone_policy": "honor_offset"}"#).unwrap();
        assert_eq!(config.timezone_policy, TimezonePolicy::HonorOffset);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.json");

        let config = EngineConfig {
            retention_secs: 120,
            max_retries: 1,
            ..EngineConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path), config);
        assert_eq!(config.download_config().max_retries, 1);
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(EngineConfig::load_from(&path), EngineConfig::default());
    }
}
