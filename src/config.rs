//! Configuration for the attendance service.

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the record store and the activity log
    pub data_path: PathBuf,

    /// IANA time zone that decides which calendar day a sighting belongs to
    pub timezone: String,

    /// Largest gap between sightings that still counts as one session (seconds)
    pub merge_threshold_secs: u64,

    /// Trailing window for live presence (minutes)
    pub live_window_minutes: u64,

    /// How often each module's rotation timer fires (seconds)
    pub tick_interval_secs: u64,

    /// Attempts at merging a sighting before a write conflict is surfaced
    pub max_merge_retries: u32,

    /// Optional JSON file of member identities
    pub identity_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("beacon-attendance");

        Self {
            data_path: data_dir,
            timezone: "UTC".to_string(),
            merge_threshold_secs: 300, // 5 minutes
            live_window_minutes: 5,
            tick_interval_secs: 60,
            max_merge_retries: 5,
            identity_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("beacon-attendance")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Directory of the record store.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store")
    }

    pub fn activity_path(&self) -> PathBuf {
        self.data_path.join("activity.json")
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn merge_threshold(&self) -> Result<Duration, ConfigError> {
        i64::try_from(self.merge_threshold_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "merge_threshold_secs {} is out of range",
                    self.merge_threshold_secs
                ))
            })
    }

    pub fn live_window(&self) -> Result<Duration, ConfigError> {
        if self.live_window_minutes == 0 {
            return Err(ConfigError::Invalid(
                "live_window_minutes must be greater than zero".to_string(),
            ));
        }
        i64::try_from(self.live_window_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "live_window_minutes {} is out of range",
                    self.live_window_minutes
                ))
            })
    }

    pub fn tick_interval(&self) -> Result<std::time::Duration, ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(std::time::Duration::from_secs(self.tick_interval_secs))
    }

    /// Check every field that can be wrong without touching the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        self.tick_interval()?;
        self.merge_threshold()?;
        self.live_window()?;
        if self.max_merge_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_merge_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown time zone: {0}")]
    UnknownTimezone(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
