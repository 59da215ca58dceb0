//! Application configuration management.
//!
//! Configuration is stored at `~/.config/biolearn/config.json` and holds the
//! backend URL, the data directory used for the persisted session, the
//! refresh loop period and the last email used to sign in.
//!
//! Environment variables override the file:
//! - `BIOLEARN_API_URL`: backend base URL
//! - `BIOLEARN_DATA_DIR`: directory for persisted session keys

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data directory paths
const APP_NAME: &str = "biolearn";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend used when nothing else is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Refresh loop period in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_API_URL: &str = "BIOLEARN_API_URL";
const ENV_DATA_DIR: &str = "BIOLEARN_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub data_dir: Option<PathBuf>,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            data_dir: None,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load config, falling back to defaults (with env overrides) on any error.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                let mut config = Self::default();
                config.apply_env();
                config
            }
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session keys.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn refresh_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic.
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
