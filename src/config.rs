use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::DEFAULT_QUERY_TIMEOUT;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Upper bound for a single store operation.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("beagle-store");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("beagle.db").to_string_lossy().to_string()
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read the config at `path`, writing the defaults there on first use.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            if config.query_timeout_secs == 0 {
                return Err(AppError::Config(
                    "query_timeout_secs must be greater than zero".to_string(),
                ));
            }
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("beagle-store")
            .join("config.toml")
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}
