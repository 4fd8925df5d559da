use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Largest identifier batch the remote API accepts in one call.
pub const MAX_CHUNK_SIZE: usize = 10;

const DEFAULT_API_URL: &str = "https://wikidot.com/xml-rpc-api.php";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_sites")]
    pub sites: Vec<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    pub api_user: Option<String>,
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Pause before every remote call, in milliseconds.
    #[serde(default)]
    pub request_interval_ms: u64,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_export_dir")]
    pub export_dir: String,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Backoff bounds for every remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_secs: u64,
    #[serde(default = "default_min_wait")]
    pub min_wait_secs: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wikidot-mirror");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("wikidot.db").to_string_lossy().to_string()
}

fn default_sites() -> Vec<String> {
    ["scp-wiki", "scp-jp", "scp-wiki-cn", "scpko"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}

fn default_export_dir() -> String {
    "data/pages".to_string()
}

fn default_max_attempts() -> u32 {
    15
}

fn default_max_elapsed() -> u64 {
    3600
}

fn default_min_wait() -> u64 {
    2
}

fn default_max_wait() -> u64 {
    600
}

fn default_multiplier() -> f64 {
    1.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_elapsed_secs: default_max_elapsed(),
            min_wait_secs: default_min_wait(),
            max_wait_secs: default_max_wait(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            sites: default_sites(),
            api_url: default_api_url(),
            api_user: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            request_interval_ms: 0,
            chunk_size: default_chunk_size(),
            export_dir: default_export_dir(),
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Loads the config file (writing defaults on first run when no explicit
    /// path is given), then applies `.env` and environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let config_path = Self::config_path();
                if config_path.exists() {
                    Self::from_file(&config_path)?
                } else {
                    let config = Config::default();
                    config.save()?;
                    config
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wikidot-mirror")
            .join("config.toml")
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = lookup("WIKIDOT_API_USER") {
            self.api_user = Some(user);
        }
        if let Some(key) = lookup("WIKIDOT_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(db) = lookup("DB_FILE") {
            self.db_path = db;
        }
        if let Some(dir) = lookup("JSON_OUTPUT_DIR") {
            self.export_dir = dir;
        }
    }

    /// Checks everything a sync run needs before any connection is made.
    pub fn validate(&self) -> Result<()> {
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !has(&self.api_user) || !has(&self.api_key) {
            return Err(AppError::Config(
                "WIKIDOT_API_USER / WIKIDOT_API_KEY are not configured".to_string(),
            ));
        }
        if self.sites.is_empty() {
            return Err(AppError::Config("no sites configured".to_string()));
        }
        url::Url::parse(&self.api_url)
            .map_err(|e| AppError::Config(format!("invalid api_url '{}': {}", self.api_url, e)))?;
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}
