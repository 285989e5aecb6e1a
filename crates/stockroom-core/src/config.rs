//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the API base URL, network timeout, supervisor interval, where credentials
//! are kept, and the last email used to log in.
//!
//! Configuration is stored at `~/.config/stockroom/config.json`. The
//! `STOCKROOM_API_URL` and `STOCKROOM_TOKEN_BACKEND` environment variables
//! override the file.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "stockroom";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Network calls fail after this long; a timeout never ends the session.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// How often the supervisor re-validates an idle session.
const DEFAULT_SUPERVISOR_INTERVAL_SECS: u64 = 5 * 60;

pub const ENV_API_URL: &str = "STOCKROOM_API_URL";
pub const ENV_TOKEN_BACKEND: &str = "STOCKROOM_TOKEN_BACKEND";

/// Where the credential pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for TokenBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(TokenBackend::File),
            "keyring" => Ok(TokenBackend::Keyring),
            "memory" => Ok(TokenBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown token backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub supervisor_interval_secs: u64,
    pub token_backend: TokenBackend,
    pub last_email: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            supervisor_interval_secs: DEFAULT_SUPERVISOR_INTERVAL_SECS,
            token_backend: TokenBackend::default(),
            last_email: None,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
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

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_API_URL).ok(),
            std::env::var(ENV_TOKEN_BACKEND).ok(),
        );
    }

    fn apply_overrides(&mut self, api_url: Option<String>, backend: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = backend {
            match raw.parse() {
                Ok(backend) => self.token_backend = backend,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_TOKEN_BACKEND),
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_secs.max(1))
    }

    /// Open the configured credential store.
    pub fn open_token_store(&self) -> Result<Arc<dyn TokenStore>> {
        let store: Arc<dyn TokenStore> = match self.token_backend {
            TokenBackend::File => Arc::new(FileTokenStore::open(self.cache_dir()?)),
            TokenBackend::Keyring => Arc::new(KeyringTokenStore::open()),
            TokenBackend::Memory => Arc::new(MemoryTokenStore::new()),
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.supervisor_interval(), Duration::from_secs(300));
        assert_eq!(config.token_backend, TokenBackend::File);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url": "https://shop.test/api", "token_backend": "keyring"}"#)
                .unwrap();
        assert_eq!(config.api_base_url, "https://shop.test/api");
        assert_eq!(config.token_backend, TokenBackend::Keyring);
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(Some(" https://shop.test/api ".into()), Some("Memory".into()));
        assert_eq!(config.api_base_url, "https://shop.test/api");
        assert_eq!(config.token_backend, TokenBackend::Memory);

        config.apply_overrides(Some("   ".into()), Some("floppy".into()));
        assert_eq!(config.api_base_url, "https://shop.test/api");
        assert_eq!(config.token_backend, TokenBackend::Memory);
    }
}
