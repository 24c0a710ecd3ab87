//! Application configuration management.
//!
//! Two sources feed the configuration:
//! - `IdentityConfig`: service endpoint and public API key, read once from the environment
//!   (`AUTHSYNC_URL`, `AUTHSYNC_ANON_KEY`). Missing values become empty strings.
//! - `Config`: user preferences stored at `~/.config/authsync/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::platform::Platform;
use crate::storage::{KeySource, StorageOptions};
use crate::store::LoginConfirmation;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "authsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENDPOINT_ENV: &str = "AUTHSYNC_URL";
pub const API_KEY_ENV: &str = "AUTHSYNC_ANON_KEY";
pub const PASSPHRASE_ENV: &str = "AUTHSYNC_STORAGE_PASSPHRASE";

/// Connection settings for the identity service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityConfig {
    pub endpoint: String,
    pub api_key: String,
}

impl IdentityConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            endpoint: lookup(ENDPOINT_ENV).unwrap_or_default().trim().to_string(),
            api_key: lookup(API_KEY_ENV).unwrap_or_default().trim().to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty() && !self.api_key.is_empty()
    }

    /// First DNS label of the endpoint host, used to namespace persisted state
    pub fn project_ref(&self) -> String {
        let without_scheme = self
            .endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.endpoint);
        let host = without_scheme
            .split(['/', ':', '?'])
            .next()
            .unwrap_or_default();
        let label: String = host
            .split('.')
            .next()
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if label.is_empty() {
            "local".to_string()
        } else {
            label.to_lowercase()
        }
    }

    /// Storage key holding the persisted session
    pub fn storage_key(&self) -> String {
        format!("auth-{}-token", self.project_ref())
    }
}

fn default_auto_refresh() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub last_identifier: Option<String>,
    /// Platform override: "web", "headless" or "native"
    #[serde(default)]
    pub platform: Option<String>,
    /// When set, `login` waits this long for the session change to arrive
    #[serde(default)]
    pub login_timeout_secs: Option<u64>,
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
    /// Where session storage and logs live; defaults to the platform data directory
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            last_identifier: None,
            platform: None,
            login_timeout_secs: None,
            auto_refresh: default_auto_refresh(),
            storage_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.storage_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir().ok_or(ConfigError::NoDirectory("data"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// The configured platform, falling back to runtime detection
    pub fn platform(&self) -> Platform {
        match self.platform.as_deref().map(str::parse::<Platform>) {
            Some(Ok(platform)) => platform,
            Some(Err(e)) => {
                warn!(error = %e, "Invalid platform in config, detecting instead");
                Platform::detect()
            }
            None => Platform::detect(),
        }
    }

    pub fn login_confirmation(&self) -> LoginConfirmation {
        match self.login_timeout_secs {
            Some(secs) => LoginConfirmation::AwaitNotification {
                timeout: Duration::from_secs(secs),
            },
            None => LoginConfirmation::Detached,
        }
    }

    /// Storage layout for the given identity service
    pub fn storage_options(&self, identity: &IdentityConfig) -> Result<StorageOptions, ConfigError> {
        let key_source = match std::env::var(PASSPHRASE_ENV) {
            Ok(passphrase) if !passphrase.is_empty() => KeySource::Passphrase(passphrase),
            _ => KeySource::Keychain {
                service: APP_NAME.to_string(),
            },
        };
        Ok(StorageOptions {
            data_dir: self.data_dir()?,
            namespace: identity.project_ref(),
            key_source,
        })
    }
}
