//! Key/value persistence used by the identity client to keep its session.
//!
//! This module provides:
//! - `Storage`: the async get/set/remove capability
//! - `StorageAdapter`: the platform-selected medium (browser-style or encrypted)
//! - `MemoryStorage`: an in-process map for tests and ephemeral sessions
//!
//! A missing key is never an error: `get` resolves to `None` and `remove` succeeds.
//! Medium failures surface as `StorageError` and are not retried here.

pub mod memory;
pub mod secure;
pub mod web;

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageResult;
use crate::platform::Platform;

pub use memory::MemoryStorage;
pub use secure::{KeySource, SecureStorage};
pub use web::WebStorage;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Where and how the platform storage keeps its data.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Directory holding the storage files
    pub data_dir: PathBuf,
    /// Name of the browser-style store (the "origin")
    pub namespace: String,
    /// Master key source for the encrypted store
    pub key_source: KeySource,
}

/// Storage medium chosen once from the detected platform.
pub enum StorageAdapter {
    Web(WebStorage),
    Secure(SecureStorage),
}

impl StorageAdapter {
    pub fn for_platform(platform: Platform, options: &StorageOptions) -> StorageResult<Self> {
        let adapter = match platform {
            Platform::Web { windowed: true } => {
                StorageAdapter::Web(WebStorage::open(&options.data_dir, &options.namespace))
            }
            Platform::Web { windowed: false } => StorageAdapter::Web(WebStorage::windowless()),
            Platform::Native => StorageAdapter::Secure(SecureStorage::open(
                &options.data_dir,
                &options.key_source,
            )?),
        };
        debug!(%platform, medium = adapter.medium(), "Storage adapter selected");
        Ok(adapter)
    }

    /// Short name of the backing medium, for logs and status output
    pub fn medium(&self) -> &'static str {
        match self {
            StorageAdapter::Web(web) if web.is_available() => "web",
            StorageAdapter::Web(_) => "web (windowless)",
            StorageAdapter::Secure(_) => "secure",
        }
    }
}

#[async_trait]
impl Storage for StorageAdapter {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match self {
            StorageAdapter::Web(web) => web.get(key).await,
            StorageAdapter::Secure(secure) => secure.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        match self {
            StorageAdapter::Web(web) => web.set(key, value).await,
            StorageAdapter::Secure(secure) => secure.set(key, value).await,
        }
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match self {
            StorageAdapter::Web(web) => web.remove(key).await,
            StorageAdapter::Secure(secure) => secure.remove(key).await,
        }
    }
}

/// Write a file atomically: write a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &std::path::Path) -> StorageOptions {
        StorageOptions {
            data_dir: dir.to_path_buf(),
            namespace: "test-origin".to_string(),
            key_source: KeySource::Passphrase("correct horse battery staple".to_string()),
        }
    }

    #[tokio::test]
    async fn test_windowed_web_platform_selects_persistent_store() {
        let dir = tempfile::tempdir().unwrap();
        let adapter =
            StorageAdapter::for_platform(Platform::Web { windowed: true }, &options(dir.path()))
                .unwrap();
        assert_eq!(adapter.medium(), "web");

        adapter.set("token", "abc").await.unwrap();
        assert_eq!(adapter.get("token").await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_windowless_platform_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let adapter =
            StorageAdapter::for_platform(Platform::Web { windowed: false }, &options(dir.path()))
                .unwrap();
        assert_eq!(adapter.medium(), "web (windowless)");

        adapter.set("token", "abc").await.unwrap();
        assert_eq!(adapter.get("token").await.unwrap(), None);
        adapter.remove("token").await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_native_platform_selects_secure_store() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = StorageAdapter::for_platform(Platform::Native, &options(dir.path())).unwrap();
        assert_eq!(adapter.medium(), "secure");

        adapter.set("auth-token", "secret-session").await.unwrap();
        assert_eq!(
            adapter.get("auth-token").await.unwrap().as_deref(),
            Some("secret-session")
        );
        adapter.remove("auth-token").await.unwrap();
        assert_eq!(adapter.get("auth-token").await.unwrap(), None);
    }
}
