//! Browser-style persistent key/value storage.
//!
//! All keys of one origin live in a single JSON document, mirroring how a browser keeps
//! `localStorage` per origin. Without a window (server rendering) there is nothing to persist
//! into, so every operation is a no-op that resolves to absent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{write_atomic, Storage};
use crate::error::StorageResult;

/// Suffix of the per-origin storage document
const STORE_FILE_SUFFIX: &str = "localstorage.json";

struct Backing {
    path: PathBuf,
    // One logical read-modify-write at a time
    lock: Mutex<()>,
}

pub struct WebStorage {
    backing: Option<Backing>,
}

impl WebStorage {
    /// Open the persistent store for `namespace` inside `dir`
    pub fn open(dir: &Path, namespace: &str) -> Self {
        let file_name = format!("{}.{}", sanitize_namespace(namespace), STORE_FILE_SUFFIX);
        Self {
            backing: Some(Backing {
                path: dir.join(file_name),
                lock: Mutex::new(()),
            }),
        }
    }

    /// A store for a runtime without a window: reads are absent, writes are dropped
    pub fn windowless() -> Self {
        Self { backing: None }
    }

    pub fn is_available(&self) -> bool {
        self.backing.is_some()
    }

    fn read_map(path: &Path) -> StorageResult<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_map(path: &Path, map: &BTreeMap<String, String>) -> StorageResult<()> {
        let contents = serde_json::to_vec_pretty(map)?;
        write_atomic(path, &contents)?;
        Ok(())
    }
}

/// Keep namespaces usable as file names
fn sanitize_namespace(namespace: &str) -> String {
    let cleaned: String = namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl Storage for WebStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let Some(backing) = &self.backing else {
            return Ok(None);
        };
        let _guard = backing.lock.lock().await;
        let mut map = Self::read_map(&backing.path)?;
        Ok(map.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let Some(backing) = &self.backing else {
            debug!(key, "No window available, dropping storage write");
            return Ok(());
        };
        let _guard = backing.lock.lock().await;
        let mut map = Self::read_map(&backing.path)?;
        map.insert(key.to_string(), value.to_string());
        Self::write_map(&backing.path, &map)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        let _guard = backing.lock.lock().await;
        let mut map = Self::read_map(&backing.path)?;
        if map.remove(key).is_some() {
            Self::write_map(&backing.path, &map)?;
        }
        Ok(())
    }
}
