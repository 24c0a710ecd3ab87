//! Encrypted-at-rest key/value storage for sandboxed targets.
//!
//! Each key is a separate file holding `nonce || ciphertext` sealed with ChaCha20-Poly1305.
//! The 256-bit master key comes from the OS keychain (generated on first use) or is derived
//! from a passphrase with Argon2 and a per-directory random salt.

use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use keyring::Entry;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{write_atomic, Storage};
use crate::error::{StorageError, StorageResult};

/// Keychain account under which the master key is stored
const MASTER_KEY_ACCOUNT: &str = "storage-master-key";

/// Extension of encrypted value files
const VALUE_EXTENSION: &str = "enc";

/// Salt file used for passphrase-derived keys
const SALT_FILE: &str = "storage.salt";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Where the master key comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// OS keychain entry for the given service name
    Keychain { service: String },
    /// Argon2-derived from a passphrase
    Passphrase(String),
}

pub struct SecureStorage {
    dir: PathBuf,
    cipher: ChaCha20Poly1305,
    // Held across every file operation
    lock: Mutex<()>,
}

impl SecureStorage {
    pub fn open(dir: &Path, source: &KeySource) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        let key = match source {
            KeySource::Keychain { service } => Self::keychain_key(service)?,
            KeySource::Passphrase(passphrase) => Self::derive_key(dir, passphrase)?,
        };
        Ok(Self::with_key(dir, key))
    }

    pub fn with_key(dir: &Path, key: [u8; KEY_LEN]) -> Self {
        Self {
            dir: dir.to_path_buf(),
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            lock: Mutex::new(()),
        }
    }

    /// Load the master key from the keychain, creating it on first use
    fn keychain_key(service: &str) -> StorageResult<[u8; KEY_LEN]> {
        let entry = Entry::new(service, MASTER_KEY_ACCOUNT)?;
        match entry.get_secret() {
            Ok(secret) => secret
                .try_into()
                .map_err(|_| StorageError::Crypto("Keychain master key has wrong length".into())),
            Err(keyring::Error::NoEntry) => {
                let mut key = [0u8; KEY_LEN];
                OsRng.fill_bytes(&mut key);
                entry.set_secret(&key)?;
                info!(service, "Generated new storage master key");
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn derive_key(dir: &Path, passphrase: &str) -> StorageResult<[u8; KEY_LEN]> {
        let salt_path = dir.join(SALT_FILE);
        let salt = if salt_path.exists() {
            std::fs::read(&salt_path)?
        } else {
            let mut salt = vec![0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            write_atomic(&salt_path, &salt)?;
            salt
        };

        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| StorageError::Crypto(format!("Key derivation failed: {}", e)))?;
        Ok(key)
    }

    /// Secure-store keys: non-empty, ASCII alphanumerics plus `.`, `-` and `_`
    pub fn is_valid_key(key: &str) -> bool {
        !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    }

    fn value_path(&self, key: &str) -> StorageResult<PathBuf> {
        if !Self::is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", key, VALUE_EXTENSION)))
    }

    fn seal(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| StorageError::Crypto("Encryption failed".into()))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open_blob(&self, blob: &[u8]) -> StorageResult<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(StorageError::Crypto("Encrypted value is truncated".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StorageError::Crypto("Encrypted value failed authentication".into()))
    }
}

#[async_trait]
impl Storage for SecureStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.value_path(key)?;
        let _guard = self.lock.lock().await;
        if !path.exists() {
            return Ok(None);
        }
        let blob = std::fs::read(&path)?;
        let plaintext = self.open_blob(&blob)?;
        let value = String::from_utf8(plaintext)
            .map_err(|_| StorageError::Crypto("Decrypted value is not UTF-8".into()))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.value_path(key)?;
        let blob = self.seal(value.as_bytes())?;
        let _guard = self.lock.lock().await;
        write_atomic(&path, &blob)?;
        debug!(key, bytes = blob.len(), "Stored encrypted value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.value_path(key)?;
        let _guard = self.lock.lock().await;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
