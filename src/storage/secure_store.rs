//! # Secure Storage
//!
//! Integrity-checked key/value storage for the device state.
//!
//! ## Sealed Value Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SEALED VALUE LAYOUT                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  With a credential (encrypted)                                         │
//! │  ┌──────┬──────────────┬──────────────────────────────────────────┐    │
//! │  │ 0x01 │ nonce (12 B) │ AES-256-GCM(value), aad = item key       │    │
//! │  └──────┴──────────────┴──────────────────────────────────────────┘    │
//! │                                                                         │
//! │     storage key = HKDF-SHA256(credential, "murmur-storage-key-v1")     │
//! │                                                                         │
//! │  Without a credential (integrity only)                                 │
//! │  ┌──────┬────────────────────────────┬──────────────────────────────┐  │
//! │  │ 0x00 │ SHA-256(item key ‖ value)  │ value                        │  │
//! │  └──────┴────────────────────────────┴──────────────────────────────┘  │
//! │                                                                         │
//! │  Anything that fails to unseal reads as StorageCorrupted.              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Backends
//!
//! - **Memory**: a `HashMap` behind a `RwLock` (tests, ephemeral sessions)
//! - **Directory**: one file per key, named by the hex of the key, replaced
//!   atomically through a temporary file and a rename

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use async_trait::async_trait;
use hkdf::Hkdf;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroizing, ZeroizeOnDrop};

use super::KeyValueStore;
use crate::config::StorageConfig;
use crate::crypto::random::{random_array, SystemRandom};
use crate::error::{Error, Result};

/// HKDF salt for the storage key
const STORAGE_SALT: &[u8] = b"murmur-storage-salt";

/// HKDF info for the storage key
const STORAGE_INFO: &[u8] = b"murmur-storage-key-v1";

/// Layout tag: SHA-256 digest prefix
const TAG_DIGEST: u8 = 0x00;

/// Layout tag: AES-256-GCM sealed
const TAG_ENCRYPTED: u8 = 0x01;

/// AES-GCM nonce size
const GCM_NONCE_SIZE: usize = 12;

/// SHA-256 digest size
const DIGEST_SIZE: usize = 32;

#[derive(ZeroizeOnDrop)]
struct StorageKey([u8; 32]);

impl StorageKey {
    fn derive(credential: &str) -> Result<Self> {
        let hkdf = Hkdf::<Sha256>::new(Some(STORAGE_SALT), credential.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(STORAGE_INFO, &mut key)
            .map_err(|_| Error::Internal("Failed to derive storage key".into()))?;
        Ok(Self(key))
    }
}

enum Backend {
    Memory(RwLock<HashMap<String, Vec<u8>>>),
    Directory(PathBuf),
}

/// Integrity-checked key/value store
pub struct SecureStore {
    backend: Backend,
    sealing_key: Option<StorageKey>,
}

impl SecureStore {
    /// Create an in-memory store without a credential
    pub fn new() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(HashMap::new())),
            sealing_key: None,
        }
    }

    /// Create an in-memory store that encrypts under `credential`
    pub fn with_credential(credential: &str) -> Result<Self> {
        Ok(Self {
            backend: Backend::Memory(RwLock::new(HashMap::new())),
            sealing_key: Some(StorageKey::derive(credential)?),
        })
    }

    /// Open a store as described by `config`
    ///
    /// Creates the backing directory if needed.
    pub async fn open(config: StorageConfig) -> Result<Self> {
        let sealing_key = match config.credential.as_deref() {
            Some(credential) => Some(StorageKey::derive(credential)?),
            None if config.require_credential => return Err(Error::MissingCredential),
            None => None,
        };

        let backend = match config.directory {
            Some(dir) => {
                tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                    Error::StorageWriteError(format!(
                        "Failed to create {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
                Backend::Directory(dir)
            }
            None => Backend::Memory(RwLock::new(HashMap::new())),
        };

        tracing::debug!(
            encrypted = sealing_key.is_some(),
            persistent = matches!(backend, Backend::Directory(_)),
            "Opened secure store"
        );

        Ok(Self {
            backend,
            sealing_key,
        })
    }

    /// Whether values are encrypted (a credential was supplied)
    pub fn is_encrypted(&self) -> bool {
        self.sealing_key.is_some()
    }

    /// Store data, sealing it first
    pub async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let sealed = self.seal(key, value)?;
        self.store_raw(key, &sealed).await
    }

    /// Retrieve and unseal data
    pub async fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.retrieve_raw(key).await? {
            Some(data) => Ok(Some(Zeroizing::new(self.unseal(key, &data)?))),
            None => Ok(None),
        }
    }

    /// Delete data, returning whether anything was removed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.delete_raw(key).await
    }

    /// Check if a key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.retrieve_raw(key).await?.is_some())
    }

    // ========================================================================
    // SEALING
    // ========================================================================

    fn seal(&self, key: &str, value: &[u8]) -> Result<Vec<u8>> {
        match &self.sealing_key {
            Some(storage_key) => {
                let cipher = Aes256Gcm::new_from_slice(&storage_key.0)
                    .map_err(|e| Error::Internal(format!("Invalid storage key: {}", e)))?;
                let nonce: [u8; GCM_NONCE_SIZE] = random_array(&SystemRandom);
                let ciphertext = cipher
                    .encrypt(
                        AesNonce::from_slice(&nonce),
                        Payload {
                            msg: value,
                            aad: key.as_bytes(),
                        },
                    )
                    .map_err(|e| Error::StorageWriteError(format!("Encryption failed: {}", e)))?;

                let mut sealed = Vec::with_capacity(1 + GCM_NONCE_SIZE + ciphertext.len());
                sealed.push(TAG_ENCRYPTED);
                sealed.extend_from_slice(&nonce);
                sealed.extend_from_slice(&ciphertext);
                Ok(sealed)
            }
            None => {
                let mut sealed = Vec::with_capacity(1 + DIGEST_SIZE + value.len());
                sealed.push(TAG_DIGEST);
                sealed.extend_from_slice(&digest(key, value));
                sealed.extend_from_slice(value);
                Ok(sealed)
            }
        }
    }

    fn unseal(&self, key: &str, data: &[u8]) -> Result<Vec<u8>> {
        let (tag, body) = data
            .split_first()
            .ok_or_else(|| Error::StorageCorrupted(format!("Empty value for {}", key)))?;

        match (*tag, &self.sealing_key) {
            (TAG_ENCRYPTED, Some(storage_key)) => {
                if body.len() < GCM_NONCE_SIZE {
                    return Err(Error::StorageCorrupted(format!("Truncated value for {}", key)));
                }
                let (nonce, ciphertext) = body.split_at(GCM_NONCE_SIZE);
                let cipher = Aes256Gcm::new_from_slice(&storage_key.0)
                    .map_err(|e| Error::Internal(format!("Invalid storage key: {}", e)))?;
                cipher
                    .decrypt(
                        AesNonce::from_slice(nonce),
                        Payload {
                            msg: ciphertext,
                            aad: key.as_bytes(),
                        },
                    )
                    .map_err(|_| {
                        Error::StorageCorrupted(format!("Authentication failed for {}", key))
                    })
            }
            (TAG_ENCRYPTED, None) => Err(Error::MissingCredential),
            (TAG_DIGEST, None) => {
                if body.len() < DIGEST_SIZE {
                    return Err(Error::StorageCorrupted(format!("Truncated value for {}", key)));
                }
                let (stored, value) = body.split_at(DIGEST_SIZE);
                if !bool::from(stored.ct_eq(&digest(key, value)[..])) {
                    return Err(Error::StorageCorrupted(format!(
                        "Integrity check failed for {}",
                        key
                    )));
                }
                Ok(value.to_vec())
            }
            (TAG_DIGEST, Some(_)) => Err(Error::StorageCorrupted(format!(
                "Unencrypted value found for {} in an encrypted store",
                key
            ))),
            (other, _) => Err(Error::StorageCorrupted(format!(
                "Unknown layout tag {:#04x} for {}",
                other, key
            ))),
        }
    }

    // ========================================================================
    // BACKENDS
    // ========================================================================

    pub(crate) async fn store_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Memory(map) => {
                map.write().insert(key.to_string(), value.to_vec());
                Ok(())
            }
            Backend::Directory(dir) => {
                let path = item_path(dir, key);
                let tmp = path.with_extension("tmp");
                tokio::fs::write(&tmp, value)
                    .await
                    .map_err(|e| Error::StorageWriteError(format!("{}: {}", tmp.display(), e)))?;
                tokio::fs::rename(&tmp, &path)
                    .await
                    .map_err(|e| Error::StorageWriteError(format!("{}: {}", path.display(), e)))
            }
        }
    }

    pub(crate) async fn retrieve_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Memory(map) => Ok(map.read().get(key).cloned()),
            Backend::Directory(dir) => {
                let path = item_path(dir, key);
                match tokio::fs::read(&path).await {
                    Ok(data) => Ok(Some(data)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(Error::StorageReadError(format!("{}: {}", path.display(), e))),
                }
            }
        }
    }

    async fn delete_raw(&self, key: &str) -> Result<bool> {
        match &self.backend {
            Backend::Memory(map) => Ok(map.write().remove(key).is_some()),
            Backend::Directory(dir) => {
                let path = item_path(dir, key);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(Error::StorageWriteError(format!("{}: {}", path.display(), e))),
                }
            }
        }
    }
}

impl Default for SecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for SecureStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        match self.retrieve(key).await? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| Error::StorageCorrupted(format!("Value for {} is not UTF-8", key))),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.store(key, value.as_bytes()).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.delete(key).await.map(|_| ())
    }
}

fn digest(key: &str, value: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::new()
        .chain_update(key.as_bytes())
        .chain_update(value)
        .finalize()
        .into()
}

fn item_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(hex::encode(key.as_bytes()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_retrieve() {
        let store = SecureStore::new();

        store.store("test-key", b"test-value").await.unwrap();

        let value = store.retrieve("test-key").await.unwrap().unwrap();
        assert_eq!(&*value, b"test-value");

        assert!(store.delete("test-key").await.unwrap());
        assert!(store.retrieve("test-key").await.unwrap().is_none());
        assert!(!store.delete("test-key").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_with_credential() {
        let store = SecureStore::with_credential("correct horse").unwrap();
        assert!(store.is_encrypted());

        store.store("secret", b"very secret data").await.unwrap();

        let raw = store.retrieve_raw("secret").await.unwrap().unwrap();
        assert_eq!(raw[0], TAG_ENCRYPTED);
        assert!(!raw.windows(6).any(|w| w == b"secret"));

        let value = store.retrieve("secret").await.unwrap().unwrap();
        assert_eq!(&*value, b"very secret data");
    }

    #[tokio::test]
    async fn test_exists() {
        let store = SecureStore::new();
        assert!(!store.exists("nonexistent").await.unwrap());

        store.store("exists", b"data").await.unwrap();
        assert!(store.exists("exists").await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_digest_value_is_corrupted() {
        let store = SecureStore::new();
        store.store("k", b"{\"v\":1}").await.unwrap();

        let mut raw = store.retrieve_raw("k").await.unwrap().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        store.store_raw("k", &raw).await.unwrap();

        assert!(matches!(
            store.retrieve("k").await,
            Err(Error::StorageCorrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_corrupted() {
        let store = SecureStore::with_credential("pw").unwrap();
        store.store("k", b"payload").await.unwrap();

        let mut raw = store.retrieve_raw("k").await.unwrap().unwrap();
        raw[20] ^= 0x40;
        store.store_raw("k", &raw).await.unwrap();

        assert!(matches!(
            store.retrieve("k").await,
            Err(Error::StorageCorrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_value_bound_to_its_key() {
        let store = SecureStore::new();
        store.store("a", b"payload").await.unwrap();
        let raw = store.retrieve_raw("a").await.unwrap().unwrap();
        store.store_raw("b", &raw).await.unwrap();

        assert!(matches!(
            store.retrieve("b").await,
            Err(Error::StorageCorrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_credential_is_corrupted() {
        let writer = SecureStore::with_credential("one").unwrap();
        writer.store("k", b"payload").await.unwrap();
        let raw = writer.retrieve_raw("k").await.unwrap().unwrap();

        let reader = SecureStore::with_credential("two").unwrap();
        reader.store_raw("k", &raw).await.unwrap();
        assert!(matches!(
            reader.retrieve("k").await,
            Err(Error::StorageCorrupted(_))
        ));

        let unsealed = SecureStore::new();
        unsealed.store_raw("k", &raw).await.unwrap();
        assert!(matches!(
            unsealed.retrieve("k").await,
            Err(Error::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn test_require_credential() {
        let result = SecureStore::open(StorageConfig {
            require_credential: true,
            ..Default::default()
        })
        .await;
        assert!(matches!(result, Err(Error::MissingCredential)));

        let store = SecureStore::open(StorageConfig {
            credential: Some("pw".into()),
            require_credential: true,
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(store.is_encrypted());
    }

    #[tokio::test]
    async fn test_directory_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            directory: Some(dir.path().join("state")),
            credential: Some("pw".into()),
            require_credential: false,
        };

        let store = SecureStore::open(config.clone()).await.unwrap();
        store.set_item("murmur.e2ee.device-state", "{\"version\":1}").await.unwrap();
        drop(store);

        let reopened = SecureStore::open(config).await.unwrap();
        assert_eq!(
            reopened.get_item("murmur.e2ee.device-state").await.unwrap().as_deref(),
            Some("{\"version\":1}")
        );

        // No temporary files left behind
        let mut entries = std::fs::read_dir(dir.path().join("state")).unwrap();
        let entry = entries.next().unwrap().unwrap();
        assert!(entries.next().is_none());
        assert_eq!(
            entry.file_name().to_string_lossy(),
            hex::encode("murmur.e2ee.device-state")
        );

        reopened.remove_item("murmur.e2ee.device-state").await.unwrap();
        assert!(reopened.get_item("murmur.e2ee.device-state").await.unwrap().is_none());
        reopened.remove_item("murmur.e2ee.device-state").await.unwrap();
    }
}
