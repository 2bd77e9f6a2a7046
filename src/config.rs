//! Session and storage configuration.
//!
//! Every field has a default, so a JSON override file only needs the keys
//! it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default storage key for the device state blob
pub const DEFAULT_STORAGE_KEY: &str = "murmur.e2ee.device-state";

/// Session engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Human-readable device name sent at registration
    pub device_name: String,
    /// Platform label sent at registration
    pub platform: String,
    /// Size of a full one-time prekey batch
    pub prekey_batch_size: usize,
    /// Server stock below which the batch is topped up
    pub prekey_floor: usize,
    /// Number of sent message keys retained
    pub sent_key_capacity: usize,
    /// How long consumed one-time prekeys are kept, in seconds
    pub consumed_prekey_grace_secs: i64,
    /// How long a peer fingerprint stays fresh, in seconds
    pub fingerprint_ttl_secs: i64,
    /// Encrypt to unvalidated bundles when no bundle validates
    pub allow_unverified_fallback: bool,
    /// Key under which the device state is persisted
    pub storage_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: "Murmur device".to_string(),
            platform: std::env::consts::OS.to_string(),
            prekey_batch_size: 10,
            prekey_floor: 5,
            sent_key_capacity: 200,
            consumed_prekey_grace_secs: 7 * 24 * 60 * 60,
            fingerprint_ttl_secs: 24 * 60 * 60,
            allow_unverified_fallback: true,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load overrides from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("Invalid session config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the numeric limits are coherent
    pub fn validate(&self) -> Result<()> {
        if self.prekey_batch_size == 0 {
            return Err(Error::DeserializationError(
                "prekey_batch_size must be at least 1".into(),
            ));
        }
        if self.prekey_floor > self.prekey_batch_size {
            return Err(Error::DeserializationError(format!(
                "prekey_floor ({}) exceeds prekey_batch_size ({})",
                self.prekey_floor, self.prekey_batch_size
            )));
        }
        if self.sent_key_capacity == 0 {
            return Err(Error::DeserializationError(
                "sent_key_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for [`SecureStore`](crate::storage::SecureStore)
#[derive(Clone, Default)]
pub struct StorageConfig {
    /// Directory for the file backend (None for in-memory)
    pub directory: Option<PathBuf>,
    /// Local user secret used to seal stored values
    pub credential: Option<String>,
    /// Refuse to open without a credential
    pub require_credential: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("directory", &self.directory)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .field("require_credential", &self.require_credential)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.prekey_batch_size, 10);
        assert_eq!(config.prekey_floor, 5);
        assert_eq!(config.sent_key_capacity, 200);
        assert_eq!(config.consumed_prekey_grace_secs, 604_800);
        assert_eq!(config.fingerprint_ttl_secs, 86_400);
        assert!(config.allow_unverified_fallback);
        assert_eq!(config.storage_key, "murmur.e2ee.device-state");
    }

    #[test]
    fn test_partial_json_override() {
        let config = SessionConfig::from_json(
            r#"{"device_name": "laptop", "allow_unverified_fallback": false}"#,
        )
        .unwrap();
        assert_eq!(config.device_name, "laptop");
        assert!(!config.allow_unverified_fallback);
        assert_eq!(config.prekey_batch_size, 10);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            SessionConfig::from_json("{not json"),
            Err(Error::DeserializationError(_))
        ));
        assert!(SessionConfig::from_json(r#"{"prekey_floor": 20}"#).is_err());
        assert!(SessionConfig::from_json(r#"{"prekey_batch_size": 0, "prekey_floor": 0}"#).is_err());
    }

    #[test]
    fn test_storage_config_debug_redacts_credential() {
        let config = StorageConfig {
            credential: Some("hunter2".into()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
