//! # Storage Module
//!
//! The persistence collaborator the device state store writes through.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE LAYERS                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  DeviceStateStore                                                      │
//! │        │  get_item / set_item / remove_item (whole JSON blob)          │
//! │        ▼                                                               │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  KeyValueStore (trait)                                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │        │                                                               │
//! │        ▼                                                               │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SecureStore                                                    │   │
//! │  │  • seal: AES-256-GCM (credential) or SHA-256 digest (none)      │   │
//! │  │  • backend: memory map or one file per key                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod secure_store;

pub use secure_store::SecureStore;

use async_trait::async_trait;

use crate::error::Result;

/// String key/value persistence
///
/// Values are replaced whole; a `get_item` after a successful `set_item`
/// returns exactly what was written.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if absent
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write (replace) a value
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing an absent key is not an error
    async fn remove_item(&self, key: &str) -> Result<()>;
}
