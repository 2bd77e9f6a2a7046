//! # Directory Module
//!
//! The prekey directory collaborator: where devices publish their bundles and
//! where senders fetch and claim them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       DIRECTORY CONTRACT                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Owner device                         Directory                         │
//! │  ─────────────                        ─────────                         │
//! │  register_device(registration) ─────► upsert by device id              │
//! │  upload_prekeys(device, keys)  ─────► add, deduplicated by public key   │
//! │  get_prekey_stock(device)      ◄───── unclaimed one-time key count      │
//! │                                                                         │
//! │  Sender device                                                          │
//! │  ─────────────                                                          │
//! │  list_device_bundles(user)     ◄───── identity + signed prekey per dev  │
//! │  claim_prekey(user, device)    ◄───── bundle + one one-time key,        │
//! │                                       which is never served again      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport behind the trait (HTTP, relay, ...) lives outside this
//! crate. [`MemoryDirectory`] is an in-process implementation of the same
//! contract.

mod memory;

pub use memory::{DirectoryCounters, MemoryDirectory, MemoryDirectoryClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceState, OneTimePrekey};
use crate::error::Result;

/// A remote device's published keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBundle {
    /// Device id
    pub device_id: String,
    /// Base64 Ed25519 identity public key
    pub identity_key_pub: String,
    /// Base64 DH signed prekey public value
    pub signed_prekey_pub: String,
    /// Base64 signature over the signed prekey
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_prekey_sig: Option<String>,
    /// Base64 DH one-time prekey public value (claims only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_prekey_pub: Option<String>,
}

/// A one-time prekey as published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrekeyUpload {
    /// Per-device id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Base64 DH public value
    pub public_key: String,
}

impl From<&OneTimePrekey> for PrekeyUpload {
    fn from(key: &OneTimePrekey) -> Self {
        Self {
            id: key.id,
            public_key: key.public_key.clone(),
        }
    }
}

/// Everything a device publishes when it registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    /// Device id
    pub device_id: String,
    /// Human-readable name
    pub name: String,
    /// Platform label
    pub platform: String,
    /// Base64 identity public key
    pub identity_key_pub: String,
    /// Base64 signed prekey public value
    pub signed_prekey_pub: String,
    /// Base64 signature over the signed prekey
    pub signed_prekey_sig: String,
    /// Initial one-time prekeys
    pub one_time_prekeys: Vec<PrekeyUpload>,
}

impl DeviceRegistration {
    /// Registration for `state` carrying every unconsumed one-time prekey
    pub fn from_state(state: &DeviceState, name: &str, platform: &str) -> Self {
        Self {
            device_id: state.device_id.clone(),
            name: name.to_string(),
            platform: platform.to_string(),
            identity_key_pub: state.identity.public_key.clone(),
            signed_prekey_pub: state.signed_prekey.public_key.clone(),
            signed_prekey_sig: state.signed_prekey.signature.clone(),
            one_time_prekeys: state
                .one_time_prekeys
                .iter()
                .filter(|k| !k.consumed)
                .map(PrekeyUpload::from)
                .collect(),
        }
    }
}

/// Client for the prekey directory, authenticated as one user
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Register (or re-register) this user's device
    async fn register_device(&self, registration: DeviceRegistration) -> Result<()>;

    /// Publish additional one-time prekeys for a device
    async fn upload_prekeys(&self, device_id: &str, prekeys: Vec<PrekeyUpload>) -> Result<()>;

    /// Every registered device bundle for a user (empty if unknown)
    async fn list_device_bundles(&self, user_id: &str) -> Result<Vec<DeviceBundle>>;

    /// Claim a bundle for one device, consuming one one-time prekey if any
    /// remain
    async fn claim_prekey(&self, user_id: &str, device_id: &str) -> Result<DeviceBundle>;

    /// Number of unclaimed one-time prekeys for a device
    async fn get_prekey_stock(&self, device_id: &str) -> Result<usize>;
}
