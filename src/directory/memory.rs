//! In-process prekey directory.
//!
//! One [`MemoryDirectory`] is shared by every simulated user; each user talks
//! to it through a [`MemoryDirectoryClient`] obtained from
//! [`MemoryDirectory::client_for`]. Test hooks let callers tamper with
//! signatures, drop devices, count calls and take the directory offline.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DeviceBundle, DeviceRegistration, DirectoryClient, PrekeyUpload};
use crate::encoding::to_base64;
use crate::error::{Error, Result};

struct DeviceRecord {
    user_id: String,
    device_id: String,
    name: String,
    platform: String,
    identity_key_pub: String,
    signed_prekey_pub: String,
    signed_prekey_sig: Option<String>,
    available: Vec<PrekeyUpload>,
    claimed: HashSet<String>,
}

impl DeviceRecord {
    fn bundle(&self, one_time_prekey_pub: Option<String>) -> DeviceBundle {
        DeviceBundle {
            device_id: self.device_id.clone(),
            identity_key_pub: self.identity_key_pub.clone(),
            signed_prekey_pub: self.signed_prekey_pub.clone(),
            signed_prekey_sig: self.signed_prekey_sig.clone(),
            one_time_prekey_pub,
        }
    }

    fn add_prekeys(&mut self, prekeys: Vec<PrekeyUpload>) -> usize {
        let mut added = 0;
        for prekey in prekeys {
            let duplicate = self.claimed.contains(&prekey.public_key)
                || self
                    .available
                    .iter()
                    .any(|k| k.public_key == prekey.public_key);
            if !duplicate {
                self.available.push(prekey);
                added += 1;
            }
        }
        added
    }
}

/// Call counts, for assertions in tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryCounters {
    /// `register_device` calls
    pub registrations: usize,
    /// `upload_prekeys` calls
    pub uploads: usize,
    /// `list_device_bundles` calls
    pub lists: usize,
    /// `claim_prekey` calls
    pub claims: usize,
    /// `get_prekey_stock` calls
    pub stock_queries: usize,
}

#[derive(Default)]
struct Counters {
    registrations: AtomicUsize,
    uploads: AtomicUsize,
    lists: AtomicUsize,
    claims: AtomicUsize,
    stock_queries: AtomicUsize,
}

/// Shared in-memory directory
#[derive(Default)]
pub struct MemoryDirectory {
    devices: RwLock<Vec<DeviceRecord>>,
    offline: AtomicBool,
    counters: Counters,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A client authenticated as `user_id`
    pub fn client_for(self: &Arc<Self>, user_id: &str) -> MemoryDirectoryClient {
        MemoryDirectoryClient {
            directory: Arc::clone(self),
            user_id: user_id.to_string(),
        }
    }

    // ========================================================================
    // TEST HOOKS
    // ========================================================================

    /// Make every call fail with `ConnectionFailed` (or stop doing so)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Replace a device's signed prekey signature with a well-formed but
    /// invalid one
    pub fn tamper_signature(&self, device_id: &str) -> bool {
        self.with_device(device_id, |record| {
            record.signed_prekey_sig = Some(to_base64(&[0u8; 64]));
        })
    }

    /// Remove a device's signed prekey signature entirely
    pub fn strip_signature(&self, device_id: &str) -> bool {
        self.with_device(device_id, |record| record.signed_prekey_sig = None)
    }

    /// Forget a device
    pub fn remove_device(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write();
        let before = devices.len();
        devices.retain(|d| d.device_id != device_id);
        devices.len() != before
    }

    /// Drop every unclaimed one-time prekey of a device
    pub fn drain_prekeys(&self, device_id: &str) -> bool {
        self.with_device(device_id, |record| record.available.clear())
    }

    /// Unclaimed one-time prekey public values of a device
    pub fn available_prekeys(&self, device_id: &str) -> Vec<String> {
        self.devices
            .read()
            .iter()
            .find(|d| d.device_id == device_id)
            .map(|d| d.available.iter().map(|k| k.public_key.clone()).collect())
            .unwrap_or_default()
    }

    /// Claimed one-time prekey public values of a device
    pub fn claimed_prekeys(&self, device_id: &str) -> Vec<String> {
        self.devices
            .read()
            .iter()
            .find(|d| d.device_id == device_id)
            .map(|d| d.claimed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Registered name and platform of a device
    pub fn device_label(&self, device_id: &str) -> Option<(String, String)> {
        self.devices
            .read()
            .iter()
            .find(|d| d.device_id == device_id)
            .map(|d| (d.name.clone(), d.platform.clone()))
    }

    /// Snapshot of the call counters
    pub fn counters(&self) -> DirectoryCounters {
        DirectoryCounters {
            registrations: self.counters.registrations.load(Ordering::SeqCst),
            uploads: self.counters.uploads.load(Ordering::SeqCst),
            lists: self.counters.lists.load(Ordering::SeqCst),
            claims: self.counters.claims.load(Ordering::SeqCst),
            stock_queries: self.counters.stock_queries.load(Ordering::SeqCst),
        }
    }

    fn with_device(&self, device_id: &str, f: impl FnOnce(&mut DeviceRecord)) -> bool {
        let mut devices = self.devices.write();
        match devices.iter_mut().find(|d| d.device_id == device_id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("directory offline".into()));
        }
        Ok(())
    }
}

/// A [`DirectoryClient`] bound to one user
#[derive(Clone)]
pub struct MemoryDirectoryClient {
    directory: Arc<MemoryDirectory>,
    user_id: String,
}

impl MemoryDirectoryClient {
    /// The user this client acts as
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The shared directory behind this client
    pub fn directory(&self) -> &Arc<MemoryDirectory> {
        &self.directory
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectoryClient {
    async fn register_device(&self, registration: DeviceRegistration) -> Result<()> {
        let dir = &self.directory;
        dir.counters.registrations.fetch_add(1, Ordering::SeqCst);
        dir.check_online()?;

        let mut devices = dir.devices.write();
        if let Some(existing) = devices
            .iter()
            .find(|d| d.device_id == registration.device_id && d.user_id != self.user_id)
        {
            return Err(Error::DirectoryError(format!(
                "device {} belongs to another user",
                existing.device_id
            )));
        }

        match devices
            .iter_mut()
            .find(|d| d.device_id == registration.device_id)
        {
            Some(record) => {
                record.name = registration.name;
                record.platform = registration.platform;
                record.identity_key_pub = registration.identity_key_pub;
                record.signed_prekey_pub = registration.signed_prekey_pub;
                record.signed_prekey_sig = Some(registration.signed_prekey_sig);
                record.add_prekeys(registration.one_time_prekeys);
            }
            None => {
                let mut record = DeviceRecord {
                    user_id: self.user_id.clone(),
                    device_id: registration.device_id,
                    name: registration.name,
                    platform: registration.platform,
                    identity_key_pub: registration.identity_key_pub,
                    signed_prekey_pub: registration.signed_prekey_pub,
                    signed_prekey_sig: Some(registration.signed_prekey_sig),
                    available: Vec::new(),
                    claimed: HashSet::new(),
                };
                record.add_prekeys(registration.one_time_prekeys);
                devices.push(record);
            }
        }
        Ok(())
    }

    async fn upload_prekeys(&self, device_id: &str, prekeys: Vec<PrekeyUpload>) -> Result<()> {
        let dir = &self.directory;
        dir.counters.uploads.fetch_add(1, Ordering::SeqCst);
        dir.check_online()?;

        let mut devices = dir.devices.write();
        let record = devices
            .iter_mut()
            .find(|d| d.device_id == device_id && d.user_id == self.user_id)
            .ok_or_else(|| Error::PeerNotFound(format!("device {}", device_id)))?;
        record.add_prekeys(prekeys);
        Ok(())
    }

    async fn list_device_bundles(&self, user_id: &str) -> Result<Vec<DeviceBundle>> {
        let dir = &self.directory;
        dir.counters.lists.fetch_add(1, Ordering::SeqCst);
        dir.check_online()?;

        Ok(dir
            .devices
            .read()
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.bundle(None))
            .collect())
    }

    async fn claim_prekey(&self, user_id: &str, device_id: &str) -> Result<DeviceBundle> {
        let dir = &self.directory;
        dir.counters.claims.fetch_add(1, Ordering::SeqCst);
        dir.check_online()?;

        let mut devices = dir.devices.write();
        let record = devices
            .iter_mut()
            .find(|d| d.device_id == device_id && d.user_id == user_id)
            .ok_or_else(|| {
                Error::PeerNotFound(format!("device {} of user {}", device_id, user_id))
            })?;

        let one_time = if record.available.is_empty() {
            None
        } else {
            let prekey = record.available.remove(0);
            record.claimed.insert(prekey.public_key.clone());
            Some(prekey.public_key)
        };
        Ok(record.bundle(one_time))
    }

    async fn get_prekey_stock(&self, device_id: &str) -> Result<usize> {
        let dir = &self.directory;
        dir.counters.stock_queries.fetch_add(1, Ordering::SeqCst);
        dir.check_online()?;

        dir.devices
            .read()
            .iter()
            .find(|d| d.device_id == device_id && d.user_id == self.user_id)
            .map(|d| d.available.len())
            .ok_or_else(|| Error::PeerNotFound(format!("device {}", device_id)))
    }
}

// ============================================================================
// TESTS
// ============================================================================
