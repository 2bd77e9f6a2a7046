//! Device state store.
//!
//! Owns the single in-memory [`DeviceState`] and its persisted copy. Every
//! mutation goes through one FIFO `tokio::sync::Mutex`, so each update runs
//! strictly after the ones submitted before it and callers read their own
//! writes.
//!
//! ```text
//! ensure_device_state()
//!   │
//!   ├─ nothing stored / unreadable / wrong version ──► generate + persist
//!   │
//!   └─ stored state
//!        ├─ signature invalid        ──► re-sign
//!        ├─ collections missing      ──► normalise
//!        ├─ consumed keys past grace ──► purge
//!        └─ anything changed         ──► persist
//! ```
//!
//! Persistence failures are logged and leave memory ahead of disk. Until a
//! later write succeeds, [`DeviceStateStore::reload`] keeps the in-memory
//! copy instead of rolling back to what storage holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{DeviceState, DEVICE_STATE_VERSION};
use crate::config::SessionConfig;
use crate::crypto::random::RandomSource;
use crate::error::{Error, Result};
use crate::storage::KeyValueStore;
use crate::time::now_timestamp_millis;

/// Persisted state as read back from storage
struct Loaded {
    state: DeviceState,
    normalized: bool,
}

/// Durable, serialized owner of the device state
pub struct DeviceStateStore {
    storage: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    rng: Arc<dyn RandomSource>,
    state: Mutex<Option<DeviceState>>,
    /// Set while the last write to storage failed; only touched under `state`
    dirty: AtomicBool,
}

impl DeviceStateStore {
    /// Create a store; nothing is loaded until first use
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        config: SessionConfig,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            storage,
            config,
            rng,
            state: Mutex::new(None),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load, validate and repair the persisted state, or create a new one
    pub async fn ensure_device_state(&self) -> Result<DeviceState> {
        let mut guard = self.state.lock().await;
        let state = self.load_or_create().await?;
        *guard = Some(state.clone());
        Ok(state)
    }

    /// A private copy of the current state
    pub async fn snapshot(&self) -> Result<DeviceState> {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.as_ref() {
            return Ok(state.clone());
        }
        let state = self.load_or_create().await?;
        *guard = Some(state.clone());
        Ok(state)
    }

    /// Apply `mutation` to the state and persist the result
    ///
    /// The mutation runs on a copy; if it fails nothing is installed or
    /// written.
    pub async fn update<F, T>(&self, mutation: F) -> Result<T>
    where
        F: FnOnce(&mut DeviceState) -> Result<T>,
    {
        let mut guard = self.state.lock().await;
        let mut next = match guard.as_ref() {
            Some(state) => state.clone(),
            None => self.load_or_create().await?,
        };

        let output = mutation(&mut next)?;
        self.persist(&next).await;
        *guard = Some(next);
        Ok(output)
    }

    /// Refresh the in-memory copy from storage
    ///
    /// The persisted copy replaces memory only when every local write has
    /// reached storage. While a write is outstanding the in-memory state is
    /// kept and re-persisted, and the persisted copy only contributes
    /// one-time prekeys memory does not know about.
    pub async fn reload(&self) -> Result<DeviceState> {
        let mut guard = self.state.lock().await;
        let Some(mut current) = guard.as_ref().cloned() else {
            let state = self.load_or_create().await?;
            *guard = Some(state.clone());
            return Ok(state);
        };

        if !self.dirty.load(Ordering::SeqCst) {
            if let Some(loaded) = self.load_persisted().await? {
                let state = self.repair(loaded).await?;
                tracing::debug!(device_id = %state.device_id, "Reloaded device state");
                *guard = Some(state.clone());
                return Ok(state);
            }
            return Ok(current);
        }

        if let Some(Loaded { state: persisted, .. }) = self.load_persisted().await? {
            if persisted.device_id == current.device_id {
                let merged = merge_unknown_prekeys(&mut current, persisted);
                if merged > 0 {
                    tracing::debug!(merged, "Merged persisted one-time prekeys");
                }
            }
        }
        current.purge_consumed_prekeys(
            now_timestamp_millis(),
            self.config.consumed_prekey_grace_secs,
        );
        tracing::warn!(
            device_id = %current.device_id,
            "Device state has unpersisted changes, keeping in-memory copy"
        );
        self.persist(&current).await;
        *guard = Some(current.clone());
        Ok(current)
    }

    /// Discard the persisted state and generate a new device
    pub async fn reset(&self) -> Result<DeviceState> {
        let mut guard = self.state.lock().await;
        if let Err(e) = self.storage.remove_item(&self.config.storage_key).await {
            tracing::error!(error = %e, code = e.code(), "Failed to remove device state");
        }
        let state = self.create().await?;
        *guard = Some(state.clone());
        Ok(state)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    async fn load_or_create(&self) -> Result<DeviceState> {
        match self.load_persisted().await? {
            Some(loaded) => self.repair(loaded).await,
            None => self.create().await,
        }
    }

    /// Re-sign, purge and persist a state read back from storage
    async fn repair(&self, loaded: Loaded) -> Result<DeviceState> {
        let Loaded {
            mut state,
            normalized,
        } = loaded;
        let mut changed = normalized;

        if !state.signed_prekey_is_valid() {
            if let Err(e) = state.repair_signed_prekey() {
                tracing::warn!(error = %e, "Stored identity unusable, regenerating device state");
                return self.create().await;
            }
            tracing::warn!(device_id = %state.device_id, "Repaired invalid signed prekey signature");
            changed = true;
        }

        let purged = state.purge_consumed_prekeys(
            now_timestamp_millis(),
            self.config.consumed_prekey_grace_secs,
        );
        if purged > 0 {
            tracing::debug!(purged, "Purged expired one-time prekeys");
            changed = true;
        }

        if changed {
            self.persist(&state).await;
        }
        Ok(state)
    }

    /// `None` when nothing usable is stored
    async fn load_persisted(&self) -> Result<Option<Loaded>> {
        let raw = match self.storage.get_item(&self.config.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(Error::StorageCorrupted(reason)) => {
                tracing::warn!(%reason, "Stored device state failed its integrity check");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Stored device state is not valid JSON");
                return Ok(None);
            }
        };

        let version = value.get("version").and_then(|v| v.as_u64());
        if version != Some(u64::from(DEVICE_STATE_VERSION)) {
            tracing::info!(
                stored = ?version,
                expected = DEVICE_STATE_VERSION,
                "Device state version mismatch"
            );
            return Ok(None);
        }

        let normalized = ["oneTimePrekeys", "sentMessageKeys", "peerFingerprints"]
            .iter()
            .any(|field| value.get(field).map_or(true, |v| v.is_null()));

        match serde_json::from_value::<DeviceState>(value) {
            Ok(state) => Ok(Some(Loaded { state, normalized })),
            Err(e) => {
                tracing::warn!(error = %e, "Stored device state does not match the schema");
                Ok(None)
            }
        }
    }

    async fn create(&self) -> Result<DeviceState> {
        let state = DeviceState::generate(self.config.prekey_batch_size, self.rng.as_ref())?;
        tracing::info!(device_id = %state.device_id, "Created new device state");
        self.persist(&state).await;
        Ok(state)
    }

    /// Write `state` out; a failure marks memory as ahead of disk
    async fn persist(&self, state: &DeviceState) {
        let json = match serde_json::to_string(state) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize device state");
                self.dirty.store(true, Ordering::SeqCst);
                return;
            }
        };
        match self.storage.set_item(&self.config.storage_key, &json).await {
            Ok(()) => self.dirty.store(false, Ordering::SeqCst),
            Err(e) => {
                tracing::error!(error = %e, code = e.code(), "Failed to persist device state");
                self.dirty.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Append unconsumed one-time prekeys from `persisted` that `current` lacks
fn merge_unknown_prekeys(current: &mut DeviceState, persisted: DeviceState) -> usize {
    let unknown: Vec<_> = persisted
        .one_time_prekeys
        .into_iter()
        .filter(|key| !key.consumed && current.find_prekey(&key.public_key).is_none())
        .collect();
    let count = unknown.len();
    current.one_time_prekeys.extend(unknown);
    count
}

// ============================================================================
// TESTS
// ============================================================================
