//! # Session Module
//!
//! The device-level E2EE session engine: publishes this device's prekeys,
//! encrypts to a peer's device, and decrypts with bounded self-healing.
//!
//! ## Encrypt
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ENCRYPT FOR USER                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  list_device_bundles(peer)                                             │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  validate signatures ──(none valid)──► fallback policy ──► event        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  fresh matching fingerprint? ──yes──► that device                       │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │  first usable bundle ──► claim_prekey ──► re-validate                   │
//! │                                               │                         │
//! │                         one-time key? ──yes──► agree against otk        │
//! │                               │ no                                      │
//! │                               └─────────────► agree against spk         │
//! │                                               │                         │
//! │  seal ──► Envelope ──► remember sent secret + fingerprint (one update)  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Decrypt
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DECRYPT WITH RECOVERY                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  header check ──► sent-key cache hit? ──yes──► open with cached secret  │
//! │                          │ no                                           │
//! │                   from self? ──yes──► SentKeyNotFound                   │
//! │                          │ no                                           │
//! │  stale fingerprint? ──yes──► proactive rebuild (errors logged)         │
//! │                          │                                              │
//! │  Attempt::First ──► fingerprint device check ──► open via otk / spk    │
//! │        │                                                                │
//! │   recoverable error ──► rebuild_session ──► Attempt::Retry ──► open     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every step reports through `tracing` and a broadcast of
//! [`SessionEvent`]s. Neither ever carries key material.

mod bundles;
mod events;
mod recovery;

pub use bundles::{
    bundle_signature_valid, choose_device, fingerprint_for, fingerprint_matches,
    partition_bundles, UsableBundles,
};
pub use events::SessionEvent;
pub use recovery::Attempt;

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::SessionConfig;
use crate::crypto::cipher::{open, seal};
use crate::crypto::dh::{compute_from_ephemeral, derive_ephemeral, DhPrivateKey, SharedSecret};
use crate::crypto::random::{RandomSource, SystemRandom};
use crate::device::{DeviceState, DeviceStateStore};
use crate::directory::{DeviceBundle, DeviceRegistration, DirectoryClient, PrekeyUpload};
use crate::encoding::{from_base64_array, utf8_decode, utf8_encode};
use crate::envelope::{Envelope, KeyRef};
use crate::error::{Error, Result};
use crate::storage::KeyValueStore;
use crate::time::now_timestamp_millis;

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// TYPES
// ============================================================================

/// Transport-level facts about a received envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptContext {
    /// Message id
    pub message_id: String,
    /// Declared sender user
    pub sender_user_id: String,
    /// Declared sender device
    pub sender_device_id: Option<String>,
    /// Transport session, if any
    pub session_id: Option<String>,
}

impl DecryptContext {
    /// Context for a message from `sender_user_id`
    pub fn new(message_id: impl Into<String>, sender_user_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            sender_user_id: sender_user_id.into(),
            sender_device_id: None,
            session_id: None,
        }
    }

    /// Set the declared sender device
    pub fn with_sender_device(mut self, device_id: impl Into<String>) -> Self {
        self.sender_device_id = Some(device_id.into());
        self
    }

    /// Set the transport session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Result of a successful [`SessionClient::encrypt_for_user`]
#[derive(Clone)]
pub struct EncryptedMessage {
    /// The wire envelope
    pub envelope: Envelope,
    /// Base64 shared secret (also cached for local echo)
    pub shared_secret_b64: String,
    /// Recipient device
    pub device_id: String,
    /// Recipient prekey the envelope was agreed against
    pub key_ref: KeyRef,
}

impl std::fmt::Debug for EncryptedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedMessage")
            .field("envelope", &self.envelope)
            .field("device_id", &self.device_id)
            .field("key_ref", &self.key_ref)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SESSION CLIENT
// ============================================================================

/// An owned session engine for one user on one device
///
/// Created by [`SessionClient::bootstrap`]. Cheap operations borrow `&self`;
/// the client can be shared behind an `Arc` and used concurrently.
pub struct SessionClient {
    user_id: String,
    config: SessionConfig,
    directory: Arc<dyn DirectoryClient>,
    store: DeviceStateStore,
    rng: Arc<dyn RandomSource>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionClient {
    /// Load or create the device, publish it and top up its prekeys
    pub async fn bootstrap(
        user_id: impl Into<String>,
        directory: Arc<dyn DirectoryClient>,
        storage: Arc<dyn KeyValueStore>,
        config: SessionConfig,
    ) -> Result<Self> {
        Self::bootstrap_with(user_id, directory, storage, config, Arc::new(SystemRandom)).await
    }

    /// [`SessionClient::bootstrap`] with an explicit randomness source
    pub async fn bootstrap_with(
        user_id: impl Into<String>,
        directory: Arc<dyn DirectoryClient>,
        storage: Arc<dyn KeyValueStore>,
        config: SessionConfig,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let client = Self {
            user_id: user_id.into(),
            store: DeviceStateStore::new(storage, config.clone(), rng.clone()),
            config,
            directory,
            rng,
            event_tx,
        };

        let state = client.store.ensure_device_state().await?;
        let needs_registration = state.last_registered_at.is_none();
        let published = if needs_registration {
            client.register(&state).await?
        } else {
            client.upload_pending(&state).await?
        };
        let replenished = client.replenish_prekeys().await?;

        tracing::info!(
            user_id = %client.user_id,
            device_id = %state.device_id,
            registered = needs_registration,
            uploaded = published + replenished,
            "Session client bootstrapped"
        );
        client.emit(SessionEvent::Bootstrapped {
            device_id: state.device_id,
            registered: needs_registration,
            uploaded: published + replenished,
        });

        Ok(client)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// The user this client acts for
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// This device's id
    pub async fn device_id(&self) -> Result<String> {
        Ok(self.store.snapshot().await?.device_id)
    }

    /// A copy of the current device state
    pub async fn device_state(&self) -> Result<DeviceState> {
        self.store.snapshot().await
    }

    /// The underlying device state store
    pub fn device_store(&self) -> &DeviceStateStore {
        &self.store
    }

    /// The active configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to session events
    ///
    /// Multiple subscribers are supported.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Drop the cached fingerprint for a peer
    ///
    /// Returns whether one was cached.
    pub async fn forget_peer(&self, user_id: &str) -> Result<bool> {
        let removed = self
            .store
            .update(|s| Ok(s.peer_fingerprints.remove(user_id).is_some()))
            .await?;
        if removed {
            tracing::debug!(peer = %user_id, "Forgot peer fingerprint");
        }
        Ok(removed)
    }

    // ========================================================================
    // ENCRYPT
    // ========================================================================

    /// Encrypt `plaintext` to one of `target_user_id`'s devices
    ///
    /// Returns `Ok(None)` when the target has no usable device bundle.
    pub async fn encrypt_for_user(
        &self,
        target_user_id: &str,
        message_id: &str,
        plaintext: &str,
    ) -> Result<Option<EncryptedMessage>> {
        match self.encrypt_inner(target_user_id, message_id, plaintext).await {
            Ok(message) => Ok(Some(message)),
            Err(Error::NoUsableDeviceBundle(reason)) => {
                tracing::warn!(
                    peer = %target_user_id,
                    message_id = %message_id,
                    %reason,
                    "No usable device bundle, message not encrypted"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn encrypt_inner(
        &self,
        target_user_id: &str,
        message_id: &str,
        plaintext: &str,
    ) -> Result<EncryptedMessage> {
        let bundles = self.directory.list_device_bundles(target_user_id).await?;
        let usable = self.select_usable(target_user_id, bundles)?;

        let now = now_timestamp_millis();
        let state = self.store.snapshot().await?;
        let chosen = choose_device(
            &usable,
            state.peer_fingerprints.get(target_user_id),
            None,
            now,
            self.config.fingerprint_ttl_secs,
        )
        .ok_or_else(|| Error::NoUsableDeviceBundle(target_user_id.to_string()))?;

        let claimed = self.claim_validated(target_user_id, chosen).await?;

        let (key_ref, peer_public) = match &claimed.one_time_prekey_pub {
            Some(one_time) => (
                KeyRef::OneTime(one_time.clone()),
                from_base64_array(one_time, "one-time prekey")?,
            ),
            None => (
                KeyRef::Signed,
                from_base64_array(&claimed.signed_prekey_pub, "signed prekey")?,
            ),
        };

        let exchange = derive_ephemeral(&peer_public, self.rng.as_ref())?;
        let sealed = seal(
            &exchange.shared_secret,
            &utf8_encode(plaintext),
            &exchange.ephemeral_public,
            self.rng.as_ref(),
        )?;
        let envelope = Envelope::from_sealed(&sealed, key_ref.clone());
        let shared_secret_b64 = exchange.shared_secret.to_base64();

        let capacity = self.config.sent_key_capacity;
        let fingerprint = fingerprint_for(&claimed, now);
        let secret = shared_secret_b64.clone();
        self.store
            .update(move |s| {
                s.remember_sent_key(message_id, secret, now, capacity);
                s.peer_fingerprints
                    .insert(target_user_id.to_string(), fingerprint);
                Ok(())
            })
            .await?;

        tracing::debug!(
            peer = %target_user_id,
            device_id = %claimed.device_id,
            message_id = %message_id,
            key_ref = key_ref.kind(),
            "Encrypted message"
        );
        self.emit(SessionEvent::MessageEncrypted {
            message_id: message_id.to_string(),
            user_id: target_user_id.to_string(),
            device_id: claimed.device_id.clone(),
            key_ref: key_ref.kind(),
        });

        Ok(EncryptedMessage {
            envelope,
            shared_secret_b64,
            device_id: claimed.device_id,
            key_ref,
        })
    }

    // ========================================================================
    // DECRYPT
    // ========================================================================

    /// Decrypt an envelope, rebuilding the session once if that can help
    ///
    /// `from_self` marks envelopes this user sent (for example echoed back by
    /// the server); those only decrypt from the sent-key cache.
    pub async fn decrypt_envelope(
        &self,
        envelope: &Envelope,
        from_self: bool,
        context: &DecryptContext,
    ) -> Result<String> {
        envelope.validate_header()?;

        let state = self.store.snapshot().await?;
        if let Some(sent) = state.sent_key(&context.message_id) {
            tracing::debug!(message_id = %context.message_id, "Decrypting from sent-key cache");
            let secret = SharedSecret::from_base64(&sent.shared_secret)?;
            return utf8_decode(&open_envelope(&secret, envelope)?);
        }

        if from_self {
            return Err(Error::SentKeyNotFound(context.message_id.clone()));
        }

        let ephemeral = envelope.aad_metadata()?.ephemeral_key()?;

        let now = now_timestamp_millis();
        if let Some(fingerprint) = state.peer_fingerprints.get(&context.sender_user_id) {
            if !fingerprint.is_fresh(now, self.config.fingerprint_ttl_secs) {
                tracing::warn!(
                    peer = %context.sender_user_id,
                    device_id = %fingerprint.device_id,
                    "Peer fingerprint is stale, rebuilding session"
                );
                self.emit(SessionEvent::FingerprintStale {
                    user_id: context.sender_user_id.clone(),
                    device_id: fingerprint.device_id.clone(),
                });
                self.rebuild_logged(context).await;
            }
        }

        let mut attempt = Attempt::First;
        loop {
            let error = match self.try_decrypt(envelope, &ephemeral, context, attempt).await {
                Ok(plaintext) => {
                    self.report_attempt(context, attempt, None, false);
                    return Ok(plaintext);
                }
                Err(e) => e,
            };

            let next = attempt.next().filter(|_| error.is_recoverable());
            self.report_attempt(context, attempt, Some(&error), next.is_some());

            let Some(next) = next else {
                return Err(error);
            };
            self.rebuild_logged(context).await;
            attempt = next;
        }
    }

    async fn try_decrypt(
        &self,
        envelope: &Envelope,
        ephemeral: &[u8; 32],
        context: &DecryptContext,
        attempt: Attempt,
    ) -> Result<String> {
        let state = self.store.snapshot().await?;

        if attempt.is_first() {
            if let (Some(declared), Some(fingerprint)) = (
                context.sender_device_id.as_deref(),
                state.peer_fingerprints.get(&context.sender_user_id),
            ) {
                if fingerprint.device_id != declared {
                    return Err(Error::DeviceFingerprintMismatch {
                        expected: fingerprint.device_id.clone(),
                        actual: declared.to_string(),
                    });
                }
            }
        }

        match &envelope.key_ref {
            KeyRef::OneTime(public) => {
                let private = self.one_time_private(&state, public).await?;
                let secret = compute_from_ephemeral(&private, ephemeral)?;
                let plaintext = open_envelope(&secret, envelope)?;

                let now = now_timestamp_millis();
                let newly_consumed = self
                    .store
                    .update(|s| Ok(s.mark_prekey_consumed(public, now)))
                    .await?;
                if newly_consumed {
                    tracing::debug!(message_id = %context.message_id, "Consumed one-time prekey");
                    if let Err(e) = self.replenish_prekeys().await {
                        tracing::warn!(error = %e, code = e.code(), "Prekey replenishment failed");
                    }
                }

                utf8_decode(&plaintext)
            }
            KeyRef::Signed => {
                let private = state.signed_prekey.private()?;
                let secret = compute_from_ephemeral(&private, ephemeral)?;
                utf8_decode(&open_envelope(&secret, envelope)?)
            }
        }
    }

    /// Private half of a local one-time prekey, refreshing state once on a miss
    async fn one_time_private(&self, state: &DeviceState, public: &str) -> Result<DhPrivateKey> {
        if let Some(prekey) = state.find_prekey(public) {
            return prekey.private();
        }

        let reloaded = self.store.reload().await?;
        match reloaded.find_prekey(public) {
            Some(prekey) => prekey.private(),
            None => Err(Error::UnknownPrekey(public.to_string())),
        }
    }

    fn report_attempt(
        &self,
        context: &DecryptContext,
        attempt: Attempt,
        error: Option<&Error>,
        will_retry: bool,
    ) {
        let error_code = error.map(Error::code);
        match error {
            None => tracing::debug!(
                message_id = %context.message_id,
                sender = %context.sender_user_id,
                sender_device = ?context.sender_device_id,
                session_id = ?context.session_id,
                %attempt,
                "Decrypted envelope"
            ),
            Some(e) => tracing::warn!(
                message_id = %context.message_id,
                sender = %context.sender_user_id,
                sender_device = ?context.sender_device_id,
                session_id = ?context.session_id,
                %attempt,
                code = e.code(),
                will_retry,
                "Decrypt attempt failed: {}",
                e
            ),
        }

        self.emit(SessionEvent::DecryptAttempt {
            message_id: context.message_id.clone(),
            sender_user_id: context.sender_user_id.clone(),
            sender_device_id: context.sender_device_id.clone(),
            session_id: context.session_id.clone(),
            attempt,
            error_code,
            will_retry,
        });
    }

    // ========================================================================
    // SESSION MAINTENANCE
    // ========================================================================

    /// Refresh local state, republish this device and re-establish the
    /// fingerprint for `peer_user_id`
    ///
    /// A usable `preferred_device_id` wins over the cached fingerprint.
    /// Safe to call repeatedly.
    pub async fn rebuild_session(
        &self,
        peer_user_id: &str,
        preferred_device_id: Option<&str>,
    ) -> Result<()> {
        let state = self.store.reload().await?;
        self.register(&state).await?;
        if let Err(e) = self.replenish_prekeys().await {
            tracing::warn!(error = %e, code = e.code(), "Prekey replenishment failed during rebuild");
        }

        let bundles = self.directory.list_device_bundles(peer_user_id).await?;
        let usable = self.select_usable(peer_user_id, bundles)?;

        let now = now_timestamp_millis();
        let state = self.store.snapshot().await?;
        let chosen = choose_device(
            &usable,
            state.peer_fingerprints.get(peer_user_id),
            preferred_device_id,
            now,
            self.config.fingerprint_ttl_secs,
        )
        .ok_or_else(|| Error::NoUsableDeviceBundle(peer_user_id.to_string()))?;

        let claimed = self.claim_validated(peer_user_id, chosen).await?;
        let fingerprint = fingerprint_for(&claimed, now);
        self.store
            .update(move |s| {
                s.peer_fingerprints
                    .insert(peer_user_id.to_string(), fingerprint);
                Ok(())
            })
            .await?;

        tracing::info!(peer = %peer_user_id, device_id = %claimed.device_id, "Session rebuilt");
        self.emit(SessionEvent::SessionRebuilt {
            user_id: peer_user_id.to_string(),
            device_id: claimed.device_id,
        });
        Ok(())
    }

    async fn rebuild_logged(&self, context: &DecryptContext) {
        if let Err(e) = self
            .rebuild_session(&context.sender_user_id, context.sender_device_id.as_deref())
            .await
        {
            tracing::warn!(
                peer = %context.sender_user_id,
                message_id = %context.message_id,
                code = e.code(),
                "Session rebuild failed: {}",
                e
            );
            self.emit(SessionEvent::RebuildFailed {
                user_id: context.sender_user_id.clone(),
                error_code: e.code(),
            });
        }
    }

    /// Purge expired consumed prekeys and top the directory stock back up
    ///
    /// Returns the number of prekeys generated. A failing stock query is
    /// logged and treated as nothing to do.
    pub async fn replenish_prekeys(&self) -> Result<usize> {
        let now = now_timestamp_millis();
        let grace = self.config.consumed_prekey_grace_secs;
        let (device_id, purged) = self
            .store
            .update(|s| Ok((s.device_id.clone(), s.purge_consumed_prekeys(now, grace))))
            .await?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired one-time prekeys");
        }

        let stock = match self.directory.get_prekey_stock(&device_id).await {
            Ok(stock) => stock,
            Err(e) => {
                tracing::warn!(error = %e, code = e.code(), "Prekey stock query failed");
                return Ok(0);
            }
        };
        if stock >= self.config.prekey_floor {
            return Ok(0);
        }

        let count = self.config.prekey_batch_size.saturating_sub(stock);
        let rng = &self.rng;
        let fresh = self
            .store
            .update(|s| Ok(s.generate_one_time_prekeys(count, rng.as_ref())))
            .await?;

        let uploads: Vec<PrekeyUpload> = fresh.iter().map(PrekeyUpload::from).collect();
        self.directory.upload_prekeys(&device_id, uploads).await?;

        let published: Vec<String> = fresh.iter().map(|k| k.public_key.clone()).collect();
        self.store
            .update(|s| {
                s.mark_uploaded(&published);
                Ok(())
            })
            .await?;

        tracing::info!(device_id = %device_id, stock, generated = count, "Replenished one-time prekeys");
        self.emit(SessionEvent::PrekeysReplenished {
            device_id,
            stock,
            generated: count,
        });
        Ok(count)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Register the device with every unconsumed one-time prekey
    async fn register(&self, state: &DeviceState) -> Result<usize> {
        let registration =
            DeviceRegistration::from_state(state, &self.config.device_name, &self.config.platform);
        let published: Vec<String> = registration
            .one_time_prekeys
            .iter()
            .map(|k| k.public_key.clone())
            .collect();

        self.directory.register_device(registration).await?;

        let now = now_timestamp_millis();
        self.store
            .update(|s| {
                s.mark_uploaded(&published);
                s.last_registered_at = Some(now);
                Ok(())
            })
            .await?;

        tracing::debug!(device_id = %state.device_id, prekeys = published.len(), "Registered device");
        Ok(published.len())
    }

    /// Upload one-time prekeys generated since the last publication
    async fn upload_pending(&self, state: &DeviceState) -> Result<usize> {
        let pending = state.pending_upload();
        if pending.is_empty() {
            return Ok(0);
        }

        let uploads: Vec<PrekeyUpload> = pending.iter().map(PrekeyUpload::from).collect();
        self.directory.upload_prekeys(&state.device_id, uploads).await?;

        let published: Vec<String> = pending.iter().map(|k| k.public_key.clone()).collect();
        self.store
            .update(|s| {
                s.mark_uploaded(&published);
                Ok(())
            })
            .await?;
        Ok(published.len())
    }

    /// Validated bundles, or unvalidated ones when the fallback policy allows
    fn select_usable(&self, user_id: &str, bundles: Vec<DeviceBundle>) -> Result<Vec<DeviceBundle>> {
        let usable = partition_bundles(bundles)
            .ok_or_else(|| Error::NoUsableDeviceBundle(format!("{} has no devices", user_id)))?;
        if usable.validated {
            if !usable.rejected.is_empty() {
                tracing::debug!(
                    peer = %user_id,
                    rejected = ?usable.rejected,
                    "Ignoring bundles with invalid signatures"
                );
            }
            return Ok(usable.bundles);
        }

        let fallback = self.config.allow_unverified_fallback;
        tracing::warn!(
            peer = %user_id,
            devices = ?usable.rejected,
            fallback,
            "No device bundle passed signature validation"
        );
        self.emit(SessionEvent::BundleValidationFailed {
            user_id: user_id.to_string(),
            device_ids: usable.rejected,
            fallback,
        });

        if !fallback {
            return Err(Error::NoUsableDeviceBundle(format!(
                "{} has no validated devices",
                user_id
            )));
        }
        Ok(usable.bundles)
    }

    /// Claim a prekey for `chosen` and check what came back
    async fn claim_validated(&self, user_id: &str, chosen: &DeviceBundle) -> Result<DeviceBundle> {
        let claimed = self
            .directory
            .claim_prekey(user_id, &chosen.device_id)
            .await?;

        if claimed.device_id != chosen.device_id {
            return Err(Error::NoUsableDeviceBundle(format!(
                "claim for device {} returned device {}",
                chosen.device_id, claimed.device_id
            )));
        }

        if !bundle_signature_valid(&claimed) {
            if !self.config.allow_unverified_fallback {
                return Err(Error::NoUsableDeviceBundle(format!(
                    "claimed bundle for device {} failed validation",
                    claimed.device_id
                )));
            }
            tracing::warn!(
                peer = %user_id,
                device_id = %claimed.device_id,
                "Using claimed bundle with an invalid signature"
            );
        }

        Ok(claimed)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Authenticate and decrypt an envelope under `secret`
fn open_envelope(secret: &SharedSecret, envelope: &Envelope) -> Result<Vec<u8>> {
    open(
        secret,
        &envelope.iv_bytes()?,
        &envelope.ciphertext_bytes()?,
        &envelope.aad_bytes()?,
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::storage::SecureStore;

    async fn client(directory: &Arc<MemoryDirectory>, user: &str) -> SessionClient {
        SessionClient::bootstrap(
            user,
            Arc::new(directory.client_for(user)),
            Arc::new(SecureStore::new()),
            SessionConfig::default(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_decrypt_context_builder() {
        let context = DecryptContext::new("m1", "alice")
            .with_sender_device("dev-1")
            .with_session("s-9");
        assert_eq!(context.message_id, "m1");
        assert_eq!(context.sender_user_id, "alice");
        assert_eq!(context.sender_device_id.as_deref(), Some("dev-1"));
        assert_eq!(context.session_id.as_deref(), Some("s-9"));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_invalid_config() {
        let directory = MemoryDirectory::new();
        let config = SessionConfig {
            prekey_batch_size: 0,
            ..SessionConfig::default()
        };
        let result = SessionClient::bootstrap(
            "alice",
            Arc::new(directory.client_for("alice")),
            Arc::new(SecureStore::new()),
            config,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_second_bootstrap_does_not_reregister() {
        let directory = MemoryDirectory::new();
        let storage = Arc::new(SecureStore::new());
        let connect = || {
            SessionClient::bootstrap(
                "alice",
                Arc::new(directory.client_for("alice")),
                storage.clone(),
                SessionConfig::default(),
            )
        };

        let first = connect().await.unwrap();
        let second = connect().await.unwrap();

        assert_eq!(
            first.device_id().await.unwrap(),
            second.device_id().await.unwrap()
        );
        assert_eq!(directory.counters().registrations, 1);
    }

    #[tokio::test]
    async fn test_forget_peer() {
        let directory = MemoryDirectory::new();
        let alice = client(&directory, "alice").await;
        let _bob = client(&directory, "bob").await;

        alice.encrypt_for_user("bob", "m1", "hi").await.unwrap().unwrap();
        assert!(alice.forget_peer("bob").await.unwrap());
        assert!(!alice.forget_peer("bob").await.unwrap());
        assert!(alice.device_state().await.unwrap().peer_fingerprints.is_empty());
    }

    #[tokio::test]
    async fn test_encrypted_message_debug_hides_secret() {
        let directory = MemoryDirectory::new();
        let alice = client(&directory, "alice").await;
        let _bob = client(&directory, "bob").await;

        let message = alice.encrypt_for_user("bob", "m1", "hi").await.unwrap().unwrap();
        let debug = format!("{:?}", message);
        assert!(!debug.contains(&message.shared_secret_b64));
    }
}
