//! # Device Module
//!
//! The local device's cryptographic material and session bookkeeping.
//!
//! ## Device State
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           DEVICE STATE                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  DeviceState (version 1)                                               │
//! │  ├── deviceId            UUID v4, fixed for the installation           │
//! │  ├── identity            Ed25519 keypair (never rotated in place)      │
//! │  ├── signedPrekey        DH keypair + identity signature over public   │
//! │  ├── oneTimePrekeys[]    single-use DH keypairs                        │
//! │  ├── sentMessageKeys[]   ring of the newest 200 message secrets        │
//! │  ├── lastRegisteredAt    set once the directory knows the device       │
//! │  └── peerFingerprints{}  user id → last seen device bundle             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## One-Time Prekey Lifecycle
//!
//! ```text
//!   generated ──► uploaded ──► consumed (consumedAt) ──► purged
//!                                   │                       ▲
//!                                   └──── grace window ─────┘
//!                                         (7 days)
//! ```
//!
//! A consumed prekey is only ever used again to decrypt messages that
//! already referenced it. It is never handed out for a new agreement.
//!
//! All records serialize with camelCase field names and keep key material
//! as padded base64. `Debug` output never includes private keys.

mod store;

pub use store::DeviceStateStore;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::dh::{generate_key_pair, DhPrivateKey};
use crate::crypto::random::{random_array, RandomSource};
use crate::crypto::signing::{verify, SigningKeyPair};
use crate::encoding::{from_base64, from_base64_array, to_base64};
use crate::error::Result;
use crate::time::is_older_than;

/// Schema version of the persisted device state
pub const DEVICE_STATE_VERSION: u32 = 1;

// ============================================================================
// RECORDS
// ============================================================================

/// The long-lived Ed25519 identity of this installation
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Base64 public key
    pub public_key: String,
    /// Base64 32-byte seed
    pub private_key: String,
}

impl DeviceIdentity {
    /// Generate a fresh identity
    pub fn generate(rng: &dyn RandomSource) -> Self {
        let keypair = SigningKeyPair::generate(rng);
        Self {
            public_key: to_base64(&keypair.public_bytes()),
            private_key: to_base64(&keypair.seed_bytes()),
        }
    }

    /// Rebuild the signing keypair from the stored seed
    pub fn keypair(&self) -> Result<SigningKeyPair> {
        let seed: [u8; 32] = from_base64_array(&self.private_key, "identity seed")?;
        Ok(SigningKeyPair::from_seed(&seed))
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// A medium-lived prekey attested by the device identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPrekey {
    /// Base64 DH public value
    pub public_key: String,
    /// Base64 DH private exponent
    pub private_key: String,
    /// Base64 Ed25519 signature over the raw public value
    pub signature: String,
}

impl SignedPrekey {
    /// Generate a prekey and sign it with `identity`
    pub fn generate(identity: &SigningKeyPair, rng: &dyn RandomSource) -> Self {
        let pair = generate_key_pair(rng);
        Self {
            public_key: to_base64(&pair.public),
            private_key: pair.private.to_base64(),
            signature: identity.sign(&pair.public).to_base64(),
        }
    }

    /// Whether the signature verifies under `identity_public`
    pub fn verify(&self, identity_public: &[u8]) -> bool {
        match (
            from_base64(&self.public_key, "signed prekey"),
            from_base64(&self.signature, "signed prekey signature"),
        ) {
            (Ok(public), Ok(signature)) => verify(&public, &signature, identity_public),
            _ => false,
        }
    }

    /// Recompute the signature with `identity`, keeping the keypair
    pub fn resign(&mut self, identity: &SigningKeyPair) -> Result<()> {
        let public = from_base64(&self.public_key, "signed prekey")?;
        self.signature = identity.sign(&public).to_base64();
        Ok(())
    }

    /// The private exponent
    pub fn private(&self) -> Result<DhPrivateKey> {
        DhPrivateKey::from_base64(&self.private_key)
    }
}

impl std::fmt::Debug for SignedPrekey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPrekey")
            .field("public_key", &self.public_key)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A single-use prekey
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePrekey {
    /// Monotonic per-device id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Base64 DH public value (also the `otk:` key reference)
    pub public_key: String,
    /// Base64 DH private exponent
    pub private_key: String,
    /// Published to the directory
    #[serde(default)]
    pub uploaded: bool,
    /// Claimed by a peer and used to decrypt
    #[serde(default)]
    pub consumed: bool,
    /// When the key was consumed (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<i64>,
}

impl OneTimePrekey {
    /// Generate a fresh, unpublished prekey
    pub fn generate(id: u32, rng: &dyn RandomSource) -> Self {
        let pair = generate_key_pair(rng);
        Self {
            id: Some(id),
            public_key: to_base64(&pair.public),
            private_key: pair.private.to_base64(),
            uploaded: false,
            consumed: false,
            consumed_at: None,
        }
    }

    /// The private exponent
    pub fn private(&self) -> Result<DhPrivateKey> {
        DhPrivateKey::from_base64(&self.private_key)
    }
}

impl std::fmt::Debug for OneTimePrekey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimePrekey")
            .field("id", &self.id)
            .field("public_key", &self.public_key)
            .field("uploaded", &self.uploaded)
            .field("consumed", &self.consumed)
            .field("consumed_at", &self.consumed_at)
            .finish_non_exhaustive()
    }
}

/// Shared secret remembered for a message this device sent
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessageKey {
    /// Message id
    pub message_id: String,
    /// Base64 shared secret
    pub shared_secret: String,
    /// When the message was encrypted (Unix ms)
    pub created_at: i64,
}

impl std::fmt::Debug for SentMessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentMessageKey")
            .field("message_id", &self.message_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Last seen device bundle for a remote user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerFingerprint {
    /// Remote device id
    pub device_id: String,
    /// Base64 identity public key
    pub identity_key_public: String,
    /// Base64 signed prekey public value
    pub signed_prekey_public: String,
    /// When the entry was written (Unix ms)
    pub updated_at: i64,
}

impl PeerFingerprint {
    /// Fresh while `now - updated_at < ttl`
    pub fn is_fresh(&self, now: i64, ttl_secs: i64) -> bool {
        !is_older_than(self.updated_at, now, ttl_secs)
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Everything this device persists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    /// Schema version, [`DEVICE_STATE_VERSION`]
    pub version: u32,
    /// This device's id
    pub device_id: String,
    /// Identity keypair
    pub identity: DeviceIdentity,
    /// Current signed prekey
    pub signed_prekey: SignedPrekey,
    /// Local one-time prekeys, including consumed ones inside the grace window
    #[serde(default)]
    pub one_time_prekeys: Vec<OneTimePrekey>,
    /// Sent message secrets, oldest first
    #[serde(default)]
    pub sent_message_keys: Vec<SentMessageKey>,
    /// Last successful registration (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_registered_at: Option<i64>,
    /// Cached peer fingerprints by user id
    #[serde(default)]
    pub peer_fingerprints: BTreeMap<String, PeerFingerprint>,
}

impl DeviceState {
    /// Create a fresh device with `prekey_count` unpublished one-time prekeys
    pub fn generate(prekey_count: usize, rng: &dyn RandomSource) -> Result<Self> {
        let identity = DeviceIdentity::generate(rng);
        let signed_prekey = SignedPrekey::generate(&identity.keypair()?, rng);
        let device_id = uuid::Builder::from_random_bytes(random_array(rng))
            .into_uuid()
            .to_string();

        let mut state = Self {
            version: DEVICE_STATE_VERSION,
            device_id,
            identity,
            signed_prekey,
            one_time_prekeys: Vec::with_capacity(prekey_count),
            sent_message_keys: Vec::new(),
            last_registered_at: None,
            peer_fingerprints: BTreeMap::new(),
        };
        state.generate_one_time_prekeys(prekey_count, rng);
        Ok(state)
    }

    /// Append `count` new prekeys with monotonically increasing ids and
    /// return copies of them
    pub fn generate_one_time_prekeys(
        &mut self,
        count: usize,
        rng: &dyn RandomSource,
    ) -> Vec<OneTimePrekey> {
        let first_id = self.next_prekey_id();
        let fresh: Vec<OneTimePrekey> = (0..count as u32)
            .map(|offset| OneTimePrekey::generate(first_id + offset, rng))
            .collect();
        self.one_time_prekeys.extend(fresh.iter().cloned());
        fresh
    }

    /// Max existing id + 1 (1 for an empty set)
    pub fn next_prekey_id(&self) -> u32 {
        self.one_time_prekeys
            .iter()
            .filter_map(|k| k.id)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Prekeys generated locally but not yet published
    pub fn pending_upload(&self) -> Vec<OneTimePrekey> {
        self.one_time_prekeys
            .iter()
            .filter(|k| !k.uploaded && !k.consumed)
            .cloned()
            .collect()
    }

    /// Prekeys not yet consumed
    pub fn unconsumed_prekeys(&self) -> Vec<OneTimePrekey> {
        self.one_time_prekeys
            .iter()
            .filter(|k| !k.consumed)
            .cloned()
            .collect()
    }

    /// Flag the prekeys with these public keys as uploaded
    pub fn mark_uploaded(&mut self, public_keys: &[String]) {
        for key in &mut self.one_time_prekeys {
            if public_keys.contains(&key.public_key) {
                key.uploaded = true;
            }
        }
    }

    /// Look up a local prekey by its base64 public value
    pub fn find_prekey(&self, public_key: &str) -> Option<&OneTimePrekey> {
        self.one_time_prekeys
            .iter()
            .find(|k| k.public_key == public_key)
    }

    /// Mark a prekey consumed at `now`
    ///
    /// Idempotent: an already consumed key keeps its original timestamp.
    /// Returns whether anything changed.
    pub fn mark_prekey_consumed(&mut self, public_key: &str, now: i64) -> bool {
        match self
            .one_time_prekeys
            .iter_mut()
            .find(|k| k.public_key == public_key)
        {
            Some(key) if !key.consumed => {
                key.consumed = true;
                key.consumed_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Drop consumed prekeys whose grace window has elapsed
    ///
    /// A consumed key without a timestamp gets one now and is kept for a
    /// full window. Returns the number of keys removed.
    pub fn purge_consumed_prekeys(&mut self, now: i64, grace_secs: i64) -> usize {
        for key in &mut self.one_time_prekeys {
            if key.consumed && key.consumed_at.is_none() {
                key.consumed_at = Some(now);
            }
        }

        let before = self.one_time_prekeys.len();
        self.one_time_prekeys.retain(|k| match (k.consumed, k.consumed_at) {
            (true, Some(at)) => !is_older_than(at, now, grace_secs),
            _ => true,
        });
        before - self.one_time_prekeys.len()
    }

    /// Record the secret used for a sent message
    ///
    /// Re-recording a message id moves it to the newest slot. The oldest
    /// entries are evicted beyond `capacity`.
    pub fn remember_sent_key(
        &mut self,
        message_id: &str,
        shared_secret: String,
        now: i64,
        capacity: usize,
    ) {
        self.sent_message_keys.retain(|k| k.message_id != message_id);
        self.sent_message_keys.push(SentMessageKey {
            message_id: message_id.to_string(),
            shared_secret,
            created_at: now,
        });
        if self.sent_message_keys.len() > capacity {
            let excess = self.sent_message_keys.len() - capacity;
            self.sent_message_keys.drain(..excess);
        }
    }

    /// The cached secret for a sent message
    pub fn sent_key(&self, message_id: &str) -> Option<&SentMessageKey> {
        self.sent_message_keys
            .iter()
            .find(|k| k.message_id == message_id)
    }

    /// Whether the signed prekey verifies under the current identity
    pub fn signed_prekey_is_valid(&self) -> bool {
        match from_base64(&self.identity.public_key, "identity public key") {
            Ok(identity_public) => self.signed_prekey.verify(&identity_public),
            Err(_) => false,
        }
    }

    /// Re-sign the signed prekey with the stored identity
    pub fn repair_signed_prekey(&mut self) -> Result<()> {
        let identity = self.identity.keypair()?;
        self.signed_prekey.resign(&identity)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random::{SeededRandom, SystemRandom};

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn fresh_state() -> DeviceState {
        DeviceState::generate(10, &SystemRandom).unwrap()
    }

    #[test]
    fn test_fresh_state_shape() {
        let state = fresh_state();
        assert_eq!(state.version, DEVICE_STATE_VERSION);
        assert_eq!(state.one_time_prekeys.len(), 10);
        assert!(state
            .one_time_prekeys
            .iter()
            .all(|k| !k.uploaded && !k.consumed && k.consumed_at.is_none()));
        assert!(state.last_registered_at.is_none());
        assert!(state.signed_prekey_is_valid());
        assert!(uuid::Uuid::parse_str(&state.device_id).is_ok());

        let ids: Vec<u32> = state.one_time_prekeys.iter().filter_map(|k| k.id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_device_id_is_uuid_v4() {
        let state = DeviceState::generate(0, &SeededRandom::new(3)).unwrap();
        let id = uuid::Uuid::parse_str(&state.device_id).unwrap();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_camel_case_serialization() {
        let state = fresh_state();
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("deviceId").is_some());
        assert!(json.get("signedPrekey").is_some());
        assert!(json.get("oneTimePrekeys").is_some());
        assert!(json.get("sentMessageKeys").is_some());
        assert!(json.get("peerFingerprints").is_some());
        assert!(json["oneTimePrekeys"][0].get("publicKey").is_some());

        let restored: DeviceState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_debug_redacts_private_keys() {
        let state = fresh_state();
        let debug = format!("{:?}", state);
        assert!(!debug.contains(&state.identity.private_key));
        assert!(!debug.contains(&state.signed_prekey.private_key));
        assert!(!debug.contains(&state.one_time_prekeys[0].private_key));
    }

    #[test]
    fn test_prekey_ids_are_monotonic() {
        let mut state = fresh_state();
        state.one_time_prekeys.remove(0);
        let fresh = state.generate_one_time_prekeys(3, &SystemRandom);
        let ids: Vec<u32> = fresh.iter().filter_map(|k| k.id).collect();
        assert_eq!(ids, vec![11, 12, 13]);
        assert_eq!(state.one_time_prekeys.len(), 12);
    }

    #[test]
    fn test_mark_uploaded_and_pending() {
        let mut state = fresh_state();
        let first_two: Vec<String> = state.one_time_prekeys[..2]
            .iter()
            .map(|k| k.public_key.clone())
            .collect();
        state.mark_uploaded(&first_two);
        assert_eq!(state.pending_upload().len(), 8);
    }

    #[test]
    fn test_mark_consumed_is_idempotent() {
        let mut state = fresh_state();
        let key = state.one_time_prekeys[0].public_key.clone();

        assert!(state.mark_prekey_consumed(&key, 1_000));
        assert!(!state.mark_prekey_consumed(&key, 2_000));
        let stored = state.find_prekey(&key).unwrap();
        assert!(stored.consumed);
        assert_eq!(stored.consumed_at, Some(1_000));
        assert_eq!(state.unconsumed_prekeys().len(), 9);

        assert!(!state.mark_prekey_consumed("unknown", 3_000));
    }

    #[test]
    fn test_purge_after_grace_window() {
        let mut state = fresh_state();
        let old = state.one_time_prekeys[0].public_key.clone();
        let recent = state.one_time_prekeys[1].public_key.clone();
        let now = 100 * DAY_MS;

        state.mark_prekey_consumed(&old, now - 8 * DAY_MS);
        state.mark_prekey_consumed(&recent, now - 6 * DAY_MS);

        let purged = state.purge_consumed_prekeys(now, 7 * 24 * 60 * 60);
        assert_eq!(purged, 1);
        assert!(state.find_prekey(&old).is_none());
        assert!(state.find_prekey(&recent).is_some());
        assert_eq!(state.one_time_prekeys.len(), 9);
    }

    #[test]
    fn test_purge_stamps_untimed_consumed_keys() {
        let mut state = fresh_state();
        state.one_time_prekeys[0].consumed = true;

        assert_eq!(state.purge_consumed_prekeys(5_000, 60), 0);
        assert_eq!(state.one_time_prekeys[0].consumed_at, Some(5_000));
    }

    #[test]
    fn test_sent_key_ring_evicts_oldest() {
        let mut state = fresh_state();
        for i in 0..205 {
            state.remember_sent_key(&format!("m{}", i), format!("s{}", i), i, 200);
        }
        assert_eq!(state.sent_message_keys.len(), 200);
        assert!(state.sent_key("m4").is_none());
        assert!(state.sent_key("m5").is_some());
        assert_eq!(state.sent_message_keys[0].message_id, "m5");
    }

    #[test]
    fn test_sent_key_rerecord_moves_to_newest() {
        let mut state = fresh_state();
        state.remember_sent_key("a", "1".into(), 1, 3);
        state.remember_sent_key("b", "2".into(), 2, 3);
        state.remember_sent_key("c", "3".into(), 3, 3);
        state.remember_sent_key("a", "4".into(), 4, 3);
        state.remember_sent_key("d", "5".into(), 5, 3);

        let ids: Vec<&str> = state
            .sent_message_keys
            .iter()
            .map(|k| k.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "d"]);
        assert_eq!(state.sent_key("a").unwrap().shared_secret, "4");
    }

    #[test]
    fn test_signed_prekey_binding() {
        let state = fresh_state();
        let other = DeviceIdentity::generate(&SystemRandom);
        let other_public = from_base64(&other.public_key, "other").unwrap();

        assert!(state.signed_prekey_is_valid());
        assert!(!state.signed_prekey.verify(&other_public));
    }

    #[test]
    fn test_repair_signed_prekey() {
        let mut state = fresh_state();
        let public_before = state.signed_prekey.public_key.clone();
        state.signed_prekey.signature = to_base64(&[0u8; 64]);
        assert!(!state.signed_prekey_is_valid());

        state.repair_signed_prekey().unwrap();
        assert!(state.signed_prekey_is_valid());
        assert_eq!(state.signed_prekey.public_key, public_before);
    }

    #[test]
    fn test_fingerprint_freshness() {
        let fingerprint = PeerFingerprint {
            device_id: "d".into(),
            identity_key_public: "i".into(),
            signed_prekey_public: "s".into(),
            updated_at: 0,
        };
        assert!(fingerprint.is_fresh(DAY_MS - 1, 24 * 60 * 60));
        assert!(!fingerprint.is_fresh(DAY_MS, 24 * 60 * 60));
    }
}
