//! Session events, broadcast to subscribers.
//!
//! Events carry identifiers and error codes only, never key material.

use super::recovery::Attempt;

/// Something observable the session engine did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The client finished bootstrapping
    Bootstrapped {
        /// This device
        device_id: String,
        /// Whether this bootstrap registered the device
        registered: bool,
        /// One-time prekeys published during bootstrap
        uploaded: usize,
    },

    /// New one-time prekeys were generated and uploaded
    PrekeysReplenished {
        /// This device
        device_id: String,
        /// Server stock before the top-up
        stock: usize,
        /// Keys generated
        generated: usize,
    },

    /// None of a peer's bundles carried a valid signature
    BundleValidationFailed {
        /// The peer
        user_id: String,
        /// Devices whose bundle failed validation
        device_ids: Vec<String>,
        /// Whether the unvalidated bundles were used anyway
        fallback: bool,
    },

    /// A message was encrypted
    MessageEncrypted {
        /// Message id
        message_id: String,
        /// Recipient user
        user_id: String,
        /// Recipient device
        device_id: String,
        /// `otk` or `spk`
        key_ref: &'static str,
    },

    /// A peer's cached fingerprint was older than its freshness window
    FingerprintStale {
        /// The peer
        user_id: String,
        /// Device the fingerprint pointed at
        device_id: String,
    },

    /// One decryption attempt finished
    DecryptAttempt {
        /// Message id
        message_id: String,
        /// Declared sender
        sender_user_id: String,
        /// Declared sender device
        sender_device_id: Option<String>,
        /// Transport session, if any
        session_id: Option<String>,
        /// Which attempt this was
        attempt: Attempt,
        /// `None` on success, otherwise the error code
        error_code: Option<i32>,
        /// Whether a rebuild and retry follows
        will_retry: bool,
    },

    /// A session with a peer was rebuilt
    SessionRebuilt {
        /// The peer
        user_id: String,
        /// Device the fingerprint now points at
        device_id: String,
    },

    /// A session rebuild failed
    RebuildFailed {
        /// The peer
        user_id: String,
        /// Error code
        error_code: i32,
    },
}
