//! # Error Handling
//!
//! Error types for the Murmur session protocol.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Crypto Errors (300-319)                                           │
//! │  │   └── InvalidKey            - Malformed or degenerate key           │
//! │  │                                                                      │
//! │  ├── Envelope Errors (320-339)                                         │
//! │  │   ├── InvalidMetadata       - AAD / iv unparsable                   │
//! │  │   ├── MissingEphemeralKey   - AAD has no ephemeral key              │
//! │  │   ├── TagMismatch           - Tag has the wrong length              │
//! │  │   ├── TagVerificationFailed - Tag bytes differ                      │
//! │  │   └── UnsupportedEnvelope   - Unknown version / algorithm           │
//! │  │                                                                      │
//! │  ├── Storage Errors (400-499)                                          │
//! │  │   ├── MissingCredential     - No user secret to unseal storage      │
//! │  │   ├── StorageReadError      - Failed to read                        │
//! │  │   ├── StorageWriteError     - Failed to write                       │
//! │  │   └── StorageCorrupted      - Integrity check failed                │
//! │  │                                                                      │
//! │  ├── Directory Errors (500-599)                                        │
//! │  │   ├── ConnectionFailed      - Directory unreachable                 │
//! │  │   ├── PeerNotFound          - Unknown user / device                 │
//! │  │   └── DirectoryError        - Directory rejected the call           │
//! │  │                                                                      │
//! │  ├── Session Errors (700-799)                                          │
//! │  │   ├── UnknownPrekey         - Referenced prekey not held (retry)    │
//! │  │   ├── DeviceFingerprintMismatch - Sender device changed (retry)     │
//! │  │   ├── NoUsableDeviceBundle  - Peer has no usable keys               │
//! │  │   ├── SentKeyNotFound       - Own message without cached key        │
//! │  │   └── InvalidMessageContent - Plaintext is not valid UTF-8          │
//! │  │                                                                      │
//! │  └── Internal Errors (900-999)                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Recovery Classification
//!
//! Only [`Error::UnknownPrekey`] and [`Error::DeviceFingerprintMismatch`] are
//! recoverable: the session engine answers them with exactly one session
//! rebuild and one retry. Authentication failures are always terminal for
//! the message they belong to.

use thiserror::Error;

/// Result type alias for Murmur operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Murmur
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Crypto Errors (300-319)
    // ========================================================================
    /// Invalid key format, length or value
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Envelope Errors (320-339)
    // ========================================================================
    /// The envelope metadata (AAD or nonce) could not be parsed
    #[error("Invalid envelope metadata: {0}")]
    InvalidMetadata(String),

    /// The AAD carries no ephemeral public key
    #[error("Envelope metadata is missing the ephemeral key")]
    MissingEphemeralKey,

    /// The authentication tag has the wrong length
    #[error("Authentication tag length mismatch: expected {expected} bytes, got {actual}")]
    TagMismatch {
        /// Expected tag length
        expected: usize,
        /// Received tag length
        actual: usize,
    },

    /// The authentication tag does not match the recomputed tag
    #[error("Authentication tag verification failed")]
    TagVerificationFailed,

    /// Unknown protocol version or algorithm
    #[error("Unsupported envelope: {0}")]
    UnsupportedEnvelope(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================
    /// No local user secret available to unseal storage
    #[error("No local credential available for storage key derivation")]
    MissingCredential,

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    // ========================================================================
    // Directory Errors (500-599)
    // ========================================================================
    /// The directory service could not be reached
    #[error("Failed to reach directory: {0}")]
    ConnectionFailed(String),

    /// User or device unknown to the directory
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// The directory rejected the request
    #[error("Directory error: {0}")]
    DirectoryError(String),

    // ========================================================================
    // Session Errors (700-799)
    // ========================================================================
    /// The envelope references a one-time prekey this device does not hold
    #[error("Unknown one-time prekey: {0}")]
    UnknownPrekey(String),

    /// The sender's device differs from the one we last saw
    #[error("Device fingerprint mismatch: expected device {expected}, got {actual}")]
    DeviceFingerprintMismatch {
        /// Device id from the cached fingerprint
        expected: String,
        /// Device id declared by the sender
        actual: String,
    },

    /// The peer has no device bundle we can encrypt to
    #[error("No usable device bundle for user {0}")]
    NoUsableDeviceBundle(String),

    /// A self-sent message has no cached sent key
    #[error("No sent message key cached for message {0}")]
    SentKeyNotFound(String),

    /// Invalid message content
    #[error("Invalid message content: {0}")]
    InvalidMessageContent(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================
    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 300-319: Crypto
    /// - 320-339: Envelope
    /// - 400-499: Storage
    /// - 500-599: Directory
    /// - 700-799: Session
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Crypto (300-319)
            Error::InvalidKey(_) => 300,

            // Envelope (320-339)
            Error::InvalidMetadata(_) => 320,
            Error::MissingEphemeralKey => 321,
            Error::TagMismatch { .. } => 322,
            Error::TagVerificationFailed => 323,
            Error::UnsupportedEnvelope(_) => 324,

            // Storage (400-499)
            Error::MissingCredential => 400,
            Error::StorageReadError(_) => 401,
            Error::StorageWriteError(_) => 402,
            Error::StorageCorrupted(_) => 403,

            // Directory (500-599)
            Error::ConnectionFailed(_) => 500,
            Error::PeerNotFound(_) => 501,
            Error::DirectoryError(_) => 502,

            // Session (700-799)
            Error::UnknownPrekey(_) => 700,
            Error::DeviceFingerprintMismatch { .. } => 701,
            Error::NoUsableDeviceBundle(_) => 702,
            Error::SentKeyNotFound(_) => 703,
            Error::InvalidMessageContent(_) => 704,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable by a session rebuild
    ///
    /// The decrypt path retries exactly once after a rebuild when the first
    /// attempt fails with one of these.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownPrekey(_) | Error::DeviceFingerprintMismatch { .. }
        )
    }

    /// Check if this error means the envelope failed authentication
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Error::TagMismatch { .. } | Error::TagVerificationFailed)
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageReadError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
