//! # Envelope Wire Format
//!
//! The self-contained encrypted message unit handed to the transport.
//!
//! ```text
//! {
//!   "e2eeVer":    1,
//!   "algo":       "DH-SHA256-STREAM",
//!   "aad":        base64( {"e":"<b64 ephemeral public>","t":"<b64 tag>"} ),
//!   "iv":         base64( 16 bytes ),
//!   "ciphertext": base64( … ),
//!   "keyRef":     "otk:<b64 one-time prekey public>" | "spk"
//! }
//! ```
//!
//! `keyRef` tells the recipient which of its prekeys the sender agreed
//! against.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::cipher::{AadMetadata, SealedPayload};
use crate::encoding::{from_base64, to_base64};
use crate::error::{Error, Result};

/// Protocol version carried in `e2eeVer`
pub const E2EE_VERSION: u32 = 1;

/// Algorithm label carried in `algo`
pub const ALGORITHM: &str = "DH-SHA256-STREAM";

const ONE_TIME_PREFIX: &str = "otk:";
const SIGNED_REF: &str = "spk";

/// Which recipient prekey an envelope was encrypted against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyRef {
    /// A one-time prekey, by base64 public value
    OneTime(String),
    /// The signed prekey
    Signed,
}

impl KeyRef {
    /// Short label for logs: `otk` or `spk`
    pub fn kind(&self) -> &'static str {
        match self {
            KeyRef::OneTime(_) => "otk",
            KeyRef::Signed => SIGNED_REF,
        }
    }
}

impl TryFrom<String> for KeyRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if value == SIGNED_REF {
            return Ok(KeyRef::Signed);
        }
        match value.strip_prefix(ONE_TIME_PREFIX) {
            Some(public) if !public.is_empty() => Ok(KeyRef::OneTime(public.to_string())),
            _ => Err(Error::InvalidMetadata(format!("Unknown keyRef: {}", value))),
        }
    }
}

impl From<KeyRef> for String {
    fn from(key_ref: KeyRef) -> Self {
        key_ref.to_string()
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRef::OneTime(public) => write!(f, "{}{}", ONE_TIME_PREFIX, public),
            KeyRef::Signed => f.write_str(SIGNED_REF),
        }
    }
}

/// An encrypted message on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Protocol version
    pub e2ee_ver: u32,
    /// Algorithm label
    pub algo: String,
    /// Base64 aad JSON
    pub aad: String,
    /// Base64 nonce
    pub iv: String,
    /// Base64 ciphertext
    pub ciphertext: String,
    /// Recipient prekey reference
    pub key_ref: KeyRef,
}

impl Envelope {
    /// Wrap a sealed payload
    pub fn from_sealed(sealed: &SealedPayload, key_ref: KeyRef) -> Self {
        Self {
            e2ee_ver: E2EE_VERSION,
            algo: ALGORITHM.to_string(),
            aad: to_base64(&sealed.aad),
            iv: to_base64(&sealed.iv),
            ciphertext: to_base64(&sealed.ciphertext),
            key_ref,
        }
    }

    /// Reject envelopes from another protocol version or algorithm
    pub fn validate_header(&self) -> Result<()> {
        if self.e2ee_ver != E2EE_VERSION {
            return Err(Error::UnsupportedEnvelope(format!(
                "version {} (expected {})",
                self.e2ee_ver, E2EE_VERSION
            )));
        }
        if self.algo != ALGORITHM {
            return Err(Error::UnsupportedEnvelope(format!(
                "algorithm {} (expected {})",
                self.algo, ALGORITHM
            )));
        }
        Ok(())
    }

    /// Decoded aad JSON bytes
    pub fn aad_bytes(&self) -> Result<Vec<u8>> {
        from_base64(&self.aad, "aad")
    }

    /// Decoded nonce
    pub fn iv_bytes(&self) -> Result<Vec<u8>> {
        from_base64(&self.iv, "iv")
    }

    /// Decoded ciphertext
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        from_base64(&self.ciphertext, "ciphertext")
    }

    /// Parsed aad metadata
    pub fn aad_metadata(&self) -> Result<AadMetadata> {
        AadMetadata::parse(&self.aad_bytes()?)
    }

    /// Serialize to the wire JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse wire JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("Invalid envelope: {}", e)))
    }
}
