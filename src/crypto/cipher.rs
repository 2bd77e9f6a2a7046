//! # Envelope Cipher
//!
//! SHA-256 counter-mode keystream with a SHA-256 authentication tag carried
//! inside the additional authenticated data.
//!
//! ## Construction
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ENVELOPE CIPHER                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  K = shared secret (32 B)     N = nonce (16 random bytes)               │
//! │                                                                         │
//! │  Keystream                                                              │
//! │    block_i = SHA-256(K ‖ N ‖ u32_be(i))      i = 0, 1, 2, …             │
//! │    ks      = block_0 ‖ block_1 ‖ …  truncated to |plaintext|            │
//! │    ct      = plaintext ⊕ ks                                             │
//! │                                                                         │
//! │  Tag                                                                    │
//! │    base_aad = {"e":"<b64 ephemeral public>"}                            │
//! │    tag      = SHA-256(K ‖ N ‖ ct ‖ base_aad)                            │
//! │    aad      = {"e":"<b64 ephemeral public>","t":"<b64 tag>"}            │
//! │                                                                         │
//! │  Open: parse aad → rebuild base_aad from e → recompute tag →           │
//! │        compare in constant time → only then XOR                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Modes
//!
//! | Condition                              | Error                      |
//! |----------------------------------------|----------------------------|
//! | nonce not 16 bytes                     | `InvalidMetadata`          |
//! | aad not JSON, tag absent or not base64 | `InvalidMetadata`          |
//! | aad has no ephemeral key               | `MissingEphemeralKey`      |
//! | tag has the wrong length               | `TagMismatch`              |
//! | tag bytes differ                       | `TagVerificationFailed`    |

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::dh::{SharedSecret, DH_KEY_SIZE};
use crate::crypto::random::{random_array, RandomSource};
use crate::encoding::{from_base64, to_base64};
use crate::error::{Error, Result};

/// Nonce size in bytes
pub const NONCE_SIZE: usize = 16;

/// Authentication tag size in bytes
pub const TAG_SIZE: usize = 32;

/// SHA-256 output, the keystream block size
const BLOCK_SIZE: usize = 32;

/// The JSON object carried as additional authenticated data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AadMetadata {
    /// Base64 ephemeral public key
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_public: Option<String>,
    /// Base64 authentication tag
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl AadMetadata {
    /// Parse the raw aad JSON bytes
    pub fn parse(aad: &[u8]) -> Result<Self> {
        serde_json::from_slice(aad)
            .map_err(|e| Error::InvalidMetadata(format!("aad is not valid JSON: {}", e)))
    }

    /// The decoded ephemeral public key
    pub fn ephemeral_key(&self) -> Result<[u8; DH_KEY_SIZE]> {
        let encoded = self
            .ephemeral_public
            .as_deref()
            .ok_or(Error::MissingEphemeralKey)?;
        let bytes = from_base64(encoded, "ephemeral key")?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            Error::InvalidMetadata(format!(
                "ephemeral key must be {} bytes, got {}",
                DH_KEY_SIZE, len
            ))
        })
    }

    /// Compact JSON of the metadata without the tag
    fn base_bytes(&self) -> Result<Vec<u8>> {
        let base = AadMetadata {
            ephemeral_public: self.ephemeral_public.clone(),
            tag: None,
        };
        Ok(serde_json::to_vec(&base)?)
    }
}

/// Output of [`seal`]
#[derive(Debug, Clone)]
pub struct SealedPayload {
    /// Per-message nonce
    pub iv: [u8; NONCE_SIZE],
    /// Encrypted bytes (same length as the plaintext)
    pub ciphertext: Vec<u8>,
    /// Full aad JSON bytes including the tag
    pub aad: Vec<u8>,
}

fn keystream_xor(shared: &SharedSecret, nonce: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (counter, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
        let block = Sha256::new()
            .chain_update(shared.as_bytes())
            .chain_update(nonce)
            .chain_update((counter as u32).to_be_bytes())
            .finalize();
        out.extend(chunk.iter().zip(block.iter()).map(|(d, k)| d ^ k));
    }
    out
}

fn compute_tag(shared: &SharedSecret, nonce: &[u8], ciphertext: &[u8], base_aad: &[u8]) -> [u8; TAG_SIZE] {
    Sha256::new()
        .chain_update(shared.as_bytes())
        .chain_update(nonce)
        .chain_update(ciphertext)
        .chain_update(base_aad)
        .finalize()
        .into()
}

/// Encrypt `plaintext` under `shared`, binding `ephemeral_public` into the tag
pub fn seal(
    shared: &SharedSecret,
    plaintext: &[u8],
    ephemeral_public: &[u8; DH_KEY_SIZE],
    rng: &dyn RandomSource,
) -> Result<SealedPayload> {
    let iv: [u8; NONCE_SIZE] = random_array(rng);
    let ciphertext = keystream_xor(shared, &iv, plaintext);

    let mut metadata = AadMetadata {
        ephemeral_public: Some(to_base64(ephemeral_public)),
        tag: None,
    };
    let tag = compute_tag(shared, &iv, &ciphertext, &metadata.base_bytes()?);
    metadata.tag = Some(to_base64(&tag));

    Ok(SealedPayload {
        iv,
        ciphertext,
        aad: serde_json::to_vec(&metadata)?,
    })
}

/// Authenticate and decrypt
///
/// The keystream is only applied after the tag has been verified.
pub fn open(shared: &SharedSecret, iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != NONCE_SIZE {
        return Err(Error::InvalidMetadata(format!(
            "nonce must be {} bytes, got {}",
            NONCE_SIZE,
            iv.len()
        )));
    }

    let metadata = AadMetadata::parse(aad)?;
    let encoded_tag = metadata
        .tag
        .as_deref()
        .ok_or_else(|| Error::InvalidMetadata("aad carries no tag".into()))?;
    if metadata.ephemeral_public.is_none() {
        return Err(Error::MissingEphemeralKey);
    }
    let received = from_base64(encoded_tag, "tag")?;

    let expected = compute_tag(shared, iv, ciphertext, &metadata.base_bytes()?);
    if received.len() != TAG_SIZE {
        return Err(Error::TagMismatch {
            expected: TAG_SIZE,
            actual: received.len(),
        });
    }
    if !bool::from(expected[..].ct_eq(&received[..])) {
        return Err(Error::TagVerificationFailed);
    }

    Ok(keystream_xor(shared, iv, ciphertext))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random::SystemRandom;

    fn secret() -> SharedSecret {
        SharedSecret::from_bytes([0x42; 32])
    }

    fn sealed(plaintext: &[u8]) -> SealedPayload {
        seal(&secret(), plaintext, &[9u8; 32], &SystemRandom).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let plaintext = b"Hello, Bob! This message spans more than one keystream block.";
        let payload = sealed(plaintext);

        assert_eq!(payload.ciphertext.len(), plaintext.len());
        assert_ne!(&payload.ciphertext[..], &plaintext[..]);

        let decrypted = open(&secret(), &payload.iv, &payload.ciphertext, &payload.aad).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let payload = sealed(b"");
        assert!(payload.ciphertext.is_empty());
        assert!(open(&secret(), &payload.iv, &payload.ciphertext, &payload.aad)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_aad_layout() {
        let payload = sealed(b"x");
        let text = String::from_utf8(payload.aad.clone()).unwrap();
        assert!(text.starts_with("{\"e\":\""));
        assert!(text.contains("\",\"t\":\""));

        let metadata = AadMetadata::parse(&payload.aad).unwrap();
        assert_eq!(metadata.ephemeral_key().unwrap(), [9u8; 32]);
        assert_eq!(
            String::from_utf8(metadata.base_bytes().unwrap()).unwrap(),
            format!("{{\"e\":\"{}\"}}", to_base64(&[9u8; 32]))
        );
    }

    #[test]
    fn test_keystream_first_block_matches_definition() {
        let plaintext = [0u8; 40];
        let payload = sealed(&plaintext);

        // XOR with zeros exposes the keystream
        let block0 = Sha256::new()
            .chain_update([0x42; 32])
            .chain_update(payload.iv)
            .chain_update(0u32.to_be_bytes())
            .finalize();
        let block1 = Sha256::new()
            .chain_update([0x42; 32])
            .chain_update(payload.iv)
            .chain_update(1u32.to_be_bytes())
            .finalize();
        assert_eq!(&payload.ciphertext[..32], &block0[..]);
        assert_eq!(&payload.ciphertext[32..], &block1[..8]);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut payload = sealed(b"attack at dawn");
        payload.ciphertext[3] ^= 0x01;
        let result = open(&secret(), &payload.iv, &payload.ciphertext, &payload.aad);
        assert_eq!(result, Err(Error::TagVerificationFailed));
    }

    #[test]
    fn test_tampered_iv_fails() {
        let mut payload = sealed(b"attack at dawn");
        payload.iv[0] ^= 0x80;
        let result = open(&secret(), &payload.iv, &payload.ciphertext, &payload.aad);
        assert_eq!(result, Err(Error::TagVerificationFailed));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let payload = sealed(b"attack at dawn");
        let mut metadata = AadMetadata::parse(&payload.aad).unwrap();
        let mut tag = from_base64(metadata.tag.as_deref().unwrap(), "tag").unwrap();
        tag[31] ^= 0x01;
        metadata.tag = Some(to_base64(&tag));
        let aad = serde_json::to_vec(&metadata).unwrap();

        let result = open(&secret(), &payload.iv, &payload.ciphertext, &aad);
        assert_eq!(result, Err(Error::TagVerificationFailed));
    }

    #[test]
    fn test_truncated_tag_is_length_mismatch() {
        let payload = sealed(b"attack at dawn");
        let mut metadata = AadMetadata::parse(&payload.aad).unwrap();
        metadata.tag = Some(to_base64(&[1u8; 16]));
        let aad = serde_json::to_vec(&metadata).unwrap();

        let result = open(&secret(), &payload.iv, &payload.ciphertext, &aad);
        assert_eq!(
            result,
            Err(Error::TagMismatch {
                expected: 32,
                actual: 16
            })
        );
    }

    #[test]
    fn test_wrong_secret_fails() {
        let payload = sealed(b"attack at dawn");
        let other = SharedSecret::from_bytes([0x43; 32]);
        let result = open(&other, &payload.iv, &payload.ciphertext, &payload.aad);
        assert!(result.unwrap_err().is_authentication_failure());
    }

    #[test]
    fn test_malformed_metadata() {
        let payload = sealed(b"hi");

        let result = open(&secret(), &payload.iv[..8], &payload.ciphertext, &payload.aad);
        assert!(matches!(result, Err(Error::InvalidMetadata(_))));

        let result = open(&secret(), &payload.iv, &payload.ciphertext, b"not json");
        assert!(matches!(result, Err(Error::InvalidMetadata(_))));

        let result = open(&secret(), &payload.iv, &payload.ciphertext, b"{\"e\":\"AAAA\"}");
        assert!(matches!(result, Err(Error::InvalidMetadata(_))));

        let result = open(&secret(), &payload.iv, &payload.ciphertext, b"{\"t\":\"AAAA\"}");
        assert_eq!(result, Err(Error::MissingEphemeralKey));

        let result = open(&secret(), &payload.iv, &payload.ciphertext, b"{\"e\":\"AAAA\",\"t\":\"!!\"}");
        assert!(matches!(result, Err(Error::InvalidMetadata(_))));
    }

    #[test]
    fn test_ephemeral_key_errors() {
        assert_eq!(
            AadMetadata::default().ephemeral_key(),
            Err(Error::MissingEphemeralKey)
        );
        let short = AadMetadata {
            ephemeral_public: Some(to_base64(&[1u8; 8])),
            tag: None,
        };
        assert!(matches!(short.ephemeral_key(), Err(Error::InvalidMetadata(_))));
    }
}
