//! # Byte & Encoding Utilities
//!
//! UTF-8 and base64 conversion plus the big-endian packing used by the
//! 256-bit field arithmetic.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     256-BIT INTEGER PACKING                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Wire / storage (32 bytes, big-endian)                                  │
//! │  ┌────────┬────────┬────────┬────────┐                                 │
//! │  │ b0..b7 │ b8..15 │ b16..23│ b24..31│                                 │
//! │  └───┬────┴───┬────┴───┬────┴───┬────┘                                 │
//! │      │        │        │        │                                       │
//! │      ▼        ▼        ▼        ▼                                       │
//! │   limb[3]  limb[2]  limb[1]  limb[0]   (u64 limbs, little-endian order) │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Base64 is the standard alphabet with padding everywhere (keys in device
//! state, envelope fields, `keyRef` values).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{Error, Result};

/// Number of 64-bit limbs in a 256-bit integer
pub const LIMBS: usize = 4;

/// Encode a string as UTF-8 bytes
pub fn utf8_encode(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Decode UTF-8 bytes into a string
pub fn utf8_decode(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::InvalidMessageContent(format!("Invalid UTF-8: {}", e)))
}

/// Encode bytes as standard base64
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard base64
///
/// `what` names the field being decoded for the error message.
pub fn from_base64(encoded: &str, what: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| Error::InvalidMetadata(format!("{} is not valid base64: {}", what, e)))
}

/// Decode standard base64 into a fixed-size array
pub fn from_base64_array<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N]> {
    let bytes = from_base64(encoded, what)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("{} must be {} bytes, got {}", what, N, len)))
}

/// Pack 32 big-endian bytes into little-endian-ordered u64 limbs
pub fn be_bytes_to_limbs(bytes: &[u8; 32]) -> [u64; LIMBS] {
    let mut limbs = [0u64; LIMBS];
    for (i, limb) in limbs.iter_mut().enumerate() {
        let start = 32 - (i + 1) * 8;
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[start..start + 8]);
        *limb = u64::from_be_bytes(word);
    }
    limbs
}

/// Unpack little-endian-ordered u64 limbs into 32 big-endian bytes
pub fn limbs_to_be_bytes(limbs: &[u64; LIMBS]) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    for (i, limb) in limbs.iter().enumerate() {
        let start = 32 - (i + 1) * 8;
        bytes[start..start + 8].copy_from_slice(&limb.to_be_bytes());
    }
    bytes
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_round_trip() {
        let text = "héllo, wörld 👋";
        assert_eq!(utf8_decode(&utf8_encode(text)).unwrap(), text);
    }

    #[test]
    fn test_utf8_decode_rejects_invalid() {
        let result = utf8_decode(&[0xff, 0xfe, 0xfd]);
        assert!(matches!(result, Err(Error::InvalidMessageContent(_))));
    }

    #[test]
    fn test_base64_is_padded_standard() {
        assert_eq!(to_base64(b"ab"), "YWI=");
        assert_eq!(from_base64("YWI=", "test").unwrap(), b"ab");
    }

    #[test]
    fn test_base64_invalid() {
        let result = from_base64("not base64!!", "nonce");
        assert!(matches!(result, Err(Error::InvalidMetadata(msg)) if msg.contains("nonce")));
    }

    #[test]
    fn test_base64_array_length_checked() {
        let encoded = to_base64(&[7u8; 31]);
        let result = from_base64_array::<32>(&encoded, "public key");
        assert!(matches!(result, Err(Error::InvalidKey(_))));

        let encoded = to_base64(&[7u8; 32]);
        assert_eq!(from_base64_array::<32>(&encoded, "public key").unwrap(), [7u8; 32]);
    }

    #[test]
    fn test_limb_packing_order() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x01; // least significant byte
        bytes[0] = 0x80; // most significant byte

        let limbs = be_bytes_to_limbs(&bytes);
        assert_eq!(limbs[0], 1);
        assert_eq!(limbs[3], 0x8000_0000_0000_0000);
        assert_eq!(limbs_to_be_bytes(&limbs), bytes);
    }
}
