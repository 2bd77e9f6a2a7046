//! # Digital Signatures Module
//!
//! Ed25519 signatures binding a device's signed prekey to its identity.
//!
//! ## Signed Prekey Attestation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SIGNED PREKEY ATTESTATION                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  OWNER DEVICE                                                          │
//! │  ┌──────────────────┐        ┌──────────────────────────────┐          │
//! │  │ Signed prekey    │        │  Ed25519 Sign                │          │
//! │  │ public (32 B BE) │───────►│  with DeviceIdentity seed    │          │
//! │  └──────────────────┘        └──────────────┬───────────────┘          │
//! │                                             │                          │
//! │                                             ▼                          │
//! │                               64-byte signature (base64)               │
//! │                                             │                          │
//! │  ─────────────── published in the device bundle ───────────────        │
//! │                                             │                          │
//! │  PEER                                       ▼                          │
//! │  ┌──────────────────────────────────────────────────────────────┐      │
//! │  │  verify(prekey public, signature, identity public) → bool    │      │
//! │  │                                                              │      │
//! │  │  • wrong signature length   → false                         │      │
//! │  │  • wrong public key length  → false                         │      │
//! │  │  • not a curve point        → false                         │      │
//! │  └──────────────────────────────────────────────────────────────┘      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Verification never errors: every malformed input is simply "not valid".

use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::ZeroizeOnDrop;

use crate::crypto::random::{random_array, RandomSource};
use crate::encoding::to_base64;
use crate::error::{Error, Result};

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Size of an Ed25519 public key in bytes
pub const SIGNING_PUBLIC_KEY_SIZE: usize = 32;

/// An Ed25519 digital signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create from a slice (must be exactly 64 bytes)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; SIGNATURE_SIZE] = slice.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "Signature must be {} bytes, got {}",
                SIGNATURE_SIZE,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Encode as standard base64
    pub fn to_base64(&self) -> String {
        to_base64(&self.0)
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Ed25519 signing keypair
#[derive(ZeroizeOnDrop)]
pub struct SigningKeyPair {
    #[zeroize(skip)] // ed25519_dalek::SigningKey handles its own zeroization
    secret: SigningKey,
}

impl SigningKeyPair {
    /// Generate a keypair from a fresh 32-byte random seed
    pub fn generate(rng: &dyn RandomSource) -> Self {
        let mut seed: [u8; 32] = random_array(rng);
        let keypair = Self::from_seed(&seed);
        zeroize::Zeroize::zeroize(&mut seed);
        keypair
    }

    /// Recreate a keypair from its 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            secret: SigningKey::from_bytes(seed),
        }
    }

    /// Get the seed bytes (for storage)
    ///
    /// Never log or transmit these bytes.
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.secret.verifying_key().to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.secret.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &to_base64(&self.public_bytes()))
            .finish_non_exhaustive()
    }
}

/// Sign a message with the keypair recreated from `seed`
///
/// Ed25519 is deterministic: the same seed and message always give the same
/// signature.
pub fn sign(message: &[u8], seed: &[u8; 32]) -> Signature {
    SigningKeyPair::from_seed(seed).sign(message)
}

/// Verify an Ed25519 signature
///
/// Returns `false` for any malformed input (signature not 64 bytes, public
/// key not 32 bytes or not a valid point) as well as for a bad signature.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(signature) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
        return false;
    };
    let Ok(public_key) = <[u8; SIGNING_PUBLIC_KEY_SIZE]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
        return false;
    };

    verifying_key
        .verify(message, &Ed25519Signature::from_bytes(&signature))
        .is_ok()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random::{SeededRandom, SystemRandom};

    #[test]
    fn test_sign_verify() {
        let keypair = SigningKeyPair::generate(&SystemRandom);
        let message = b"Hello, World!";

        let signature = keypair.sign(message);
        assert!(verify(message, signature.as_ref(), &keypair.public_bytes()));
    }

    #[test]
    fn test_verify_wrong_message_fails() {
        let keypair = SigningKeyPair::generate(&SystemRandom);
        let signature = keypair.sign(b"Hello, World!");

        assert!(!verify(b"Wrong message!", signature.as_ref(), &keypair.public_bytes()));
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let keypair1 = SigningKeyPair::generate(&SystemRandom);
        let keypair2 = SigningKeyPair::generate(&SystemRandom);
        let message = b"Hello, World!";

        let signature = keypair1.sign(message);
        assert!(!verify(message, signature.as_ref(), &keypair2.public_bytes()));
    }

    #[test]
    fn test_verify_malformed_inputs_return_false() {
        let keypair = SigningKeyPair::generate(&SystemRandom);
        let message = b"msg";
        let signature = keypair.sign(message);

        assert!(!verify(message, &signature.0[..63], &keypair.public_bytes()));
        assert!(!verify(message, &[], &keypair.public_bytes()));
        assert!(!verify(message, signature.as_ref(), &keypair.public_bytes()[..31]));
        assert!(!verify(message, signature.as_ref(), &[0u8; 33]));
    }

    #[test]
    fn test_deterministic_signatures() {
        let keypair = SigningKeyPair::generate(&SeededRandom::new(1));
        let seed = keypair.seed_bytes();

        // Ed25519 is deterministic
        assert_eq!(sign(b"abc", &seed), sign(b"abc", &seed));
        assert_eq!(sign(b"abc", &seed), keypair.sign(b"abc"));
    }

    #[test]
    fn test_seed_round_trip() {
        let keypair = SigningKeyPair::generate(&SystemRandom);
        let restored = SigningKeyPair::from_seed(&keypair.seed_bytes());
        assert_eq!(keypair.public_bytes(), restored.public_bytes());
    }

    #[test]
    fn test_signature_from_slice() {
        assert!(Signature::from_slice(&[0u8; 64]).is_ok());
        assert!(matches!(
            Signature::from_slice(&[0u8; 10]),
            Err(Error::InvalidKey(_))
        ));
    }
}
