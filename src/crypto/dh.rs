//! # Diffie–Hellman Primitive
//!
//! Finite-field key agreement in the multiplicative group mod
//! `P = 2^256 - 189` with generator `g = 5`. All values travel as fixed
//! 32-byte big-endian integers.
//!
//! ## One-Shot Exchange
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EPHEMERAL EXCHANGE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  SENDER                                  RECIPIENT                     │
//! │                                                                         │
//! │                                          prekey b, B = g^b  (published)│
//! │                                                 │                       │
//! │  derive_ephemeral(B)  ◄─────────────────────────┘                       │
//! │  ├─ e  = random in [2, P-2]                                             │
//! │  ├─ E  = g^e mod P           ──── in envelope aad ────►                 │
//! │  └─ K  = B^e mod P                                                      │
//! │                                          compute_from_ephemeral(b, E)   │
//! │                                          └─ K = E^b mod P               │
//! │                                                                         │
//! │  Both sides hold K = g^(e·b) mod P                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The group is custom and kept for wire compatibility with existing
//! deployments. Exponentiation is a constant-time ladder and peer values
//! outside `[2, P-2]` are refused.

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::field::{is_valid_element, pow_mod, scalar_from_random, U256};
use crate::crypto::random::{random_array, RandomSource};
use crate::encoding::{from_base64_array, to_base64};
use crate::error::{Error, Result};

/// The group generator
pub const GENERATOR: u64 = 5;

/// Size of every DH value (private scalar, public value, shared secret)
pub const DH_KEY_SIZE: usize = 32;

/// A private exponent
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DhPrivateKey([u8; DH_KEY_SIZE]);

impl DhPrivateKey {
    /// Create from raw big-endian bytes
    pub fn from_bytes(bytes: [u8; DH_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode from base64 (as kept in device state)
    pub fn from_base64(encoded: &str) -> Result<Self> {
        Ok(Self(from_base64_array(encoded, "DH private key")?))
    }

    /// Get the raw bytes
    ///
    /// Never log or transmit these bytes.
    pub fn as_bytes(&self) -> &[u8; DH_KEY_SIZE] {
        &self.0
    }

    /// Encode as base64 (for device state)
    pub fn to_base64(&self) -> String {
        to_base64(&self.0)
    }

    /// Compute the matching public value `g^x mod P`
    pub fn public_key(&self) -> [u8; DH_KEY_SIZE] {
        let exponent = U256::from_be_bytes(&self.0);
        pow_mod(&U256::from_u64(GENERATOR), &exponent).to_be_bytes()
    }
}

impl std::fmt::Debug for DhPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DhPrivateKey([REDACTED])")
    }
}

/// A DH keypair
#[derive(Clone, Debug)]
pub struct DhKeyPair {
    /// Private exponent
    pub private: DhPrivateKey,
    /// Public value `g^private mod P`
    pub public: [u8; DH_KEY_SIZE],
}

/// A 32-byte shared secret
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; DH_KEY_SIZE]);

impl SharedSecret {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; DH_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode from base64 (as cached in sent message keys)
    pub fn from_base64(encoded: &str) -> Result<Self> {
        Ok(Self(from_base64_array(encoded, "shared secret")?))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; DH_KEY_SIZE] {
        &self.0
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        to_base64(&self.0)
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for SharedSecret {}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Sender-side result of a one-shot exchange
#[derive(Debug)]
pub struct EphemeralExchange {
    /// The agreed secret
    pub shared_secret: SharedSecret,
    /// Ephemeral public value to send to the peer
    pub ephemeral_public: [u8; DH_KEY_SIZE],
}

/// Parse and range-check a peer's public value
fn peer_element(public: &[u8; DH_KEY_SIZE]) -> Result<U256> {
    let value = U256::from_be_bytes(public);
    if !is_valid_element(&value) {
        return Err(Error::InvalidKey(
            "DH public value outside [2, P-2]".into(),
        ));
    }
    Ok(value)
}

/// Generate a fresh keypair with a private exponent in `[2, P-2]`
pub fn generate_key_pair(rng: &dyn RandomSource) -> DhKeyPair {
    let mut raw: [u8; DH_KEY_SIZE] = random_array(rng);
    let scalar = scalar_from_random(&U256::from_be_bytes(&raw));
    raw.zeroize();

    let private = DhPrivateKey(scalar.to_be_bytes());
    let public = private.public_key();
    DhKeyPair { private, public }
}

/// `peer_public ^ private mod P`
pub fn derive_shared_secret(
    private: &DhPrivateKey,
    peer_public: &[u8; DH_KEY_SIZE],
) -> Result<SharedSecret> {
    let base = peer_element(peer_public)?;
    let exponent = U256::from_be_bytes(private.as_bytes());
    Ok(SharedSecret(pow_mod(&base, &exponent).to_be_bytes()))
}

/// Sender side: fresh ephemeral keypair agreed against `peer_public`
pub fn derive_ephemeral(
    peer_public: &[u8; DH_KEY_SIZE],
    rng: &dyn RandomSource,
) -> Result<EphemeralExchange> {
    // Validate before spending entropy on a key that cannot be used
    peer_element(peer_public)?;

    let ephemeral = generate_key_pair(rng);
    let shared_secret = derive_shared_secret(&ephemeral.private, peer_public)?;

    Ok(EphemeralExchange {
        shared_secret,
        ephemeral_public: ephemeral.public,
    })
}

/// Recipient side: `ephemeral_public ^ private mod P`
pub fn compute_from_ephemeral(
    private: &DhPrivateKey,
    ephemeral_public: &[u8; DH_KEY_SIZE],
) -> Result<SharedSecret> {
    derive_shared_secret(private, ephemeral_public)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::field::MODULUS_MINUS_ONE;
    use crate::crypto::random::{SeededRandom, SystemRandom};

    #[test]
    fn test_key_pair_public_matches_private() {
        let pair = generate_key_pair(&SystemRandom);
        assert_eq!(pair.private.public_key(), pair.public);
        assert!(is_valid_element(&U256::from_be_bytes(&pair.public)));
    }

    #[test]
    fn test_known_small_exponent() {
        let private = DhPrivateKey::from_bytes(U256::from_u64(3).to_be_bytes());
        assert_eq!(private.public_key(), U256::from_u64(125).to_be_bytes());
    }

    #[test]
    fn test_dh_agreement() {
        let alice = generate_key_pair(&SystemRandom);
        let bob = generate_key_pair(&SystemRandom);

        let ab = derive_shared_secret(&alice.private, &bob.public).unwrap();
        let ba = derive_shared_secret(&bob.private, &alice.public).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_ephemeral_agreement() {
        let bob = generate_key_pair(&SystemRandom);

        let exchange = derive_ephemeral(&bob.public, &SystemRandom).unwrap();
        let recovered = compute_from_ephemeral(&bob.private, &exchange.ephemeral_public).unwrap();
        assert_eq!(exchange.shared_secret, recovered);
    }

    #[test]
    fn test_ephemeral_is_fresh_each_time() {
        let bob = generate_key_pair(&SystemRandom);
        let first = derive_ephemeral(&bob.public, &SystemRandom).unwrap();
        let second = derive_ephemeral(&bob.public, &SystemRandom).unwrap();
        assert_ne!(first.ephemeral_public, second.ephemeral_public);
        assert_ne!(first.shared_secret, second.shared_secret);
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let a = generate_key_pair(&SeededRandom::new(99));
        let b = generate_key_pair(&SeededRandom::new(99));
        assert_eq!(a.public, b.public);
    }

    #[test]
    fn test_degenerate_public_values_rejected() {
        let pair = generate_key_pair(&SystemRandom);
        let degenerate = [
            U256::ZERO.to_be_bytes(),
            U256::ONE.to_be_bytes(),
            MODULUS_MINUS_ONE.to_be_bytes(),
            [0xff; 32],
        ];

        for value in degenerate {
            assert!(matches!(
                derive_shared_secret(&pair.private, &value),
                Err(Error::InvalidKey(_))
            ));
            assert!(derive_ephemeral(&value, &SystemRandom).is_err());
        }
    }

    #[test]
    fn test_base64_round_trip_and_redaction() {
        let pair = generate_key_pair(&SystemRandom);
        let restored = DhPrivateKey::from_base64(&pair.private.to_base64()).unwrap();
        assert_eq!(restored.public_key(), pair.public);
        assert_eq!(format!("{:?}", pair.private), "DhPrivateKey([REDACTED])");
    }
}
