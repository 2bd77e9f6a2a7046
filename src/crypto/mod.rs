//! # Cryptography Module
//!
//! The primitives the session engine is built from.
//!
//! ## Primitives
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CRYPTOGRAPHIC PRIMITIVES                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┬──────────────────────┬─────────────────────────┐  │
//! │  │ Purpose         │ Construction         │ Module                  │  │
//! │  ├─────────────────┼──────────────────────┼─────────────────────────┤  │
//! │  │ Identity        │ Ed25519              │ signing                 │  │
//! │  │ Key agreement   │ DH mod 2^256 - 189   │ dh (+ field)            │  │
//! │  │ Encryption      │ SHA-256 keystream    │ cipher                  │  │
//! │  │ Integrity       │ SHA-256 tag over aad │ cipher                  │  │
//! │  │ Randomness      │ OS CSPRNG            │ random                  │  │
//! │  └─────────────────┴──────────────────────┴─────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - Private keys and shared secrets are zeroized when dropped and redacted
//!   from `Debug` output
//! - Modular exponentiation runs in constant time
//! - Tags are compared in constant time before any decryption happens

pub mod cipher;
pub mod dh;
pub mod field;
pub mod random;
pub mod signing;

pub use cipher::{open, seal, AadMetadata, SealedPayload, NONCE_SIZE, TAG_SIZE};
pub use dh::{
    compute_from_ephemeral, derive_ephemeral, derive_shared_secret, generate_key_pair, DhKeyPair,
    DhPrivateKey, EphemeralExchange, SharedSecret, DH_KEY_SIZE, GENERATOR,
};
pub use random::{RandomSource, SeededRandom, SystemRandom};
pub use signing::{sign, verify, Signature, SigningKeyPair, SIGNATURE_SIZE};
