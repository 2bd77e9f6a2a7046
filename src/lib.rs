//! # Murmur Core
//!
//! Device-level end-to-end encryption for Murmur chat. Each device publishes
//! prekeys to a directory; senders agree a one-shot secret against one of
//! them and ship a self-contained envelope that only the recipient device can
//! open.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MURMUR CORE MODULES                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SessionClient                            │  │
//! │  │  bootstrap · encrypt_for_user · decrypt_envelope · rebuild       │  │
//! │  └───────┬──────────────────┬──────────────────────┬───────────────┘  │
//! │          │                  │                      │                  │
//! │  ┌───────▼──────┐   ┌───────▼───────┐     ┌────────▼────────┐         │
//! │  │   Device     │   │   Envelope    │     │    Directory    │         │
//! │  │              │   │               │     │                 │         │
//! │  │ - Identity   │   │ - Wire JSON   │     │ - Register      │         │
//! │  │ - Prekeys    │   │ - keyRef      │     │ - List bundles  │         │
//! │  │ - Sent keys  │   │ - Header      │     │ - Claim prekey  │         │
//! │  └───────┬──────┘   └───────┬───────┘     └─────────────────┘         │
//! │          │                  │                                          │
//! │  ┌───────▼──────┐   ┌───────▼──────────────────────────────────────┐  │
//! │  │   Storage    │   │                 Crypto                       │  │
//! │  │              │   │                                              │  │
//! │  │ - Sealed KV  │   │ - Ed25519 signed prekeys                     │  │
//! │  │ - Memory/dir │   │ - DH over 2^256 - 189                        │  │
//! │  └──────────────┘   │ - SHA-256 keystream + tag                    │  │
//! │                     └──────────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - Cryptographic primitives (DH, signing, envelope cipher)
//! - [`device`] - Local device keys and bookkeeping
//! - [`directory`] - Prekey directory contract and in-memory implementation
//! - [`envelope`] - Wire envelope
//! - [`session`] - The session engine
//! - [`storage`] - Sealed key-value persistence
//! - [`config`] - Engine and storage configuration
//!
//! ## Message Flow
//!
//! ```text
//!   Alice                          Directory                        Bob
//!   ─────                          ─────────                        ───
//!                                      ◄──── register (spk, 10 otk) ──
//!     ── list_device_bundles(bob) ──►
//!     ── claim_prekey(bob, dev) ────►  (otk removed from stock)
//!     ◄──── bundle + otk ───────────
//!   derive_ephemeral(otk)
//!   seal ──► Envelope{keyRef:"otk:…"} ─────── transport ───────────►
//!                                                     compute_from_ephemeral
//!                                                     open, mark otk consumed
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod device;
pub mod directory;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod session;
pub mod storage;
/// Wall-clock helpers.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{SessionConfig, StorageConfig};
pub use device::{DeviceState, DeviceStateStore};
pub use directory::{DeviceBundle, DirectoryClient, MemoryDirectory};
pub use envelope::{Envelope, KeyRef};
pub use error::{Error, Result};
pub use session::{Attempt, DecryptContext, EncryptedMessage, SessionClient, SessionEvent};
pub use storage::{KeyValueStore, SecureStore};

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
