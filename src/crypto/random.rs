//! # Randomness Source
//!
//! Every key, scalar and nonce in the crate is drawn through
//! [`RandomSource`], so tests and benchmarks can swap in a seeded generator.
//!
//! [`SystemRandom`] reads the operating system CSPRNG. If the OS source
//! errors it falls back to a non-cryptographic generator seeded from the
//! clock and a process counter, and logs a warning every time it does so.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};

/// Source of random bytes
pub trait RandomSource: Send + Sync {
    /// Fill `dest` with random bytes
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Draw a fixed-size array of random bytes
pub fn random_array<const N: usize>(rng: &dyn RandomSource) -> [u8; N] {
    let mut bytes = [0u8; N];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Operating system randomness with a logged fallback
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandom;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

impl SystemRandom {
    fn fallback_fill(dest: &mut [u8]) {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default() as u64;
        let counter = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
        let seed = nanos ^ counter.rotate_left(32) ^ (dest.as_ptr() as u64);
        StdRng::seed_from_u64(seed).fill_bytes(dest);
    }
}

impl RandomSource for SystemRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        if let Err(e) = OsRng.try_fill_bytes(dest) {
            tracing::warn!(
                error = %e,
                "OS randomness unavailable, using non-cryptographic fallback"
            );
            Self::fallback_fill(dest);
        }
    }
}

/// Deterministic generator for tests and benchmarks
///
/// Never use this for real key material.
pub struct SeededRandom {
    inner: Mutex<StdRng>,
}

impl SeededRandom {
    /// Create a generator from a 64-bit seed
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        self.inner.lock().fill_bytes(dest);
    }
}

impl std::fmt::Debug for SeededRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRandom").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_random_produces_distinct_output() {
        let rng = SystemRandom;
        let a: [u8; 32] = random_array(&rng);
        let b: [u8; 32] = random_array(&rng);
        assert_ne!(a, b);
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let a: [u8; 16] = random_array(&SeededRandom::new(7));
        let b: [u8; 16] = random_array(&SeededRandom::new(7));
        let c: [u8; 16] = random_array(&SeededRandom::new(8));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fallback_fill_varies_between_calls() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        SystemRandom::fallback_fill(&mut a);
        SystemRandom::fallback_fill(&mut b);
        assert_ne!(a, b);
    }
}
