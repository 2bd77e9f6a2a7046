//! # Field Arithmetic mod P = 2^256 - 189
//!
//! Fixed-width 256-bit integers and the modular operations the Murmur DH
//! group needs.
//!
//! ## Reduction
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    PSEUDO-MERSENNE REDUCTION                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  P = 2^256 - 189   ⇒   2^256 ≡ 189 (mod P)                              │
//! │                                                                         │
//! │  512-bit product  t = hi · 2^256 + lo                                   │
//! │                     ≡ hi · 189 + lo        (fold 1, < 190 · 2^256)      │
//! │                     ≡ top · 189 + low      (fold 2, < 2^256 + 2^16)     │
//! │                     ≡ carry · 189 + low    (fold 3, < 2^256)            │
//! │                                                                         │
//! │  then one conditional subtraction of P.                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every branch on secret data goes through `subtle` selects. Exponentiation
//! is a Montgomery ladder that always runs 256 steps.

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

use crate::encoding::{be_bytes_to_limbs, limbs_to_be_bytes, LIMBS};

/// 2^256 mod P
const FOLD: u64 = 189;

/// The group modulus P = 2^256 - 189
pub const MODULUS: U256 = U256([0xFFFF_FFFF_FFFF_FF43, u64::MAX, u64::MAX, u64::MAX]);

/// P - 1
pub const MODULUS_MINUS_ONE: U256 = U256([0xFFFF_FFFF_FFFF_FF42, u64::MAX, u64::MAX, u64::MAX]);

/// P - 3, the width of the private scalar range [2, P-2]
const MODULUS_MINUS_THREE: U256 = U256([0xFFFF_FFFF_FFFF_FF40, u64::MAX, u64::MAX, u64::MAX]);

/// Unsigned 256-bit integer, little-endian u64 limbs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct U256(pub(crate) [u64; LIMBS]);

#[inline]
fn adc(a: u64, b: u64, carry: u64) -> (u64, u64) {
    let t = a as u128 + b as u128 + carry as u128;
    (t as u64, (t >> 64) as u64)
}

#[inline]
fn sbb(a: u64, b: u64, borrow: u64) -> (u64, u64) {
    let t = (a as u128).wrapping_sub(b as u128 + borrow as u128);
    (t as u64, (t >> 127) as u64)
}

impl U256 {
    /// Zero
    pub const ZERO: U256 = U256([0; LIMBS]);

    /// One
    pub const ONE: U256 = U256([1, 0, 0, 0]);

    /// Create from a small value
    pub const fn from_u64(value: u64) -> Self {
        Self([value, 0, 0, 0])
    }

    /// Parse 32 big-endian bytes
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        Self(be_bytes_to_limbs(bytes))
    }

    /// Serialize to 32 big-endian bytes
    pub fn to_be_bytes(&self) -> [u8; 32] {
        limbs_to_be_bytes(&self.0)
    }

    /// `self + other`, returning the carry out of bit 256
    pub fn add_with_carry(&self, other: &Self) -> (Self, u64) {
        let mut out = [0u64; LIMBS];
        let mut carry = 0;
        for i in 0..LIMBS {
            let (sum, c) = adc(self.0[i], other.0[i], carry);
            out[i] = sum;
            carry = c;
        }
        (Self(out), carry)
    }

    /// `self - other`, returning the borrow (1 when `self < other`)
    pub fn sub_with_borrow(&self, other: &Self) -> (Self, u64) {
        let mut out = [0u64; LIMBS];
        let mut borrow = 0;
        for i in 0..LIMBS {
            let (diff, b) = sbb(self.0[i], other.0[i], borrow);
            out[i] = diff;
            borrow = b;
        }
        (Self(out), borrow)
    }

    /// Bit `index` (0 = least significant)
    pub fn bit(&self, index: usize) -> Choice {
        Choice::from(((self.0[index / 64] >> (index % 64)) & 1) as u8)
    }

    /// Constant-time `self < other`
    pub fn ct_lt(&self, other: &Self) -> Choice {
        let (_, borrow) = self.sub_with_borrow(other);
        Choice::from(borrow as u8)
    }
}

impl ConditionallySelectable for U256 {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        let mut out = [0u64; LIMBS];
        for (i, limb) in out.iter_mut().enumerate() {
            *limb = u64::conditional_select(&a.0[i], &b.0[i], choice);
        }
        Self(out)
    }
}

impl ConstantTimeEq for U256 {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0[..].ct_eq(&other.0[..])
    }
}

/// Reduce any 256-bit value into `[0, P)`
///
/// A single subtraction suffices because `2^256 - P = 189 < P`.
pub fn reduce(x: &U256) -> U256 {
    let (diff, borrow) = x.sub_with_borrow(&MODULUS);
    U256::conditional_select(&diff, x, Choice::from(borrow as u8))
}

/// `a · b mod P`
pub fn mul_mod(a: &U256, b: &U256) -> U256 {
    // Schoolbook 4x4 limb product
    let mut t = [0u64; 2 * LIMBS];
    for i in 0..LIMBS {
        let mut carry = 0u64;
        for j in 0..LIMBS {
            let prod = (a.0[i] as u128) * (b.0[j] as u128) + t[i + j] as u128 + carry as u128;
            t[i + j] = prod as u64;
            carry = (prod >> 64) as u64;
        }
        t[i + LIMBS] = carry;
    }

    // Fold 1: hi · 189 + lo
    let mut folded = [0u64; LIMBS + 1];
    let mut carry = 0u64;
    for i in 0..LIMBS {
        let v = (t[i + LIMBS] as u128) * (FOLD as u128) + t[i] as u128 + carry as u128;
        folded[i] = v as u64;
        carry = (v >> 64) as u64;
    }
    folded[LIMBS] = carry;

    // Fold 2: top limb · 189
    let mut out = [0u64; LIMBS];
    let v = (folded[LIMBS] as u128) * (FOLD as u128) + folded[0] as u128;
    out[0] = v as u64;
    let mut carry = (v >> 64) as u64;
    for i in 1..LIMBS {
        let (sum, c) = adc(folded[i], 0, carry);
        out[i] = sum;
        carry = c;
    }

    // Fold 3: the remaining carry is worth 189; the value is now tiny, so
    // this cannot carry again
    let (sum, mut c) = adc(out[0], carry * FOLD, 0);
    out[0] = sum;
    for limb in out.iter_mut().skip(1) {
        let (sum, next) = adc(*limb, 0, c);
        *limb = sum;
        c = next;
    }

    reduce(&U256(out))
}

/// `base^exp mod P` via a fixed-length Montgomery ladder
pub fn pow_mod(base: &U256, exp: &U256) -> U256 {
    let mut r0 = U256::ONE;
    let mut r1 = reduce(base);

    for i in (0..256).rev() {
        let bit = exp.bit(i);
        U256::conditional_swap(&mut r0, &mut r1, bit);
        r1 = mul_mod(&r0, &r1);
        r0 = mul_mod(&r0, &r0);
        U256::conditional_swap(&mut r0, &mut r1, bit);
    }

    r0
}

/// Map a uniformly random 256-bit value into the private scalar range
/// `[2, P-2]` as `(raw mod (P-3)) + 2`
pub fn scalar_from_random(raw: &U256) -> U256 {
    let (diff, borrow) = raw.sub_with_borrow(&MODULUS_MINUS_THREE);
    let reduced = U256::conditional_select(&diff, raw, Choice::from(borrow as u8));
    let (scalar, _) = reduced.add_with_carry(&U256::from_u64(2));
    scalar
}

/// Whether `value` is an acceptable group element, i.e. in `[2, P-2]`
///
/// Rejects 0, 1, P-1 (the degenerate small-order elements) and anything not
/// reduced mod P.
pub fn is_valid_element(value: &U256) -> bool {
    let too_small = value.ct_lt(&U256::from_u64(2));
    let below_p_minus_one = value.ct_lt(&MODULUS_MINUS_ONE);
    bool::from(!too_small & below_p_minus_one)
}

// ============================================================================
// TESTS
// ============================================================================
