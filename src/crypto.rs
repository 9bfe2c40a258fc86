//! Cryptographic utilities for secure operations
//!
//! ## Security Patterns
//!
//! - **Constant-Time Comparison**: Prevents timing attacks on secret comparisons
//! - **Code Digests**: Verification codes are persisted as SHA-256 digests, never in plaintext
//! - **Unpredictable Codes**: Codes are drawn from the operating system RNG

use rand::{rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Performs constant-time comparison of two byte slices.
///
/// The comparison takes the same amount of time regardless of where (or if)
/// the inputs differ, so response timing reveals nothing about how much of a
/// guessed secret was correct. Slices of different length compare unequal.
///
/// ```rust
/// use portcullis::constant_time_eq;
///
/// assert!(constant_time_eq(b"913482", b"913482"));
/// assert!(!constant_time_eq(b"913482", b"913483"));
/// ```
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Constant-time comparison of two strings.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Hex-encoded SHA-256 digest of a verification code.
pub fn digest_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Generate a numeric code of `length` digits from the OS RNG.
///
/// Leading zeros are kept, so every code has exactly `length` characters.
pub fn random_digits(length: usize) -> String {
    (0..length)
        .map(|_| char::from(b'0' + OsRng.gen_range(0..10u8)))
        .collect()
}
