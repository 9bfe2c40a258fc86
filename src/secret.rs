//! Signing Secret Validation and Generation (IA-5, SC-12)
//!
//! The HMAC secret that signs access and refresh tokens is the single key
//! whose disclosure lets an attacker mint tokens for any account and role.
//! This module rejects secrets that are short, low-entropy, or built from
//! well-known words before the configuration is accepted.
//!
//! # Example
//!
//! ```
//! use portcullis::{generate_secret, SecretPolicy};
//!
//! let policy = SecretPolicy::default();
//! assert!(policy.validate("changeme").is_err());
//!
//! let secret = generate_secret(64);
//! assert!(policy.validate(&secret).is_ok());
//! ```

use std::collections::HashMap;

use thiserror::Error;

/// Why a signing secret was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SecretError {
    /// Secret is shorter than the policy allows
    #[error("signing secret length ({actual} chars) is below minimum ({minimum} chars)")]
    TooShort { actual: usize, minimum: usize },
    /// Secret contains a common word
    #[error("signing secret contains weak pattern '{pattern}'")]
    WeakPattern { pattern: String },
    /// Secret has insufficient Shannon entropy
    #[error("signing secret entropy ({actual:.1} bits) is below minimum ({minimum:.1} bits)")]
    LowEntropy { actual: f64, minimum: f64 },
}

/// Requirements a signing secret must meet.
#[derive(Debug, Clone)]
pub struct SecretPolicy {
    /// Minimum secret length in characters
    pub min_length: usize,
    /// Minimum total Shannon entropy in bits
    pub min_entropy: f64,
    /// Whether to reject secrets containing common words
    pub check_weak_patterns: bool,
}

impl Default for SecretPolicy {
    /// 32 characters and 96 bits of entropy: a random hex string of
    /// the minimum length passes, a repeated or dictionary phrase does not.
    fn default() -> Self {
        Self {
            min_length: 32,
            min_entropy: 96.0,
            check_weak_patterns: true,
        }
    }
}

impl SecretPolicy {
    /// Validate a secret against this policy.
    pub fn validate(&self, secret: &str) -> Result<(), SecretError> {
        let length = secret.chars().count();
        if length < self.min_length {
            return Err(SecretError::TooShort {
                actual: length,
                minimum: self.min_length,
            });
        }

        if self.check_weak_patterns {
            if let Some(pattern) = find_weak_pattern(secret) {
                return Err(SecretError::WeakPattern {
                    pattern: pattern.to_string(),
                });
            }
        }

        let entropy = calculate_entropy(secret);
        if entropy < self.min_entropy {
            return Err(SecretError::LowEntropy {
                actual: entropy,
                minimum: self.min_entropy,
            });
        }

        Ok(())
    }
}

fn find_weak_pattern(secret: &str) -> Option<&'static str> {
    const WEAK_PATTERNS: &[&str] = &[
        "secret", "password", "admin", "123456", "qwerty", "default",
        "example", "changeme", "letmein", "welcome",
    ];

    let lower = secret.to_lowercase();
    WEAK_PATTERNS.iter().copied().find(|p| lower.contains(p))
}

/// Total Shannon entropy of a string in bits (entropy per char * length).
pub fn calculate_entropy(s: &str) -> f64 {
    let total = s.chars().count();
    if total == 0 {
        return 0.0;
    }

    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }

    let total = total as f64;
    let per_char: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum();

    per_char * total
}

/// Generate a random alphanumeric secret of `length` characters from the OS RNG.
pub fn generate_secret(length: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::{rngs::OsRng, Rng};

    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
