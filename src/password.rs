//! Credential Storage and Password Policy (IA-5(1))
//!
//! [`CredentialStore`] turns passwords into salted Argon2id PHC strings and
//! checks candidates against them. [`PasswordPolicy`] applies NIST SP 800-63B
//! style rules at registration: a length window, no PIN-like passwords, no
//! password built from the email address, and no well-known passwords.
//!
//! # Usage
//!
//! ```
//! use portcullis::{CredentialStore, PasswordPolicy};
//!
//! let policy = PasswordPolicy::default();
//! assert!(policy.validate_for("pw123456", "a@x.com").is_ok());
//! assert!(policy.validate_for("12345678", "a@x.com").is_err());
//!
//! let store = CredentialStore::fast_for_tests();
//! let hash = store.hash("pw123456").unwrap();
//! assert!(store.verify("pw123456", &hash));
//! assert!(!store.verify("pw123457", &hash));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;

use crate::error::IdentityError;

// ============================================================================
// Credential Store
// ============================================================================

/// Candidate checked against the dummy hash when an email is unknown, so a
/// failed login costs the same whether or not the account exists.
const DUMMY_PASSWORD: &str = "portcullis-timing-equalizer";

/// One-way password hashing with Argon2id.
///
/// Stateless apart from its parameters; share one instance across tasks.
pub struct CredentialStore {
    params: Params,
    dummy_hash: OnceLock<Option<String>>,
}

impl CredentialStore {
    /// Argon2id with the library's recommended parameters
    pub fn new() -> Self {
        Self::with_params(Params::default())
    }

    /// Argon2id with explicit memory/time/parallelism costs
    pub fn with_params(params: Params) -> Self {
        Self {
            params,
            dummy_hash: OnceLock::new(),
        }
    }

    /// Minimum-cost parameters. Only suitable for tests, where the default
    /// memory-hard parameters would dominate runtime.
    pub fn fast_for_tests() -> Self {
        // 8 KiB, one pass, one lane: the smallest Argon2 accepts
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None)
            .unwrap_or_default();
        Self::with_params(params)
    }

    fn hasher(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password with a fresh random salt.
    ///
    /// Two calls with the same password produce different PHC strings.
    pub fn hash(&self, password: &str) -> Result<String, IdentityError> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| IdentityError::Internal(format!("password hashing failed: {}", e)))
    }

    /// Check a password against a stored PHC string.
    ///
    /// Returns `false` on mismatch and on a hash that does not parse. The
    /// parameters embedded in the PHC string are used, so hashes created with
    /// different costs still verify.
    pub fn verify(&self, password: &str, password_hash: &str) -> bool {
        PasswordHash::new(password_hash)
            .ok()
            .map(|parsed| self.hasher().verify_password(password.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    }

    /// Burn one verification's worth of work and return `false`.
    ///
    /// Called on login for unknown emails.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let dummy = self
            .dummy_hash
            .get_or_init(|| self.hash(DUMMY_PASSWORD).ok());
        if let Some(hash) = dummy {
            let _ = self.verify(password, hash);
        }
        false
    }
}

/// Run Argon2 work on the blocking pool so it does not stall the async
/// worker that called it.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, IdentityError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        tracing::error!(error = %e, "Password hashing task panicked");
        IdentityError::Internal(format!("password task failed: {}", e))
    })
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("m_cost", &self.params.m_cost())
            .field("t_cost", &self.params.t_cost())
            .field("p_cost", &self.params.p_cost())
            .finish()
    }
}

// ============================================================================
// Password Policy Configuration
// ============================================================================

/// Password policy applied at registration (IA-5(1))
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    /// Minimum password length in characters
    pub min_length: usize,

    /// Maximum password length in characters
    pub max_length: usize,

    /// Check against common password list
    pub check_common_passwords: bool,

    /// Disallow passwords containing the email local part
    pub disallow_email_in_password: bool,

    /// Custom blocked passwords (application-specific, lowercase)
    pub blocked_passwords: HashSet<String>,

    /// Require password to not be entirely numeric
    pub disallow_all_numeric: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            check_common_passwords: true,
            disallow_email_in_password: true,
            blocked_passwords: HashSet::new(),
            disallow_all_numeric: true,
        }
    }
}

impl PasswordPolicy {
    /// Create a new builder for custom policy configuration
    pub fn builder() -> PasswordPolicyBuilder {
        PasswordPolicyBuilder::default()
    }

    /// Accept any non-empty password up to the maximum length
    pub fn minimal() -> Self {
        Self {
            min_length: 1,
            max_length: 128,
            check_common_passwords: false,
            disallow_email_in_password: false,
            blocked_passwords: HashSet::new(),
            disallow_all_numeric: false,
        }
    }

    /// Validate a password chosen for the account with `email`
    pub fn validate_for(&self, password: &str, email: &str) -> Result<(), PasswordError> {
        let length = password.chars().count();
        if length < self.min_length {
            return Err(PasswordError::TooShort {
                min: self.min_length,
                actual: length,
            });
        }

        if length > self.max_length {
            return Err(PasswordError::TooLong {
                max: self.max_length,
                actual: length,
            });
        }

        if self.disallow_all_numeric && password.chars().all(|c| c.is_ascii_digit()) {
            return Err(PasswordError::AllNumeric);
        }

        let lower = password.to_lowercase();

        if self.disallow_email_in_password {
            if let Some(local) = email.split('@').next() {
                // Very short local parts would reject too many passwords
                if local.len() > 2 && lower.contains(&local.to_lowercase()) {
                    return Err(PasswordError::ContainsEmail);
                }
            }
        }

        if self.blocked_passwords.contains(&lower) {
            return Err(PasswordError::Blocked);
        }

        if self.check_common_passwords && is_common_password(&lower) {
            return Err(PasswordError::TooCommon);
        }

        Ok(())
    }
}

/// Builder for PasswordPolicy
#[derive(Debug, Clone, Default)]
pub struct PasswordPolicyBuilder {
    policy: PasswordPolicy,
}

impl PasswordPolicyBuilder {
    /// Set minimum password length
    pub fn min_length(mut self, len: usize) -> Self {
        self.policy.min_length = len;
        self
    }

    /// Set maximum password length
    pub fn max_length(mut self, len: usize) -> Self {
        self.policy.max_length = len;
        self
    }

    /// Enable/disable common password checking
    pub fn check_common_passwords(mut self, check: bool) -> Self {
        self.policy.check_common_passwords = check;
        self
    }

    /// Enable/disable email-in-password check
    pub fn disallow_email_in_password(mut self, disallow: bool) -> Self {
        self.policy.disallow_email_in_password = disallow;
        self
    }

    /// Add custom blocked passwords
    pub fn block_passwords(mut self, passwords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.policy
            .blocked_passwords
            .extend(passwords.into_iter().map(|p| p.into().to_lowercase()));
        self
    }

    /// Enable/disable all-numeric password check
    pub fn disallow_all_numeric(mut self, disallow: bool) -> Self {
        self.policy.disallow_all_numeric = disallow;
        self
    }

    /// Build the policy
    pub fn build(self) -> PasswordPolicy {
        self.policy
    }
}

// ============================================================================
// Password Errors
// ============================================================================

/// Why a password was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    /// Password is too short
    TooShort { min: usize, actual: usize },
    /// Password is too long
    TooLong { max: usize, actual: usize },
    /// Password is too common
    TooCommon,
    /// Password contains the email local part
    ContainsEmail,
    /// Password is blocked by policy
    Blocked,
    /// Password is all numeric (PIN-like)
    AllNumeric,
}

impl fmt::Display for PasswordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { min, actual } => {
                write!(f, "password must be at least {} characters (got {})", min, actual)
            }
            Self::TooLong { max, actual } => {
                write!(f, "password must be at most {} characters (got {})", max, actual)
            }
            Self::TooCommon => write!(f, "password is too common"),
            Self::ContainsEmail => write!(f, "password cannot contain your email"),
            Self::Blocked => write!(f, "this password is not allowed"),
            Self::AllNumeric => write!(f, "password cannot be all numbers"),
        }
    }
}

impl std::error::Error for PasswordError {}

// ============================================================================
// Common Password List
// ============================================================================

/// Exact match, or a common base of 4+ characters followed only by digits
/// ("password123456" matches "password").
fn is_common_password(lower: &str) -> bool {
    if COMMON_PASSWORDS.contains(&lower) {
        return true;
    }

    COMMON_PASSWORDS.iter().any(|common| {
        common.len() >= 4
            && lower
                .strip_prefix(common)
                .is_some_and(|suffix| suffix.chars().all(|c| c.is_ascii_digit()))
    })
}

/// Most common passwords (SecLists subset)
static COMMON_PASSWORDS: &[&str] = &[
    "123456", "password", "12345678", "qwerty", "123456789",
    "12345", "1234", "111111", "1234567", "dragon",
    "123123", "baseball", "abc123", "football", "monkey",
    "letmein", "shadow", "master", "666666", "qwertyuiop",
    "123321", "mustang", "1234567890", "michael", "654321",
    "superman", "1qaz2wsx", "7777777", "121212", "000000",
    "qazwsx", "123qwe", "killer", "trustno1", "jordan",
    "jennifer", "zxcvbnm", "asdfgh", "hunter", "buster",
    "soccer", "harley", "batman", "andrew", "tigger",
    "sunshine", "iloveyou", "charlie", "robert", "thomas",
    "hockey", "ranger", "daniel", "starwars", "george",
    "computer", "michelle", "jessica", "pepper", "zxcvbn",
    "freedom", "maggie", "ginger", "princess", "joshua",
    "cheese", "amanda", "summer", "ashley", "nicole",
    "chelsea", "matthew", "access", "yankees", "thunder",
    "taylor", "matrix", "passw0rd", "admin", "root",
    "welcome", "login", "guest", "changeme", "test",
    "testing", "default", "changethis", "secret", "administrator",
];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_leaves_calling_thread() {
        let caller = std::thread::current().id();
        let worker = run_blocking(|| std::thread::current().id()).await.unwrap();
        assert_ne!(caller, worker);
    }

    #[tokio::test]
    async fn test_run_blocking_panic_is_internal_error() {
        let err = run_blocking(|| -> u32 { panic!("argon2 exploded") }).await.unwrap_err();
        assert!(matches!(err, IdentityError::Internal(_)));
    }

    #[test]
    fn test_hash_is_salted() {
        let store = CredentialStore::fast_for_tests();
        let a = store.hash("pw123456").unwrap();
        let b = store.hash("pw123456").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(!a.contains("pw123456"));
    }

    #[test]
    fn test_verify_roundtrip() {
        let store = CredentialStore::fast_for_tests();
        let hash = store.hash("correct horse").unwrap();
        assert!(store.verify("correct horse", &hash));
        assert!(!store.verify("correct horsf", &hash));
        assert!(!store.verify("", &hash));
    }

    #[test]
    fn test_verify_garbage_hash_is_false() {
        let store = CredentialStore::fast_for_tests();
        assert!(!store.verify("anything", "not-a-phc-string"));
        assert!(!store.verify("anything", ""));
    }

    #[test]
    fn test_verify_uses_embedded_params() {
        let fast = CredentialStore::fast_for_tests();
        let hash = fast.hash("pw123456").unwrap();
        let other = CredentialStore::with_params(Params::new(16, 2, 1, None).unwrap());
        assert!(other.verify("pw123456", &hash));
    }

    #[test]
    fn test_verify_dummy_always_false() {
        let store = CredentialStore::fast_for_tests();
        assert!(!store.verify_dummy(DUMMY_PASSWORD));
        assert!(!store.verify_dummy("pw123456"));
    }

    #[test]
    fn test_default_policy() {
        let policy = PasswordPolicy::default();
        assert_eq!(policy.min_length, 8);
        assert_eq!(policy.max_length, 128);
        assert!(policy.check_common_passwords);
    }

    #[test]
    fn test_length_validation() {
        let policy = PasswordPolicy::default();

        assert!(matches!(
            policy.validate_for("pw1234", "a@x.com"),
            Err(PasswordError::TooShort { min: 8, actual: 6 })
        ));
        assert!(policy.validate_for("pw123456", "a@x.com").is_ok());
        assert!(matches!(
            policy.validate_for(&"x1".repeat(65), "a@x.com"),
            Err(PasswordError::TooLong { max: 128, actual: 130 })
        ));
    }

    #[test]
    fn test_common_password_rejection() {
        let policy = PasswordPolicy::default();

        assert_eq!(policy.validate_for("password", "a@x.com"), Err(PasswordError::TooCommon));
        assert_eq!(policy.validate_for("password12345", "a@x.com"), Err(PasswordError::TooCommon));
        assert_eq!(policy.validate_for("QWERTY123456", "a@x.com"), Err(PasswordError::TooCommon));
    }

    #[test]
    fn test_email_in_password() {
        let policy = PasswordPolicy::default();

        assert_eq!(
            policy.validate_for("johnsmith1234", "johnsmith@example.com"),
            Err(PasswordError::ContainsEmail)
        );
        // Two-character local parts are ignored
        assert!(policy.validate_for("jo-runs-fast", "jo@example.com").is_ok());
    }

    #[test]
    fn test_all_numeric() {
        let policy = PasswordPolicy::default();

        assert_eq!(policy.validate_for("90817263", "a@x.com"), Err(PasswordError::AllNumeric));
        assert!(policy.validate_for("90817263a", "a@x.com").is_ok());
    }

    #[test]
    fn test_custom_blocked() {
        let policy = PasswordPolicy::builder()
            .block_passwords(vec!["companyname123"])
            .build();

        assert_eq!(policy.validate_for("CompanyName123", "a@x.com"), Err(PasswordError::Blocked));
    }

    #[test]
    fn test_minimal_policy() {
        let policy = PasswordPolicy::minimal();
        assert!(policy.validate_for("1", "a@x.com").is_ok());
        assert!(policy.validate_for("password", "a@x.com").is_ok());
    }

    #[test]
    fn test_password_error_into_validation() {
        let err: IdentityError = PasswordError::AllNumeric.into();
        assert!(matches!(err, IdentityError::Validation(msg) if msg.contains("numbers")));
    }
}
