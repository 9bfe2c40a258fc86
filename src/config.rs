//! Identity core configuration (IA-5, SC-12)
//!
//! [`IdentityConfig`] is built once at startup, validated, and then shared
//! by `Arc` with every component that needs a lifetime or the signing key.
//! Nothing below this module reads the process environment.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::parse::{parse_bool, parse_duration};
use crate::secret::{SecretError, SecretPolicy};
use crate::token::SigningAlgorithm;

/// Identity core configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use portcullis::IdentityConfig;
///
/// let config = IdentityConfig::builder()
///     .signing_secret("kT9vQ2xLr7WmZp4sNc8YbHd3JfUe6Ga1")
///     .access_token_lifetime(Duration::from_secs(15 * 60))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.refresh_token_lifetime, Duration::from_secs(7 * 24 * 3600));
/// ```
#[derive(Clone)]
pub struct IdentityConfig {
    /// HMAC key for token signatures (never logged)
    pub signing_secret: String,

    /// Token signature algorithm
    pub algorithm: SigningAlgorithm,

    /// Access token lifetime, strictly shorter than the refresh lifetime
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime
    pub refresh_token_lifetime: Duration,

    /// How long an issued verification code stays live
    pub verification_code_lifetime: Duration,

    /// Age after which a still-pending account is eligible for cleanup
    pub pending_account_ttl: Duration,

    /// Interval between cleanup sweeps
    pub cleanup_interval: Duration,

    /// Upper bound on a single storage call
    pub storage_timeout: Duration,

    /// Extra attempts for idempotent storage calls after a transient failure
    pub storage_retries: u32,

    /// Spend refresh tokens on use and hand out a new one
    pub rotate_refresh_tokens: bool,

    /// Digits in a verification code
    pub code_length: usize,

    /// Mismatching submissions a single code tolerates
    pub max_code_attempts: u32,

    /// Accounts examined per cleanup sweep
    pub cleanup_batch_size: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            algorithm: SigningAlgorithm::HS256,
            access_token_lifetime: Duration::from_secs(30 * 60),
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
            verification_code_lifetime: Duration::from_secs(15 * 60),
            pending_account_ttl: Duration::from_secs(2 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            storage_timeout: Duration::from_secs(5),
            storage_retries: 2,
            rotate_refresh_tokens: true,
            code_length: 6,
            max_code_attempts: 5,
            cleanup_batch_size: 1000,
        }
    }
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("signing_secret", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("refresh_token_lifetime", &self.refresh_token_lifetime)
            .field("verification_code_lifetime", &self.verification_code_lifetime)
            .field("pending_account_ttl", &self.pending_account_ttl)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("storage_timeout", &self.storage_timeout)
            .field("storage_retries", &self.storage_retries)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .field("code_length", &self.code_length)
            .field("max_code_attempts", &self.max_code_attempts)
            .field("cleanup_batch_size", &self.cleanup_batch_size)
            .finish()
    }
}

impl IdentityConfig {
    /// Create a new builder for programmatic configuration.
    pub fn builder() -> IdentityConfigBuilder {
        IdentityConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `JWT_SECRET`: signing secret (required)
    /// - `JWT_ALGORITHM`: "HS256", "HS384", "HS512" (default: "HS256")
    /// - `ACCESS_TOKEN_LIFETIME`: e.g. "30m" (default: "30m")
    /// - `REFRESH_TOKEN_LIFETIME`: e.g. "7d" (default: "7d")
    /// - `VERIFICATION_CODE_LIFETIME`: (default: "15m")
    /// - `PENDING_ACCOUNT_TTL`: (default: "2d")
    /// - `CLEANUP_INTERVAL`: (default: "1h")
    /// - `STORAGE_TIMEOUT`: (default: "5s")
    /// - `STORAGE_RETRIES`: (default: 2)
    /// - `REFRESH_TOKEN_ROTATION`: "true"/"false" (default: "true")
    /// - `VERIFICATION_CODE_LENGTH`: (default: 6)
    /// - `VERIFICATION_MAX_ATTEMPTS`: (default: 5)
    /// - `CLEANUP_BATCH_SIZE`: (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key/value source.
    ///
    /// Unset keys take their defaults; set keys that fail to parse are an
    /// error rather than being silently replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let duration = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                Some(raw) => parse_duration(&raw).ok_or(ConfigError::Invalid { key, value: raw }),
                None => Ok(default),
            }
        };

        let number = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid { key, value: raw }),
                None => Ok(default),
            }
        };

        let signing_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        let algorithm = match lookup("JWT_ALGORITHM") {
            Some(raw) => SigningAlgorithm::parse(&raw).ok_or(ConfigError::UnknownAlgorithm(raw))?,
            None => defaults.algorithm,
        };

        let rotate_refresh_tokens = match lookup("REFRESH_TOKEN_ROTATION") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid {
                key: "REFRESH_TOKEN_ROTATION",
                value: raw,
            })?,
            None => defaults.rotate_refresh_tokens,
        };

        let config = Self {
            signing_secret,
            algorithm,
            access_token_lifetime: duration("ACCESS_TOKEN_LIFETIME", defaults.access_token_lifetime)?,
            refresh_token_lifetime: duration("REFRESH_TOKEN_LIFETIME", defaults.refresh_token_lifetime)?,
            verification_code_lifetime: duration(
                "VERIFICATION_CODE_LIFETIME",
                defaults.verification_code_lifetime,
            )?,
            pending_account_ttl: duration("PENDING_ACCOUNT_TTL", defaults.pending_account_ttl)?,
            cleanup_interval: duration("CLEANUP_INTERVAL", defaults.cleanup_interval)?,
            storage_timeout: duration("STORAGE_TIMEOUT", defaults.storage_timeout)?,
            storage_retries: number("STORAGE_RETRIES", defaults.storage_retries as u64)? as u32,
            rotate_refresh_tokens,
            code_length: number("VERIFICATION_CODE_LENGTH", defaults.code_length as u64)? as usize,
            max_code_attempts: number("VERIFICATION_MAX_ATTEMPTS", defaults.max_code_attempts as u64)? as u32,
            cleanup_batch_size: number("CLEANUP_BATCH_SIZE", defaults.cleanup_batch_size as u64)? as usize,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints and signing secret strength.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_with(&SecretPolicy::default())
    }

    /// Same as [`validate`](Self::validate) with a custom secret policy.
    pub fn validate_with(&self, policy: &SecretPolicy) -> Result<(), ConfigError> {
        if self.signing_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        policy.validate(&self.signing_secret)?;

        for (name, value) in [
            ("access_token_lifetime", self.access_token_lifetime),
            ("refresh_token_lifetime", self.refresh_token_lifetime),
            ("verification_code_lifetime", self.verification_code_lifetime),
            ("pending_account_ttl", self.pending_account_ttl),
            ("cleanup_interval", self.cleanup_interval),
            ("storage_timeout", self.storage_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        // Token claims carry whole seconds
        if self.access_token_lifetime.as_secs() == 0 {
            return Err(ConfigError::ZeroDuration("access_token_lifetime"));
        }

        if self.access_token_lifetime.as_secs() >= self.refresh_token_lifetime.as_secs() {
            return Err(ConfigError::LifetimeOrder {
                access: self.access_token_lifetime,
                refresh: self.refresh_token_lifetime,
            });
        }

        if !(4..=12).contains(&self.code_length) {
            return Err(ConfigError::Invalid {
                key: "code_length",
                value: self.code_length.to_string(),
            });
        }

        if self.max_code_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "max_code_attempts",
                value: "0".into(),
            });
        }

        if self.cleanup_batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "cleanup_batch_size",
                value: "0".into(),
            });
        }

        Ok(())
    }
}

/// Builder for IdentityConfig
#[derive(Debug, Clone, Default)]
pub struct IdentityConfigBuilder {
    config: IdentityConfig,
    secret_policy: Option<SecretPolicy>,
}

impl IdentityConfigBuilder {
    /// Set the token signing secret.
    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.signing_secret = secret.into();
        self
    }

    /// Set the signature algorithm.
    pub fn algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.config.algorithm = algorithm;
        self
    }

    /// Set the access token lifetime.
    pub fn access_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.access_token_lifetime = lifetime;
        self
    }

    /// Set the refresh token lifetime.
    pub fn refresh_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.refresh_token_lifetime = lifetime;
        self
    }

    /// Set the verification code lifetime.
    pub fn verification_code_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.verification_code_lifetime = lifetime;
        self
    }

    /// Set the age after which pending accounts are purged.
    pub fn pending_account_ttl(mut self, ttl: Duration) -> Self {
        self.config.pending_account_ttl = ttl;
        self
    }

    /// Set the cleanup sweep interval.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Set the storage timeout and retry count.
    pub fn storage(mut self, timeout: Duration, retries: u32) -> Self {
        self.config.storage_timeout = timeout;
        self.config.storage_retries = retries;
        self
    }

    /// Enable/disable refresh token rotation.
    pub fn rotate_refresh_tokens(mut self, rotate: bool) -> Self {
        self.config.rotate_refresh_tokens = rotate;
        self
    }

    /// Set the number of digits in a verification code.
    pub fn code_length(mut self, length: usize) -> Self {
        self.config.code_length = length;
        self
    }

    /// Set the number of wrong guesses a code tolerates.
    pub fn max_code_attempts(mut self, attempts: u32) -> Self {
        self.config.max_code_attempts = attempts;
        self
    }

    /// Set how many pending accounts one sweep examines.
    pub fn cleanup_batch_size(mut self, size: usize) -> Self {
        self.config.cleanup_batch_size = size;
        self
    }

    /// Override the signing secret policy used by [`build`](Self::build).
    pub fn secret_policy(mut self, policy: SecretPolicy) -> Self {
        self.secret_policy = Some(policy);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<IdentityConfig, ConfigError> {
        let policy = self.secret_policy.unwrap_or_default();
        self.config.validate_with(&policy)?;
        Ok(self.config)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration rejected at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// No signing secret was supplied
    #[error("signing secret is required (set JWT_SECRET)")]
    MissingSecret,

    /// The signing secret failed the strength policy
    #[error("signing secret rejected: {0}")]
    WeakSecret(#[from] SecretError),

    /// Algorithm identifier not supported
    #[error("unsupported signing algorithm '{0}' (expected HS256, HS384 or HS512)")]
    UnknownAlgorithm(String),

    /// A value could not be parsed or is out of range
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    /// A lifetime, TTL, interval or timeout is zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// Access tokens must expire strictly before refresh tokens
    #[error("access token lifetime ({access:?}) must be shorter than refresh token lifetime ({refresh:?})")]
    LifetimeOrder { access: Duration, refresh: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "kT9vQ2xLr7WmZp4sNc8YbHd3JfUe6Ga1";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = IdentityConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(config.algorithm, SigningAlgorithm::HS256);
        assert_eq!(config.access_token_lifetime, Duration::from_secs(1800));
        assert_eq!(config.refresh_token_lifetime, Duration::from_secs(604_800));
        assert_eq!(config.pending_account_ttl, Duration::from_secs(172_800));
        assert_eq!(config.code_length, 6);
        assert!(config.rotate_refresh_tokens);
    }

    #[test]
    fn test_overrides() {
        let config = IdentityConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("JWT_ALGORITHM", "hs512"),
            ("ACCESS_TOKEN_LIFETIME", "5m"),
            ("REFRESH_TOKEN_LIFETIME", "1d"),
            ("REFRESH_TOKEN_ROTATION", "false"),
            ("STORAGE_RETRIES", "0"),
        ]))
        .unwrap();

        assert_eq!(config.algorithm, SigningAlgorithm::HS512);
        assert_eq!(config.access_token_lifetime, Duration::from_secs(300));
        assert_eq!(config.refresh_token_lifetime, Duration::from_secs(86_400));
        assert!(!config.rotate_refresh_tokens);
        assert_eq!(config.storage_retries, 0);
    }

    #[test]
    fn test_missing_secret() {
        assert_eq!(
            IdentityConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingSecret
        );
        assert_eq!(
            IdentityConfig::from_lookup(lookup(&[("JWT_SECRET", "")])).unwrap_err(),
            ConfigError::MissingSecret
        );
    }

    #[test]
    fn test_weak_secret() {
        let err = IdentityConfig::from_lookup(lookup(&[("JWT_SECRET", "your-secret-key")])).unwrap_err();
        assert!(matches!(err, ConfigError::WeakSecret(_)));
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = IdentityConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("JWT_ALGORITHM", "RS256")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownAlgorithm("RS256".into()));
    }

    #[test]
    fn test_unparsable_duration_is_error() {
        let err = IdentityConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("CLEANUP_INTERVAL", "hourly")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "CLEANUP_INTERVAL",
                value: "hourly".into()
            }
        );
    }

    #[test]
    fn test_access_must_be_shorter_than_refresh() {
        let err = IdentityConfig::builder()
            .signing_secret(SECRET)
            .access_token_lifetime(Duration::from_secs(3600))
            .refresh_token_lifetime(Duration::from_secs(3600))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::LifetimeOrder { .. }));
    }

    #[test]
    fn test_lifetime_order_compared_in_whole_seconds() {
        // 1800.5s truncates to the same 1800s the access token carries
        let err = IdentityConfig::builder()
            .signing_secret(SECRET)
            .access_token_lifetime(Duration::from_secs(30 * 60))
            .refresh_token_lifetime(Duration::from_millis(1_800_500))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::LifetimeOrder { .. }));

        assert!(IdentityConfig::builder()
            .signing_secret(SECRET)
            .access_token_lifetime(Duration::from_secs(30 * 60))
            .refresh_token_lifetime(Duration::from_secs(30 * 60 + 1))
            .build()
            .is_ok());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let err = IdentityConfig::builder()
            .signing_secret(SECRET)
            .pending_account_ttl(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroDuration("pending_account_ttl"));
    }

    #[test]
    fn test_code_length_bounds() {
        let err = IdentityConfig::builder()
            .signing_secret(SECRET)
            .code_length(2)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "code_length", .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = IdentityConfig::builder().signing_secret(SECRET).build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("[REDACTED]"));
    }
}
