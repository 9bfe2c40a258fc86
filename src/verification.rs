//! Email verification codes (IA-5, IA-12)
//!
//! A code is a short string of decimal digits bound to one account. At most
//! one live code exists per account: issuing replaces whatever was stored
//! before. Only the SHA-256 digest is persisted, and the check-and-consume
//! step runs inside the store's atomic unit so two concurrent submissions of
//! the same code cannot both succeed.
//!
//! A code is live while `!consumed && now < expires_at`. At `now ==
//! expires_at` it is already expired.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::account::AccountId;
use crate::clock::{to_chrono, Clock};
use crate::config::IdentityConfig;
use crate::crypto::{digest_code, random_digits};
use crate::error::IdentityError;
use crate::observability::{security_event, SecurityEvent};
use crate::storage::StorageGuard;
use crate::store::{CodeCheck, StoredCode};

// ============================================================================
// Code generation
// ============================================================================

/// Produces fresh code values.
pub trait CodeSource: Send + Sync {
    /// Generate a code of `length` digits
    fn generate(&self, length: usize) -> String;
}

/// Codes drawn from the operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn generate(&self, length: usize) -> String {
        random_digits(length)
    }
}

/// A freshly issued code, ready to hand to delivery.
#[derive(Clone)]
pub struct IssuedCode {
    /// Plaintext code; exists only in memory
    pub code: String,
    /// Instant at which the code stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCode")
            .field("code", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// Issuer
// ============================================================================

/// Issues and redeems single-use verification codes.
pub struct VerificationCodeIssuer {
    storage: StorageGuard,
    codes: Arc<dyn CodeSource>,
    clock: Arc<dyn Clock>,
    lifetime: chrono::Duration,
    code_length: usize,
    max_attempts: u32,
}

impl VerificationCodeIssuer {
    /// Create an issuer using the configured lifetime, length and attempt limit
    pub fn new(
        storage: StorageGuard,
        codes: Arc<dyn CodeSource>,
        clock: Arc<dyn Clock>,
        config: &IdentityConfig,
    ) -> Self {
        Self {
            storage,
            codes,
            clock,
            lifetime: to_chrono(config.verification_code_lifetime),
            code_length: config.code_length,
            max_attempts: config.max_code_attempts,
        }
    }

    /// Mint a new code for `account_id`, invalidating any previous one.
    pub async fn issue(&self, account_id: &AccountId) -> Result<IssuedCode, IdentityError> {
        let code = self.codes.generate(self.code_length);
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let record = StoredCode {
            account_id: account_id.clone(),
            digest: digest_code(&code),
            expires_at,
            consumed: false,
            failed_attempts: 0,
        };
        self.storage
            .once("replace_code", move |s| s.replace_code(record))
            .await?;

        security_event!(
            SecurityEvent::VerificationCodeIssued,
            account_id = %account_id,
            expires_at = %expires_at,
            "Verification code issued"
        );

        Ok(IssuedCode { code, expires_at })
    }

    /// Consume `code` for `account_id` without touching the account.
    ///
    /// Succeeds at most once per issued code. Every failure, whatever its
    /// cause, is reported as [`IdentityError::InvalidOrExpiredCode`].
    pub async fn validate(&self, account_id: &AccountId, code: &str) -> Result<(), IdentityError> {
        self.settle(account_id, code, false).await
    }

    /// Consume `code` and mark the account verified in one store step.
    ///
    /// A transient failure leaves both the code and the account untouched,
    /// so the same code can be submitted again.
    pub async fn redeem(&self, account_id: &AccountId, code: &str) -> Result<(), IdentityError> {
        self.settle(account_id, code, true).await
    }

    async fn settle(&self, account_id: &AccountId, code: &str, verify: bool) -> Result<(), IdentityError> {
        let digest = digest_code(code.trim());
        let now = self.clock.now();
        let max_attempts = self.max_attempts;

        let check = if verify {
            self.storage
                .once("redeem_code", |s| s.redeem_code(account_id, &digest, now, max_attempts))
                .await?
        } else {
            self.storage
                .once("consume_code", |s| s.consume_code(account_id, &digest, now, max_attempts))
                .await?
        };

        match check {
            CodeCheck::Accepted => Ok(()),
            CodeCheck::Mismatch { remaining: 0 } => {
                security_event!(
                    SecurityEvent::VerificationCodeExhausted,
                    account_id = %account_id,
                    "Verification code burned after repeated mismatches"
                );
                Err(IdentityError::InvalidOrExpiredCode)
            }
            other => {
                let reason = match other {
                    CodeCheck::Missing => "missing",
                    CodeCheck::Expired => "expired",
                    CodeCheck::Exhausted => "exhausted",
                    _ => "mismatch",
                };
                security_event!(
                    SecurityEvent::VerificationFailed,
                    account_id = %account_id,
                    reason,
                    "Verification code rejected"
                );
                Err(IdentityError::InvalidOrExpiredCode)
            }
        }
    }

    /// Drop consumed and expired codes. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, IdentityError> {
        let now = self.clock.now();
        self.storage.idempotent("purge_codes", |s| s.purge_codes(now)).await
    }
}

impl fmt::Debug for VerificationCodeIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationCodeIssuer")
            .field("lifetime", &self.lifetime)
            .field("code_length", &self.code_length)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
