//! Security Event Logging
//!
//! Structured records for security-relevant outcomes of the identity core,
//! per NIST SP 800-53 AU-2 (Audit Events) and AU-3 (Content of Audit Records).
//!
//! # Usage
//!
//! ```ignore
//! use portcullis::observability::{SecurityEvent, security_event};
//!
//! security_event!(
//!     SecurityEvent::AuthenticationFailure,
//!     reason = "bad_password",
//!     "Login rejected"
//! );
//! ```
//!
//! Never pass passwords, hashes, plaintext codes or raw tokens as fields.

use std::fmt;

/// Security events emitted by the identity core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    // Authentication events
    /// Credentials accepted and tokens issued
    AuthenticationSuccess,
    /// Unknown email or wrong password
    AuthenticationFailure,
    /// Correct credentials for an account that is still pending
    UnverifiedLogin,
    /// Refresh token exchanged for new tokens
    TokenRefreshed,
    /// Token failed signature, expiry or type checks
    TokenRejected,
    /// An already spent refresh token was presented again
    RefreshTokenReuse,

    // Authorization events
    /// Access granted to resource
    AccessGranted,
    /// Access denied to resource
    AccessDenied,

    // Account lifecycle events
    /// New pending account created
    AccountRegistered,
    /// Email ownership proven
    AccountVerified,
    /// Verification code minted for an account
    VerificationCodeIssued,
    /// Submitted verification code did not match a live code
    VerificationFailed,
    /// A code was burned after too many wrong guesses
    VerificationCodeExhausted,
    /// Profile fields changed
    AccountModified,
    /// Account role changed
    RoleChanged,
    /// Account deleted by a user-facing operation
    AccountDeleted,

    // Maintenance events
    /// Abandoned pending account removed by the cleanup sweep
    PendingAccountPurged,
    /// A cleanup sweep finished
    CleanupSweepCompleted,
    /// A cleanup step failed and was skipped
    CleanupFailure,

    // System events
    /// Storage failed after exhausting retries
    StorageUnavailable,
    /// Verification code could not be handed to the delivery channel
    DeliveryFailed,
}

impl SecurityEvent {
    /// Get the event category for filtering/grouping
    pub fn category(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess
            | Self::AuthenticationFailure
            | Self::UnverifiedLogin
            | Self::TokenRefreshed
            | Self::TokenRejected
            | Self::RefreshTokenReuse => "authentication",

            Self::AccessGranted | Self::AccessDenied => "authorization",

            Self::AccountRegistered
            | Self::AccountVerified
            | Self::VerificationCodeIssued
            | Self::VerificationFailed
            | Self::VerificationCodeExhausted
            | Self::AccountModified
            | Self::RoleChanged
            | Self::AccountDeleted => "account_management",

            Self::PendingAccountPurged | Self::CleanupSweepCompleted | Self::CleanupFailure => "maintenance",

            Self::StorageUnavailable | Self::DeliveryFailed => "system",
        }
    }

    /// Get the severity level for the event
    pub fn severity(&self) -> Severity {
        match self {
            Self::StorageUnavailable => Severity::Critical,

            Self::AuthenticationFailure
            | Self::AccessDenied
            | Self::RefreshTokenReuse
            | Self::VerificationCodeExhausted
            | Self::CleanupFailure
            | Self::DeliveryFailed => Severity::High,

            Self::AuthenticationSuccess
            | Self::UnverifiedLogin
            | Self::TokenRejected
            | Self::AccountRegistered
            | Self::AccountVerified
            | Self::VerificationFailed
            | Self::AccountModified
            | Self::RoleChanged
            | Self::AccountDeleted
            | Self::PendingAccountPurged => Severity::Medium,

            Self::AccessGranted
            | Self::TokenRefreshed
            | Self::VerificationCodeIssued
            | Self::CleanupSweepCompleted => Severity::Low,
        }
    }

    /// Get the event name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess => "authentication_success",
            Self::AuthenticationFailure => "authentication_failure",
            Self::UnverifiedLogin => "unverified_login",
            Self::TokenRefreshed => "token_refreshed",
            Self::TokenRejected => "token_rejected",
            Self::RefreshTokenReuse => "refresh_token_reuse",
            Self::AccessGranted => "access_granted",
            Self::AccessDenied => "access_denied",
            Self::AccountRegistered => "account_registered",
            Self::AccountVerified => "account_verified",
            Self::VerificationCodeIssued => "verification_code_issued",
            Self::VerificationFailed => "verification_failed",
            Self::VerificationCodeExhausted => "verification_code_exhausted",
            Self::AccountModified => "account_modified",
            Self::RoleChanged => "role_changed",
            Self::AccountDeleted => "account_deleted",
            Self::PendingAccountPurged => "pending_account_purged",
            Self::CleanupSweepCompleted => "cleanup_sweep_completed",
            Self::CleanupFailure => "cleanup_failure",
            Self::StorageUnavailable => "storage_unavailable",
            Self::DeliveryFailed => "delivery_failed",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine operations
    Low,
    /// Important state changes
    Medium,
    /// Security-relevant failures
    High,
    /// Immediate attention required
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Log a security event with structured fields.
///
/// Every record carries `security_event`, `category` and `severity`, and is
/// routed to `error!`, `warn!`, `info!` or `debug!` by severity.
///
/// ```ignore
/// security_event!(
///     SecurityEvent::PendingAccountPurged,
///     account_id = %id,
///     "Removed abandoned registration"
/// );
/// ```
#[macro_export]
macro_rules! security_event {
    ($event:expr, $($field:tt)*) => {{
        let event = $event;
        let category = event.category();
        let event_name = event.name();

        match event.severity() {
            $crate::observability::Severity::Critical => {
                ::tracing::error!(
                    security_event = event_name,
                    category = category,
                    severity = "critical",
                    $($field)*
                );
            }
            $crate::observability::Severity::High => {
                ::tracing::warn!(
                    security_event = event_name,
                    category = category,
                    severity = "high",
                    $($field)*
                );
            }
            $crate::observability::Severity::Medium => {
                ::tracing::info!(
                    security_event = event_name,
                    category = category,
                    severity = "medium",
                    $($field)*
                );
            }
            $crate::observability::Severity::Low => {
                ::tracing::debug!(
                    security_event = event_name,
                    category = category,
                    severity = "low",
                    $($field)*
                );
            }
        }
    }};
}

pub use security_event;
