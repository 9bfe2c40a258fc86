//! Account records and their lifecycle
//!
//! An account moves through exactly one transition:
//!
//! ```text
//! Pending ──(verification code accepted)──▶ Verified
//! ```
//!
//! Nothing leaves `Verified`. `Pending` accounts older than the configured
//! TTL are removed by the cleanup sweep, never by a user-facing operation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

// ============================================================================
// Identifiers and enums
// ============================================================================

/// Stable opaque account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Allocate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Account role, totally ordered `User < Admin`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular account
    #[default]
    User,
    /// May manage other accounts
    Admin,
}

impl Role {
    /// Whether this role meets or exceeds `required`
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }

    /// Lowercase name used in claims and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Registered, email not yet proven
    Pending,
    /// Email proven via verification code
    Verified,
}

// ============================================================================
// Account
// ============================================================================

/// Identity record owned by the account registry.
#[derive(Clone, PartialEq)]
pub struct Account {
    /// Immutable identifier
    pub id: AccountId,
    /// Normalized (trimmed, lowercased) email, unique across accounts
    pub email: String,
    /// Argon2 PHC string produced by the credential store
    pub password_hash: String,
    /// Optional display name
    pub full_name: Option<String>,
    /// Role, `User` unless changed by an admin
    pub role: Role,
    /// Lifecycle state
    pub status: AccountStatus,
    /// Creation instant, immutable
    pub created_at: DateTime<Utc>,
    /// Set exactly once when the account is verified
    pub verified_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Build a new pending account with the default role
    pub fn pending(
        email: String,
        password_hash: String,
        full_name: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AccountId::generate(),
            email,
            password_hash,
            full_name,
            role: Role::User,
            status: AccountStatus::Pending,
            created_at,
            verified_at: None,
        }
    }

    /// Whether the email has been proven
    pub fn is_verified(&self) -> bool {
        self.status == AccountStatus::Verified
    }

    /// Public view of the account without credential material
    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
            is_verified: self.is_verified(),
            created_at: self.created_at,
            verified_at: self.verified_at,
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("full_name", &self.full_name)
            .field("role", &self.role)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field("verified_at", &self.verified_at)
            .finish()
    }
}

/// Serializable account view returned across the service boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: AccountId,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Fields an owner or admin may change.
///
/// `None` leaves a field untouched. `full_name: Some(None)` clears the name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub full_name: Option<Option<String>>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl ProfileUpdate {
    /// Update only the display name
    pub fn full_name(name: impl Into<String>) -> Self {
        Self {
            full_name: Some(Some(name.into())),
            role: None,
        }
    }

    /// Update only the role
    pub fn role(role: Role) -> Self {
        Self {
            full_name: None,
            role: Some(role),
        }
    }

    /// Whether the update touches nothing
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.role.is_none()
    }
}

// ============================================================================
// Email normalization
// ============================================================================

/// Trim and lowercase an email so uniqueness is case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize and validate an email address.
///
/// - Exactly one `@`
/// - Local part: 1..=64 chars, no leading/trailing/consecutive dots
/// - Domain: 1..=255 chars, at least one dot, alphanumerics, `.` and `-` only
pub fn parse_email(email: &str) -> Result<String, IdentityError> {
    let normalized = normalize_email(email);

    let Some((local, domain)) = normalized.split_once('@') else {
        return Err(IdentityError::Validation("invalid email format".into()));
    };
    if domain.contains('@') {
        return Err(IdentityError::Validation("invalid email format".into()));
    }

    if local.is_empty()
        || local.len() > 64
        || local.starts_with('.')
        || local.ends_with('.')
        || local.contains("..")
        || local.chars().any(char::is_whitespace)
    {
        return Err(IdentityError::Validation("invalid email local part".into()));
    }

    if domain.is_empty()
        || domain.len() > 255
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || !domain.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(IdentityError::Validation("invalid email domain".into()));
    }

    Ok(normalized)
}
