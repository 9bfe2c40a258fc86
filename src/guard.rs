//! Role-based access decisions (AC-3, AC-6)
//!
//! Roles are totally ordered (`User < Admin`). A caller may act when its
//! role meets the requirement, or when the operation targets its own
//! account. Role changes are the exception: they always need `Admin` and
//! are never allowed on the caller's own account.
//!
//! The decision functions are pure; logging is a separate call so the
//! decision can be tested without a subscriber.

use crate::account::{AccountId, Role};
use crate::error::IdentityError;
use crate::observability::{security_event, SecurityEvent};
use crate::token::TokenClaims;

/// Outcome of an access check, for audit logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied,
}

impl<T> From<&Result<T, IdentityError>> for AccessDecision {
    fn from(result: &Result<T, IdentityError>) -> Self {
        if result.is_ok() {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

/// Access decisions over decoded token claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationGuard;

impl AuthorizationGuard {
    /// Permit when `claims.role >= required`, or when `target` is the caller's own account.
    pub fn authorize(
        claims: &TokenClaims,
        required: Role,
        target: Option<&AccountId>,
    ) -> Result<(), IdentityError> {
        if claims.role.satisfies(required) {
            return Ok(());
        }
        match target {
            Some(target) if *target == claims.sub => Ok(()),
            _ => Err(IdentityError::InsufficientRole),
        }
    }

    /// Permit a role change only for an admin acting on someone else.
    pub fn authorize_role_change(claims: &TokenClaims, target: &AccountId) -> Result<(), IdentityError> {
        if !claims.role.satisfies(Role::Admin) || *target == claims.sub {
            return Err(IdentityError::InsufficientRole);
        }
        Ok(())
    }

    /// Emit an audit record for a decision.
    pub fn log_access_decision(claims: &TokenClaims, resource: &str, decision: AccessDecision) {
        match decision {
            AccessDecision::Granted => security_event!(
                SecurityEvent::AccessGranted,
                account_id = %claims.sub,
                role = %claims.role,
                resource,
                "Access granted"
            ),
            AccessDecision::Denied => security_event!(
                SecurityEvent::AccessDenied,
                account_id = %claims.sub,
                role = %claims.role,
                resource,
                "Access denied"
            ),
        }
    }
}
