//! Error taxonomy and secure boundary mapping (SI-11)
//!
//! Every failure the identity core can produce is an [`IdentityError`].
//! Domain errors are deterministic outcomes of input and state: they are
//! returned unchanged and never retried. [`IdentityError::TransientStorage`]
//! is the only retryable kind; by the time a caller sees it the storage
//! boundary has already exhausted its retries, so it surfaces as
//! "service unavailable".
//!
//! The transport layer is an external collaborator, but the mapping from
//! error to status code and safe message lives here so every router renders
//! the same response:
//!
//! ```ignore
//! async fn login(State(core): State<Arc<IdentityService>>, Json(req): Json<LoginRequest>)
//!     -> Result<Json<TokenPair>, IdentityError>
//! {
//!     Ok(Json(core.login(&req.email, &req.password).await?))
//! }
//! // InvalidCredentials -> 401 {"error":"invalid_credentials","message":"Invalid email or password"}
//! ```

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::password::PasswordError;
use crate::store::StoreError;
use crate::token::TokenType;

// ============================================================================
// Error Types
// ============================================================================

/// Failure kinds surfaced by the identity core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// An account with the same normalized email already exists
    #[error("an account with this email already exists")]
    DuplicateEmail,

    /// Unknown email or wrong password (deliberately indistinguishable)
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Credentials are correct but the email has not been verified
    #[error("account email has not been verified")]
    UnverifiedAccount,

    /// No live code matches for this account
    #[error("verification code is invalid or expired")]
    InvalidOrExpiredCode,

    /// Signature mismatch, malformed structure, or revoked token
    #[error("token is invalid")]
    InvalidToken,

    /// Token is past its expiry
    #[error("token has expired")]
    ExpiredToken,

    /// An access token was presented where a refresh token is required, or vice versa
    #[error("expected a {expected} token but received a {actual} token")]
    WrongTokenType { expected: TokenType, actual: TokenType },

    /// Caller's role does not permit the operation
    #[error("insufficient role for this operation")]
    InsufficientRole,

    /// Target account does not exist
    #[error("account not found")]
    NotFound,

    /// Storage connection loss or timeout after bounded retries
    #[error("storage temporarily unavailable: {0}")]
    TransientStorage(String),

    /// Malformed input rejected before touching state
    #[error("invalid input: {0}")]
    Validation(String),

    /// Hashing or signing primitive failed
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error categories with appropriate HTTP status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request (400)
    BadRequest,
    /// Unauthorized (401) - authentication failed or token unusable
    Unauthorized,
    /// Forbidden (403) - authenticated but not authorized
    Forbidden,
    /// Not found (404)
    NotFound,
    /// Conflict (409)
    Conflict,
    /// Unprocessable entity (422)
    Validation,
    /// Internal server error (500) - hide details
    Internal,
    /// Service unavailable (503) - temporary failure
    Unavailable,
}

impl ErrorKind {
    /// Get the HTTP status code for this error kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => write!(f, "bad_request"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation_error"),
            Self::Internal => write!(f, "internal_error"),
            Self::Unavailable => write!(f, "service_unavailable"),
        }
    }
}

impl IdentityError {
    /// Category driving status code and logging level
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateEmail => ErrorKind::Conflict,
            Self::InvalidCredentials
            | Self::InvalidToken
            | Self::ExpiredToken
            | Self::WrongTokenType { .. } => ErrorKind::Unauthorized,
            Self::UnverifiedAccount | Self::InsufficientRole => ErrorKind::Forbidden,
            Self::InvalidOrExpiredCode => ErrorKind::BadRequest,
            Self::NotFound => ErrorKind::NotFound,
            Self::TransientStorage(_) => ErrorKind::Unavailable,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateEmail => "duplicate_email",
            Self::InvalidCredentials => "invalid_credentials",
            Self::UnverifiedAccount => "unverified_account",
            Self::InvalidOrExpiredCode => "invalid_or_expired_code",
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
            Self::WrongTokenType { .. } => "wrong_token_type",
            Self::InsufficientRole => "insufficient_role",
            Self::NotFound => "not_found",
            Self::TransientStorage(_) => "service_unavailable",
            Self::Validation(_) => "validation_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Only transient storage failures may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }

    /// Message safe to return to an untrusted client
    pub fn public_message(&self) -> String {
        match self {
            Self::TransientStorage(_) => "Service temporarily unavailable".to_string(),
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::WrongTokenType { .. } => "Wrong token type".to_string(),
            other => {
                let mut message = other.to_string();
                if let Some(first) = message.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                message
            }
        }
    }

    fn log(&self) {
        match self.kind() {
            ErrorKind::Internal | ErrorKind::Unavailable => {
                tracing::error!(error_kind = %self.kind(), error = %self, "Identity core failure");
            }
            ErrorKind::Unauthorized | ErrorKind::Forbidden => {
                tracing::warn!(error_kind = %self.kind(), code = self.code(), "Auth error");
            }
            _ => {
                tracing::debug!(error_kind = %self.kind(), code = self.code(), "Client error");
            }
        }
    }
}

// ============================================================================
// Error Response
// ============================================================================

/// JSON error response format
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorResponse {
    /// Error code
    pub error: &'static str,
    /// Human-readable message
    pub message: String,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.kind().status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.public_message(),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<StoreError> for IdentityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(_) => Self::DuplicateEmail,
            StoreError::Unavailable(_) | StoreError::Timeout => Self::TransientStorage(err.to_string()),
        }
    }
}

impl From<PasswordError> for IdentityError {
    fn from(err: PasswordError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type alias for identity operations
pub type Result<T> = std::result::Result<T, IdentityError>;

// ============================================================================
// Tests
// ============================================================================
