//! Access and Refresh Tokens (IA-2, SC-23)
//!
//! Tokens are HMAC-signed JWTs carrying the account id, a role snapshot, an
//! explicit `typ` claim and whole-second `iat`/`exp` timestamps. The service
//! holds no state: the signing keys are derived once from the configuration
//! and every validation is a pure function of the token and the clock.
//!
//! Validation checks, in order:
//!
//! 1. Signature and structure, else [`IdentityError::InvalidToken`]
//! 2. `now < exp`, else [`IdentityError::ExpiredToken`]
//! 3. `typ` equals the expected type, else [`IdentityError::WrongTokenType`]
//!
//! Expiry is checked against the injected [`Clock`] rather than by the JWT
//! library so that it follows the same time source as everything else.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::account::{AccountId, Role};
use crate::clock::Clock;
use crate::config::IdentityConfig;
use crate::error::IdentityError;

// ============================================================================
// Algorithm and token type
// ============================================================================

/// HMAC signature algorithms accepted for tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum SigningAlgorithm {
    /// HMAC-SHA256
    HS256,
    /// HMAC-SHA384
    HS384,
    /// HMAC-SHA512
    HS512,
}

impl SigningAlgorithm {
    /// Parse an algorithm identifier, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Some(Self::HS256),
            "HS384" => Some(Self::HS384),
            "HS512" => Some(Self::HS512),
            _ => None,
        }
    }

    /// Canonical identifier as it appears in the JWT header
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }

    fn jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::HS384 => Algorithm::HS384,
            Self::HS512 => Algorithm::HS512,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which slot a token fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived, attached to every request
    Access,
    /// Long-lived, only exchanged for new tokens
    Refresh,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Claims encoded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (account id)
    pub sub: AccountId,
    /// Role at issuance time
    pub role: Role,
    /// Token type
    pub typ: TokenType,
    /// Issued at, Unix seconds
    pub iat: i64,
    /// Expiration, Unix seconds
    pub exp: i64,
    /// Unique token id, used to spend refresh tokens
    pub jti: String,
}

impl TokenClaims {
    /// Account the token was issued to
    pub fn subject(&self) -> &AccountId {
        &self.sub
    }

    /// Issuance instant
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Expiry instant
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// A signed token together with the claims it carries.
#[derive(Clone)]
pub struct IssuedToken {
    /// Compact JWT
    pub token: String,
    /// Claims inside `token`
    pub claims: TokenClaims,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Access/refresh pair returned by login.
#[derive(Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "bearer"
    pub token_type: &'static str,
    /// Seconds until the access token expires
    pub expires_in: i64,
    #[serde(skip)]
    pub access_claims: TokenClaims,
    #[serde(skip)]
    pub refresh_claims: TokenClaims,
}

impl TokenPair {
    fn new(access: IssuedToken, refresh: IssuedToken) -> Self {
        Self {
            expires_in: access.claims.exp - access.claims.iat,
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "bearer",
            access_claims: access.claims,
            refresh_claims: refresh.claims,
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("access_claims", &self.access_claims)
            .field("refresh_claims", &self.refresh_claims)
            .finish()
    }
}

// ============================================================================
// Token Service
// ============================================================================

/// Issues and validates signed tokens.
pub struct TokenService {
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_lifetime_secs: i64,
    refresh_lifetime_secs: i64,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Build a service from validated configuration.
    pub fn new(config: &IdentityConfig, clock: Arc<dyn Clock>) -> Self {
        let secret = config.signing_secret.as_bytes();
        let algorithm = config.algorithm;

        let mut validation = Validation::new(algorithm.jwt_algorithm());
        validation.leeway = 0;
        validation.validate_exp = false;

        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_lifetime_secs: lifetime_secs(config.access_token_lifetime),
            refresh_lifetime_secs: lifetime_secs(config.refresh_token_lifetime),
            clock,
        }
    }

    /// Issue a short-lived access token
    pub fn issue_access_token(&self, subject: &AccountId, role: Role) -> Result<IssuedToken, IdentityError> {
        self.issue(subject, role, TokenType::Access, self.access_lifetime_secs)
    }

    /// Issue a long-lived refresh token
    pub fn issue_refresh_token(&self, subject: &AccountId, role: Role) -> Result<IssuedToken, IdentityError> {
        self.issue(subject, role, TokenType::Refresh, self.refresh_lifetime_secs)
    }

    /// Issue an access token and a refresh token for the same subject
    pub fn issue_pair(&self, subject: &AccountId, role: Role) -> Result<TokenPair, IdentityError> {
        let access = self.issue_access_token(subject, role)?;
        let refresh = self.issue_refresh_token(subject, role)?;
        Ok(TokenPair::new(access, refresh))
    }

    fn issue(
        &self,
        subject: &AccountId,
        role: Role,
        typ: TokenType,
        lifetime_secs: i64,
    ) -> Result<IssuedToken, IdentityError> {
        let iat = self.clock.now().timestamp();
        let claims = TokenClaims {
            sub: subject.clone(),
            role,
            typ,
            iat,
            exp: iat.saturating_add(lifetime_secs),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let header = Header::new(self.algorithm.jwt_algorithm());
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| IdentityError::Internal(format!("token signing failed: {}", e)))?;

        Ok(IssuedToken { token, claims })
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str, expected: TokenType) -> Result<TokenClaims, IdentityError> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(reason = %e, "Token rejected");
                IdentityError::InvalidToken
            })?;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(IdentityError::ExpiredToken);
        }

        if claims.typ != expected {
            return Err(IdentityError::WrongTokenType {
                expected,
                actual: claims.typ,
            });
        }

        Ok(claims)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.algorithm)
            .field("access_lifetime_secs", &self.access_lifetime_secs)
            .field("refresh_lifetime_secs", &self.refresh_lifetime_secs)
            .finish_non_exhaustive()
    }
}

fn lifetime_secs(lifetime: std::time::Duration) -> i64 {
    i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)
}
