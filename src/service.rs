//! Identity service facade
//!
//! [`IdentityService`] wires the components together and exposes the
//! operations a transport layer calls: registration, email verification,
//! login, token refresh and the protected account operations. It holds no
//! request state of its own; everything mutable lives behind the
//! [`IdentityStore`].
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use portcullis::{IdentityConfig, IdentityService, MemoryStore};
//!
//! let service = IdentityService::builder(IdentityConfig::from_env()?)
//!     .store(Arc::new(MemoryStore::new()))
//!     .build()?;
//!
//! let registration = service.register("a@x.com", "correct horse battery", None).await?;
//! service.verify("a@x.com", &code_from_mail).await?;
//! let tokens = service.login("a@x.com", "correct horse battery").await?;
//!
//! // Background sweep for abandoned registrations
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let sweeper = service.cleanup_scheduler().start(shutdown_rx);
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::account::{parse_email, Account, AccountId, AccountProfile, ProfileUpdate, Role};
use crate::cleanup::CleanupScheduler;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, IdentityConfig};
use crate::delivery::{CodeDelivery, LogDelivery};
use crate::error::IdentityError;
use crate::guard::{AccessDecision, AuthorizationGuard};
use crate::observability::{security_event, SecurityEvent};
use crate::password::{run_blocking, CredentialStore, PasswordPolicy};
use crate::registry::AccountRegistry;
use crate::storage::StorageGuard;
use crate::store::{IdentityStore, MemoryStore};
use crate::token::{TokenClaims, TokenPair, TokenService, TokenType};
use crate::verification::{CodeSource, IssuedCode, RandomCodes, VerificationCodeIssuer};

// ============================================================================
// Responses
// ============================================================================

/// Acknowledgment of a new pending account.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub account: AccountProfile,
    /// When the first verification code expires; `None` if no code could
    /// be issued, in which case the holder has to ask for a resend
    pub code_expires_at: Option<DateTime<Utc>>,
}

/// Tokens returned by a refresh.
#[derive(Clone, Serialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Replacement refresh token; present only when rotation is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Always "bearer"
    pub token_type: &'static str,
    /// Seconds until the access token expires
    pub expires_in: i64,
    #[serde(skip)]
    pub access_claims: TokenClaims,
    #[serde(skip)]
    pub refresh_claims: Option<TokenClaims>,
}

impl fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("access_claims", &self.access_claims)
            .field("refresh_claims", &self.refresh_claims)
            .finish()
    }
}

// ============================================================================
// Service
// ============================================================================

/// The identity and access core.
pub struct IdentityService {
    config: IdentityConfig,
    credentials: Arc<CredentialStore>,
    policy: PasswordPolicy,
    tokens: TokenService,
    registry: Arc<AccountRegistry>,
    codes: Arc<VerificationCodeIssuer>,
    delivery: Arc<dyn CodeDelivery>,
    storage: StorageGuard,
    clock: Arc<dyn Clock>,
}

impl IdentityService {
    /// Start building a service from configuration
    pub fn builder(config: IdentityConfig) -> IdentityServiceBuilder {
        IdentityServiceBuilder::new(config)
    }

    /// Configuration the service was built with
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Token issuer and validator
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Account registry
    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------------
    // Password work, off the async workers
    // ------------------------------------------------------------------------

    async fn hash_password(&self, password: &str) -> Result<String, IdentityError> {
        let credentials = self.credentials.clone();
        let password = password.to_string();
        run_blocking(move || credentials.hash(&password)).await?
    }

    async fn check_password(&self, password: &str, password_hash: &str) -> Result<bool, IdentityError> {
        let credentials = self.credentials.clone();
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        run_blocking(move || credentials.verify(&password, &password_hash)).await
    }

    async fn burn_dummy_verification(&self, password: &str) {
        let credentials = self.credentials.clone();
        let password = password.to_string();
        // The caller fails the login either way
        let _ = run_blocking(move || credentials.verify_dummy(&password)).await;
    }

    // ------------------------------------------------------------------------
    // Registration and verification
    // ------------------------------------------------------------------------

    /// Create a pending account and send it a verification code.
    ///
    /// The password is checked against the [`PasswordPolicy`] before it is
    /// hashed. Code delivery failures are logged and do not fail the
    /// registration.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<String>,
    ) -> Result<Registration, IdentityError> {
        let email = parse_email(email)?;
        self.policy.validate_for(password, &email)?;
        let password_hash = self.hash_password(password).await?;

        let account = self.registry.register(&email, password_hash, full_name).await?;

        security_event!(
            SecurityEvent::AccountRegistered,
            account_id = %account.id,
            "Account registered, awaiting verification"
        );

        let code_expires_at = match self.codes.issue(&account.id).await {
            Ok(issued) => {
                self.deliver(&account, &issued).await;
                Some(issued.expires_at)
            }
            Err(e) => {
                warn!(
                    account_id = %account.id,
                    error = %e,
                    "Verification code not issued at registration"
                );
                None
            }
        };

        Ok(Registration {
            account: account.profile(),
            code_expires_at,
        })
    }

    /// Prove ownership of `email` with a verification code.
    ///
    /// The code is spent and the account verified in one store step; a
    /// transient failure changes neither, so the request can be retried.
    pub async fn verify(&self, email: &str, code: &str) -> Result<(), IdentityError> {
        let account = self.registry.find_by_email(email).await?;
        self.codes.redeem(&account.id, code).await?;

        security_event!(
            SecurityEvent::AccountVerified,
            account_id = %account.id,
            "Account verified"
        );
        Ok(())
    }

    /// Issue and deliver a fresh code for a pending account.
    ///
    /// The previous code stops working. Verified accounts are rejected with
    /// [`IdentityError::Validation`].
    pub async fn resend_verification(&self, email: &str) -> Result<(), IdentityError> {
        let account = self.registry.find_by_email(email).await?;
        if account.is_verified() {
            return Err(IdentityError::Validation("account already verified".into()));
        }

        let issued = self.codes.issue(&account.id).await?;
        self.deliver(&account, &issued).await;
        Ok(())
    }

    async fn deliver(&self, account: &Account, issued: &IssuedCode) {
        if let Err(e) = self.delivery.deliver(&account.email, &issued.code).await {
            security_event!(
                SecurityEvent::DeliveryFailed,
                account_id = %account.id,
                error = %e,
                "Verification code delivery failed, code remains valid"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------------

    /// Exchange credentials for an access/refresh token pair.
    ///
    /// Unknown email and wrong password both fail with
    /// [`IdentityError::InvalidCredentials`] after one hash verification.
    /// A correct password on a pending account fails with
    /// [`IdentityError::UnverifiedAccount`].
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, IdentityError> {
        let account = match self.registry.find_by_email(email).await {
            Ok(account) => account,
            Err(IdentityError::NotFound) => {
                self.burn_dummy_verification(password).await;
                security_event!(
                    SecurityEvent::AuthenticationFailure,
                    reason = "unknown_account",
                    "Login failed"
                );
                return Err(IdentityError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };

        if !self.check_password(password, &account.password_hash).await? {
            security_event!(
                SecurityEvent::AuthenticationFailure,
                account_id = %account.id,
                reason = "bad_password",
                "Login failed"
            );
            return Err(IdentityError::InvalidCredentials);
        }

        if let Err(e) = AccountRegistry::authenticate_gate(&account) {
            security_event!(
                SecurityEvent::UnverifiedLogin,
                account_id = %account.id,
                "Login refused for unverified account"
            );
            return Err(e);
        }

        let pair = self.tokens.issue_pair(&account.id, account.role)?;

        security_event!(
            SecurityEvent::AuthenticationSuccess,
            account_id = %account.id,
            role = %account.role,
            "Login succeeded"
        );
        Ok(pair)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The new access token carries the account's current role. With
    /// rotation enabled the presented token is spent atomically and a new
    /// refresh token is returned; presenting a spent token fails with
    /// [`IdentityError::InvalidToken`]. Spending is the last fallible step,
    /// so a failure before it leaves the presented token usable.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, IdentityError> {
        let claims = self.checked(refresh_token, TokenType::Refresh)?;
        let rotate = self.config.rotate_refresh_tokens;

        let account = self.subject(&claims).await?;
        let access = self.tokens.issue_access_token(&account.id, account.role)?;
        let refresh = if rotate {
            Some(self.tokens.issue_refresh_token(&account.id, account.role)?)
        } else {
            None
        };

        if rotate {
            let expires_at = claims.expires_at();
            let first_use = self
                .storage
                .once("revoke_refresh", |s| s.revoke_refresh(&claims.jti, expires_at))
                .await?;
            if !first_use {
                security_event!(
                    SecurityEvent::RefreshTokenReuse,
                    account_id = %claims.sub,
                    jti = %claims.jti,
                    "Spent refresh token presented again"
                );
                return Err(IdentityError::InvalidToken);
            }
        }

        security_event!(
            SecurityEvent::TokenRefreshed,
            account_id = %account.id,
            rotated = rotate,
            "Access token refreshed"
        );

        Ok(RefreshedTokens {
            expires_in: access.claims.exp - access.claims.iat,
            access_token: access.token,
            token_type: "bearer",
            access_claims: access.claims,
            refresh_token: refresh.as_ref().map(|t| t.token.clone()),
            refresh_claims: refresh.map(|t| t.claims),
        })
    }

    /// Validate an access token and return its claims.
    pub fn authenticate(&self, access_token: &str) -> Result<TokenClaims, IdentityError> {
        self.checked(access_token, TokenType::Access)
    }

    fn checked(&self, token: &str, expected: TokenType) -> Result<TokenClaims, IdentityError> {
        self.tokens.validate(token, expected).inspect_err(|e| {
            security_event!(
                SecurityEvent::TokenRejected,
                expected = %expected,
                reason = e.code(),
                "Token rejected"
            );
        })
    }

    /// Account a token was issued to; a vanished account makes the token invalid
    async fn subject(&self, claims: &TokenClaims) -> Result<Account, IdentityError> {
        match self.registry.find_by_id(&claims.sub).await {
            Err(IdentityError::NotFound) => Err(IdentityError::InvalidToken),
            other => other,
        }
    }

    // ------------------------------------------------------------------------
    // Protected account operations
    // ------------------------------------------------------------------------

    /// Profile of the token's own account
    pub async fn current_account(&self, access_token: &str) -> Result<AccountProfile, IdentityError> {
        let claims = self.authenticate(access_token)?;
        Ok(self.subject(&claims).await?.profile())
    }

    /// Page of accounts ordered by creation time. Admin only.
    pub async fn list_accounts(
        &self,
        access_token: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<AccountProfile>, IdentityError> {
        let claims = self.authenticate(access_token)?;
        Self::enforce(&claims, "accounts", AuthorizationGuard::authorize(&claims, Role::Admin, None))?;

        let page = self.registry.list_page(skip, limit).await?;
        Ok(page.iter().map(Account::profile).collect())
    }

    /// One account. Admin, or the account itself.
    pub async fn get_account(&self, access_token: &str, id: &AccountId) -> Result<AccountProfile, IdentityError> {
        let claims = self.authenticate(access_token)?;
        Self::enforce(&claims, "account", AuthorizationGuard::authorize(&claims, Role::Admin, Some(id)))?;

        Ok(self.registry.find_by_id(id).await?.profile())
    }

    /// Update `full_name` and, for an admin acting on another account, `role`.
    pub async fn update_account(
        &self,
        access_token: &str,
        id: &AccountId,
        update: ProfileUpdate,
    ) -> Result<AccountProfile, IdentityError> {
        let claims = self.authenticate(access_token)?;
        let decision = AuthorizationGuard::authorize(&claims, Role::Admin, Some(id)).and_then(|()| {
            match update.role {
                Some(_) => AuthorizationGuard::authorize_role_change(&claims, id),
                None => Ok(()),
            }
        });
        Self::enforce(&claims, "account", decision)?;

        let new_role = update.role;
        let account = self.registry.update_profile(&claims, id, update).await?;

        if let Some(role) = new_role {
            security_event!(
                SecurityEvent::RoleChanged,
                actor_id = %claims.sub,
                account_id = %account.id,
                role = %role,
                "Account role changed"
            );
        }
        security_event!(
            SecurityEvent::AccountModified,
            actor_id = %claims.sub,
            account_id = %account.id,
            "Account updated"
        );
        Ok(account.profile())
    }

    /// Delete an account and its codes. Admin, or the account itself.
    pub async fn delete_account(&self, access_token: &str, id: &AccountId) -> Result<(), IdentityError> {
        let claims = self.authenticate(access_token)?;
        Self::enforce(&claims, "account", AuthorizationGuard::authorize(&claims, Role::Admin, Some(id)))?;

        self.registry.delete(id).await?;

        security_event!(
            SecurityEvent::AccountDeleted,
            actor_id = %claims.sub,
            account_id = %id,
            "Account deleted"
        );
        Ok(())
    }

    fn enforce(claims: &TokenClaims, resource: &str, decision: Result<(), IdentityError>) -> Result<(), IdentityError> {
        AuthorizationGuard::log_access_decision(claims, resource, AccessDecision::from(&decision));
        decision
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Sweeper for abandoned registrations sharing this service's store,
    /// clock and configuration
    pub fn cleanup_scheduler(&self) -> CleanupScheduler {
        CleanupScheduler::new(
            self.registry.clone(),
            self.codes.clone(),
            self.storage.clone(),
            self.clock.clone(),
            &self.config,
        )
    }
}

impl fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityService")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .field("codes", &self.codes)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`IdentityService`].
///
/// Every collaborator has a default: an empty [`MemoryStore`], the system
/// clock, [`LogDelivery`], random codes, default Argon2 parameters and the
/// default password policy.
pub struct IdentityServiceBuilder {
    config: IdentityConfig,
    store: Option<Arc<dyn IdentityStore>>,
    clock: Option<Arc<dyn Clock>>,
    delivery: Option<Arc<dyn CodeDelivery>>,
    code_source: Option<Arc<dyn CodeSource>>,
    credentials: Option<CredentialStore>,
    policy: Option<PasswordPolicy>,
}

impl IdentityServiceBuilder {
    fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            delivery: None,
            code_source: None,
            credentials: None,
            policy: None,
        }
    }

    /// Persistence collaborator
    pub fn store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Verification code delivery channel
    pub fn delivery(mut self, delivery: Arc<dyn CodeDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Source of verification code values
    pub fn code_source(mut self, codes: Arc<dyn CodeSource>) -> Self {
        self.code_source = Some(codes);
        self
    }

    /// Password hasher
    pub fn credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Registration password policy
    pub fn password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validate the configuration and assemble the service.
    pub fn build(self) -> Result<IdentityService, ConfigError> {
        self.config.validate()?;

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let storage = StorageGuard::new(store, &self.config);

        let registry = Arc::new(AccountRegistry::new(storage.clone(), clock.clone()));
        let codes = Arc::new(VerificationCodeIssuer::new(
            storage.clone(),
            self.code_source.unwrap_or_else(|| Arc::new(RandomCodes)),
            clock.clone(),
            &self.config,
        ));
        let tokens = TokenService::new(&self.config, clock.clone());

        Ok(IdentityService {
            credentials: Arc::new(self.credentials.unwrap_or_default()),
            policy: self.policy.unwrap_or_default(),
            delivery: self.delivery.unwrap_or_else(|| Arc::new(LogDelivery::new())),
            tokens,
            registry,
            codes,
            storage,
            clock,
            config: self.config,
        })
    }
}
