//! # Portcullis
//!
//! Identity and access core for multi-tenant services.
//!
//! This crate registers accounts, proves email ownership with short-lived
//! single-use codes, checks credentials, issues signed access and refresh
//! tokens, enforces role-based authorization and sweeps away registrations
//! that were never verified. Storage, transport and code delivery are
//! collaborators supplied by the host process.
//!
//! ## Features
//!
//! - **Credential Storage** (IA-5): Argon2id password hashing with a registration password policy
//! - **Token Issuance** (IA-2, SC-23): HMAC-signed JWT access/refresh tokens with refresh rotation
//! - **Email Verification** (IA-12): Digest-only, attempt-limited, single-use codes
//! - **Authorization** (AC-3, AC-6): Total-order roles with self-service and role-change rules
//! - **Account Cleanup** (AC-2): Scheduled purge of abandoned pending accounts
//! - **Bounded Storage Calls** (SC-5): Timeouts and retries on every store operation
//! - **Structured Logging** (AU-2, AU-3): Security events through `tracing`
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use portcullis::observability::{init, ObservabilityConfig};
//! use portcullis::{IdentityConfig, IdentityService, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init(ObservabilityConfig::from_env())?;
//!
//!     let service = IdentityService::builder(IdentityConfig::from_env()?)
//!         .store(Arc::new(MemoryStore::new()))
//!         .build()?;
//!
//!     let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     let sweeper = service.cleanup_scheduler().start(shutdown_rx);
//!
//!     // Serve requests through `service`...
//!
//!     shutdown_tx.send(true)?;
//!     sweeper.await?;
//!     Ok(())
//! }
//! ```

mod account;
mod cleanup;
mod clock;
mod config;
mod crypto;
mod delivery;
mod error;
mod guard;
pub mod observability;
mod parse;
mod password;
mod registry;
mod secret;
mod service;
mod storage;
mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod token;
mod verification;

// Re-exports
pub use account::{
    normalize_email, parse_email, Account, AccountId, AccountProfile, AccountStatus, ProfileUpdate, Role,
};
pub use cleanup::{CleanupScheduler, SweepReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, IdentityConfig, IdentityConfigBuilder};
pub use crypto::{constant_time_eq, constant_time_str_eq};
pub use delivery::{CodeDelivery, DeliveryError, DeliveryFuture, LogDelivery};
pub use error::{ErrorKind, ErrorResponse, IdentityError, Result};
pub use guard::{AccessDecision, AuthorizationGuard};
pub use observability::ObservabilityConfigBuilder;
pub use parse::{parse_bool, parse_duration};
pub use password::{CredentialStore, PasswordError, PasswordPolicy, PasswordPolicyBuilder};
pub use registry::{AccountRegistry, MAX_FULL_NAME_LENGTH, MAX_PAGE_SIZE};
pub use secret::{calculate_entropy, generate_secret, SecretError, SecretPolicy};
pub use service::{IdentityService, IdentityServiceBuilder, Registration, RefreshedTokens};
pub use storage::StorageGuard;
pub use store::{CodeCheck, IdentityStore, MemoryStore, PurgeOutcome, StoreError, StoreFuture, StoredCode};
pub use token::{IssuedToken, SigningAlgorithm, TokenClaims, TokenPair, TokenService, TokenType};
pub use verification::{CodeSource, IssuedCode, RandomCodes, VerificationCodeIssuer};
