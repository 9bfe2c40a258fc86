//! Persistence collaborator
//!
//! [`IdentityStore`] is the seam between the identity core and whatever
//! database a host process uses. Each method is one atomic unit: the
//! implementation must apply it completely or not at all, and the
//! conditional operations ([`IdentityStore::insert_account`],
//! [`IdentityStore::consume_code`], [`IdentityStore::delete_if_pending`],
//! [`IdentityStore::revoke_refresh`]) must evaluate their condition and
//! their write under the same lock or transaction.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and
//! single-node deployments.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use crate::account::{Account, AccountId, AccountStatus, ProfileUpdate};
use crate::crypto::constant_time_str_eq;

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

// ============================================================================
// Errors and records
// ============================================================================

/// Failure signalled by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (the payload names the column)
    #[error("unique constraint violated on {0}")]
    UniqueViolation(&'static str),
    /// Connection lost or backend refused the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// The operation did not complete within its deadline
    #[error("storage operation timed out")]
    Timeout,
}

impl StoreError {
    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Persisted verification code. Only the digest of the code is stored.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCode {
    pub account_id: AccountId,
    /// Hex SHA-256 of the code
    pub digest: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    /// Mismatching submissions so far
    pub failed_attempts: u32,
}

impl StoredCode {
    /// Whether the code can still be redeemed at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && now < self.expires_at
    }
}

impl std::fmt::Debug for StoredCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCode")
            .field("account_id", &self.account_id)
            .field("expires_at", &self.expires_at)
            .field("consumed", &self.consumed)
            .field("failed_attempts", &self.failed_attempts)
            .finish_non_exhaustive()
    }
}

/// Result of an atomic check-and-consume of a verification code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    /// The code matched and is now consumed
    Accepted,
    /// No unconsumed code exists for the account
    Missing,
    /// The live code has passed its expiry
    Expired,
    /// Wrong value; `remaining` guesses left before the code is burned
    Mismatch { remaining: u32 },
    /// Too many wrong guesses; the code is unusable
    Exhausted,
}

/// Outcome of a conditional pending-account purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Account was pending and older than the cutoff; it and its codes are gone
    Purged,
    /// Account was verified in the meantime and is kept
    SkippedVerified,
    /// Account is pending but not older than the cutoff
    SkippedFresh,
    /// Account no longer exists
    Missing,
}

// ============================================================================
// Store trait
// ============================================================================

/// Transactional storage for accounts, verification codes and spent refresh tokens.
pub trait IdentityStore: Send + Sync {
    /// Insert a new account; fails with `UniqueViolation("email")` if the email is taken
    fn insert_account(&self, account: Account) -> StoreFuture<'_, Account>;

    /// Look up an account by id
    fn account_by_id(&self, id: &AccountId) -> StoreFuture<'_, Option<Account>>;

    /// Look up an account by normalized email
    fn account_by_email(&self, email: &str) -> StoreFuture<'_, Option<Account>>;

    /// Set `Verified` and `verified_at = at` if still pending; an already
    /// verified account is returned unchanged
    fn mark_verified(&self, id: &AccountId, at: DateTime<Utc>) -> StoreFuture<'_, Option<Account>>;

    /// Apply a profile update and return the new record
    fn update_profile(&self, id: &AccountId, update: ProfileUpdate) -> StoreFuture<'_, Option<Account>>;

    /// Delete an account and its codes; `false` if it did not exist
    fn delete_account(&self, id: &AccountId) -> StoreFuture<'_, bool>;

    /// Delete an account and its codes only if it is still pending and
    /// `created_at < cutoff`, checked in the same atomic unit as the delete
    fn delete_if_pending(&self, id: &AccountId, cutoff: DateTime<Utc>) -> StoreFuture<'_, PurgeOutcome>;

    /// Ids of pending accounts with `created_at < cutoff`, oldest first
    fn pending_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<AccountId>>;

    /// Accounts ordered by `(created_at, id)`
    fn list_accounts(&self, skip: usize, limit: usize) -> StoreFuture<'_, Vec<Account>>;

    /// Store a code, replacing any previous code for the same account
    fn replace_code(&self, code: StoredCode) -> StoreFuture<'_, ()>;

    /// Atomically compare `digest` against the account's live code and
    /// consume it on a match
    fn consume_code(
        &self,
        account_id: &AccountId,
        digest: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> StoreFuture<'_, CodeCheck>;

    /// Consume the account's live code and, on a match, set `Verified` and
    /// `verified_at = now` in the same atomic unit
    fn redeem_code(
        &self,
        account_id: &AccountId,
        digest: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> StoreFuture<'_, CodeCheck>;

    /// Remove consumed or expired codes; returns how many were removed
    fn purge_codes(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize>;

    /// Record a refresh token id as spent until `expires_at`; `false` if it
    /// was already spent
    fn revoke_refresh(&self, jti: &str, expires_at: DateTime<Utc>) -> StoreFuture<'_, bool>;

    /// Whether a refresh token id has been spent
    fn is_revoked(&self, jti: &str) -> StoreFuture<'_, bool>;

    /// Forget spent refresh tokens that have expired anyway
    fn purge_revocations(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    by_email: HashMap<String, AccountId>,
    codes: HashMap<AccountId, StoredCode>,
    revoked: HashMap<String, DateTime<Utc>>,
}

impl Tables {
    fn check_code(&mut self, account_id: &AccountId, digest: &str, now: DateTime<Utc>, max_attempts: u32) -> CodeCheck {
        let Some(code) = self.codes.get_mut(account_id) else {
            return CodeCheck::Missing;
        };
        if code.consumed {
            return CodeCheck::Missing;
        }
        if now >= code.expires_at {
            return CodeCheck::Expired;
        }
        if code.failed_attempts >= max_attempts {
            return CodeCheck::Exhausted;
        }
        if constant_time_str_eq(&code.digest, digest) {
            code.consumed = true;
            return CodeCheck::Accepted;
        }
        code.failed_attempts += 1;
        CodeCheck::Mismatch {
            remaining: max_attempts.saturating_sub(code.failed_attempts),
        }
    }

    fn remove_account(&mut self, id: &AccountId) -> bool {
        match self.accounts.remove(id) {
            Some(account) => {
                self.by_email.remove(&account.email);
                self.codes.remove(id);
                true
            }
            None => false,
        }
    }
}

/// In-memory [`IdentityStore`].
///
/// A single lock guards all tables, so every method is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts
    pub fn account_count(&self) -> usize {
        self.tables.read().accounts.len()
    }

    /// Number of stored verification codes, consumed or not
    pub fn code_count(&self) -> usize {
        self.tables.read().codes.len()
    }

    /// Copy of the stored code record for an account
    pub fn code_for(&self, id: &AccountId) -> Option<StoredCode> {
        self.tables.read().codes.get(id).cloned()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryStore")
            .field("accounts", &tables.accounts.len())
            .field("codes", &tables.codes.len())
            .field("revoked", &tables.revoked.len())
            .finish()
    }
}

impl IdentityStore for MemoryStore {
    fn insert_account(&self, account: Account) -> StoreFuture<'_, Account> {
        Box::pin(async move {
            let mut tables = self.tables.write();
            if tables.by_email.contains_key(&account.email) {
                return Err(StoreError::UniqueViolation("email"));
            }
            if tables.accounts.contains_key(&account.id) {
                return Err(StoreError::UniqueViolation("id"));
            }
            tables.by_email.insert(account.email.clone(), account.id.clone());
            tables.accounts.insert(account.id.clone(), account.clone());
            Ok(account)
        })
    }

    fn account_by_id(&self, id: &AccountId) -> StoreFuture<'_, Option<Account>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.tables.read().accounts.get(&id).cloned()) })
    }

    fn account_by_email(&self, email: &str) -> StoreFuture<'_, Option<Account>> {
        let email = email.to_string();
        Box::pin(async move {
            let tables = self.tables.read();
            Ok(tables
                .by_email
                .get(&email)
                .and_then(|id| tables.accounts.get(id))
                .cloned())
        })
    }

    fn mark_verified(&self, id: &AccountId, at: DateTime<Utc>) -> StoreFuture<'_, Option<Account>> {
        let id = id.clone();
        Box::pin(async move {
            let mut tables = self.tables.write();
            Ok(tables.accounts.get_mut(&id).map(|account| {
                if account.status == AccountStatus::Pending {
                    account.status = AccountStatus::Verified;
                    account.verified_at = Some(at);
                }
                account.clone()
            }))
        })
    }

    fn update_profile(&self, id: &AccountId, update: ProfileUpdate) -> StoreFuture<'_, Option<Account>> {
        let id = id.clone();
        Box::pin(async move {
            let mut tables = self.tables.write();
            Ok(tables.accounts.get_mut(&id).map(|account| {
                if let Some(full_name) = update.full_name {
                    account.full_name = full_name;
                }
                if let Some(role) = update.role {
                    account.role = role;
                }
                account.clone()
            }))
        })
    }

    fn delete_account(&self, id: &AccountId) -> StoreFuture<'_, bool> {
        let id = id.clone();
        Box::pin(async move { Ok(self.tables.write().remove_account(&id)) })
    }

    fn delete_if_pending(&self, id: &AccountId, cutoff: DateTime<Utc>) -> StoreFuture<'_, PurgeOutcome> {
        let id = id.clone();
        Box::pin(async move {
            let mut tables = self.tables.write();
            let outcome = match tables.accounts.get(&id) {
                None => PurgeOutcome::Missing,
                Some(account) if account.status == AccountStatus::Verified => PurgeOutcome::SkippedVerified,
                Some(account) if account.created_at >= cutoff => PurgeOutcome::SkippedFresh,
                Some(_) => PurgeOutcome::Purged,
            };
            if outcome == PurgeOutcome::Purged {
                tables.remove_account(&id);
            }
            Ok(outcome)
        })
    }

    fn pending_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<AccountId>> {
        Box::pin(async move {
            let tables = self.tables.read();
            let mut pending: Vec<&Account> = tables
                .accounts
                .values()
                .filter(|a| a.status == AccountStatus::Pending && a.created_at < cutoff)
                .collect();
            pending.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            Ok(pending.into_iter().take(limit).map(|a| a.id.clone()).collect())
        })
    }

    fn list_accounts(&self, skip: usize, limit: usize) -> StoreFuture<'_, Vec<Account>> {
        Box::pin(async move {
            let tables = self.tables.read();
            let mut accounts: Vec<&Account> = tables.accounts.values().collect();
            accounts.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            Ok(accounts.into_iter().skip(skip).take(limit).cloned().collect())
        })
    }

    fn replace_code(&self, code: StoredCode) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.tables.write().codes.insert(code.account_id.clone(), code);
            Ok(())
        })
    }

    fn consume_code(
        &self,
        account_id: &AccountId,
        digest: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> StoreFuture<'_, CodeCheck> {
        let account_id = account_id.clone();
        let digest = digest.to_string();
        Box::pin(async move {
            Ok(self
                .tables
                .write()
                .check_code(&account_id, &digest, now, max_attempts))
        })
    }

    fn redeem_code(
        &self,
        account_id: &AccountId,
        digest: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> StoreFuture<'_, CodeCheck> {
        let account_id = account_id.clone();
        let digest = digest.to_string();
        Box::pin(async move {
            let mut tables = self.tables.write();
            let check = tables.check_code(&account_id, &digest, now, max_attempts);
            if check == CodeCheck::Accepted {
                if let Some(account) = tables.accounts.get_mut(&account_id) {
                    if account.status == AccountStatus::Pending {
                        account.status = AccountStatus::Verified;
                        account.verified_at = Some(now);
                    }
                }
            }
            Ok(check)
        })
    }

    fn purge_codes(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut tables = self.tables.write();
            let before = tables.codes.len();
            tables.codes.retain(|_, code| code.is_live(now));
            Ok(before - tables.codes.len())
        })
    }

    fn revoke_refresh(&self, jti: &str, expires_at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        let jti = jti.to_string();
        Box::pin(async move {
            let mut tables = self.tables.write();
            if tables.revoked.contains_key(&jti) {
                return Ok(false);
            }
            tables.revoked.insert(jti, expires_at);
            Ok(true)
        })
    }

    fn is_revoked(&self, jti: &str) -> StoreFuture<'_, bool> {
        let jti = jti.to_string();
        Box::pin(async move { Ok(self.tables.read().revoked.contains_key(&jti)) })
    }

    fn purge_revocations(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut tables = self.tables.write();
            let before = tables.revoked.len();
            tables.revoked.retain(|_, expires_at| *expires_at > now);
            Ok(before - tables.revoked.len())
        })
    }
}
