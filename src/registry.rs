//! Account registry (IA-4, AC-2)
//!
//! The registry is the only component that creates, transitions, changes
//! or removes [`Account`] records. It enforces:
//!
//! - email uniqueness, via the store's atomic check-and-insert
//! - the one-way `Pending -> Verified` transition
//! - field-level mutation rights: `email` and `status` are never writable
//!   through a profile update, `role` only by an admin on another account
//! - cleanup deletes only accounts that are still pending, re-checked in
//!   the same atomic unit as the delete

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::account::{normalize_email, parse_email, Account, AccountId, ProfileUpdate, Role};
use crate::clock::Clock;
use crate::error::IdentityError;
use crate::guard::AuthorizationGuard;
use crate::storage::StorageGuard;
use crate::store::PurgeOutcome;
use crate::token::TokenClaims;

/// Largest page `list_page` returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Longest accepted display name, in characters.
pub const MAX_FULL_NAME_LENGTH: usize = 100;

/// Owner of account records and their lifecycle.
pub struct AccountRegistry {
    storage: StorageGuard,
    clock: Arc<dyn Clock>,
}

impl AccountRegistry {
    pub fn new(storage: StorageGuard, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Create a pending account with role `User`.
    ///
    /// Fails with [`IdentityError::DuplicateEmail`] when the normalized
    /// email is taken, including by a concurrent registration.
    pub async fn register(
        &self,
        email: &str,
        password_hash: String,
        full_name: Option<String>,
    ) -> Result<Account, IdentityError> {
        let email = parse_email(email)?;
        let full_name = clean_full_name(full_name)?;
        let account = Account::pending(email, password_hash, full_name, self.clock.now());

        self.storage
            .once("insert_account", move |s| s.insert_account(account))
            .await
    }

    /// Transition to `Verified`. Calling it again leaves `verified_at` untouched.
    pub async fn mark_verified(&self, id: &AccountId) -> Result<Account, IdentityError> {
        let now = self.clock.now();
        self.storage
            .idempotent("mark_verified", |s| s.mark_verified(id, now))
            .await?
            .ok_or(IdentityError::NotFound)
    }

    /// Look up by email (normalized before lookup)
    pub async fn find_by_email(&self, email: &str) -> Result<Account, IdentityError> {
        let email = normalize_email(email);
        self.storage
            .idempotent("account_by_email", |s| s.account_by_email(&email))
            .await?
            .ok_or(IdentityError::NotFound)
    }

    /// Look up by id
    pub async fn find_by_id(&self, id: &AccountId) -> Result<Account, IdentityError> {
        self.storage
            .idempotent("account_by_id", |s| s.account_by_id(id))
            .await?
            .ok_or(IdentityError::NotFound)
    }

    /// Refuse token issuance for accounts that have not proven their email.
    pub fn authenticate_gate(account: &Account) -> Result<(), IdentityError> {
        if account.is_verified() {
            Ok(())
        } else {
            Err(IdentityError::UnverifiedAccount)
        }
    }

    /// Apply a profile update on behalf of `actor`.
    ///
    /// Authorization is checked here as well as by the caller: a non-admin
    /// may only touch its own account, and `role` needs
    /// [`AuthorizationGuard::authorize_role_change`].
    pub async fn update_profile(
        &self,
        actor: &TokenClaims,
        id: &AccountId,
        update: ProfileUpdate,
    ) -> Result<Account, IdentityError> {
        AuthorizationGuard::authorize(actor, Role::Admin, Some(id))?;
        if update.role.is_some() {
            AuthorizationGuard::authorize_role_change(actor, id)?;
        }

        let update = ProfileUpdate {
            full_name: match update.full_name {
                Some(name) => Some(clean_full_name(name)?),
                None => None,
            },
            role: update.role,
        };

        if update.is_empty() {
            return self.find_by_id(id).await;
        }

        self.storage
            .idempotent("update_profile", |s| s.update_profile(id, update.clone()))
            .await?
            .ok_or(IdentityError::NotFound)
    }

    /// Remove an account and its verification codes.
    pub async fn delete(&self, id: &AccountId) -> Result<(), IdentityError> {
        let deleted = self
            .storage
            .idempotent("delete_account", |s| s.delete_account(id))
            .await?;
        if deleted {
            Ok(())
        } else {
            Err(IdentityError::NotFound)
        }
    }

    /// Page of accounts ordered by `(created_at, id)`.
    ///
    /// `limit` is capped at [`MAX_PAGE_SIZE`]; a zero limit is rejected.
    pub async fn list_page(&self, skip: usize, limit: usize) -> Result<Vec<Account>, IdentityError> {
        if limit == 0 {
            return Err(IdentityError::Validation("limit must be at least 1".into()));
        }
        let limit = limit.min(MAX_PAGE_SIZE);
        self.storage
            .idempotent("list_accounts", |s| s.list_accounts(skip, limit))
            .await
    }

    /// Pending accounts created strictly before `cutoff`, oldest first
    pub async fn pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AccountId>, IdentityError> {
        self.storage
            .idempotent("pending_before", |s| s.pending_before(cutoff, limit))
            .await
    }

    /// Delete `id` only if it is still pending and older than `cutoff`.
    pub async fn purge_if_pending(
        &self,
        id: &AccountId,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeOutcome, IdentityError> {
        self.storage
            .idempotent("delete_if_pending", |s| s.delete_if_pending(id, cutoff))
            .await
    }
}

impl std::fmt::Debug for AccountRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRegistry")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Trim a display name; blank becomes `None`.
fn clean_full_name(name: Option<String>) -> Result<Option<String>, IdentityError> {
    let Some(name) = name else {
        return Ok(None);
    };
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_FULL_NAME_LENGTH {
        return Err(IdentityError::Validation(format!(
            "full name must be at most {} characters",
            MAX_FULL_NAME_LENGTH
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(IdentityError::Validation("full name contains control characters".into()));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountStatus;
    use crate::clock::ManualClock;
    use crate::config::IdentityConfig;
    use crate::store::{IdentityStore, MemoryStore};
    use crate::token::TokenType;
    use chrono::Duration;

    const SECRET: &str = "kT9vQ2xLr7WmZp4sNc8YbHd3JfUe6Ga1";

    fn registry() -> (Arc<AccountRegistry>, ManualClock) {
        let config = IdentityConfig::builder().signing_secret(SECRET).build().unwrap();
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let clock = ManualClock::starting_now();
        let registry = AccountRegistry::new(StorageGuard::new(store, &config), Arc::new(clock.clone()));
        (Arc::new(registry), clock)
    }

    fn claims(sub: &AccountId, role: Role) -> TokenClaims {
        TokenClaims {
            sub: sub.clone(),
            role,
            typ: TokenType::Access,
            iat: 0,
            exp: i64::MAX,
            jti: "jti".into(),
        }
    }

    #[tokio::test]
    async fn test_register_creates_pending_user() {
        let (registry, clock) = registry();
        let account = registry
            .register("  A@X.com ", "$argon2id$h".into(), Some(" Ada ".into()))
            .await
            .unwrap();

        assert_eq!(account.email, "a@x.com");
        assert_eq!(account.status, AccountStatus::Pending);
        assert_eq!(account.role, Role::User);
        assert_eq!(account.full_name.as_deref(), Some("Ada"));
        assert_eq!(account.created_at, clock.now());
        assert!(account.verified_at.is_none());
    }

    #[tokio::test]
    async fn test_register_duplicate_email_case_insensitive() {
        let (registry, _) = registry();
        registry.register("a@x.com", "h".into(), None).await.unwrap();
        assert_eq!(
            registry.register("A@X.COM", "h".into(), None).await.unwrap_err(),
            IdentityError::DuplicateEmail
        );
    }

    #[tokio::test]
    async fn test_register_rejects_bad_email() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.register("not-an-email", "h".into(), None).await,
            Err(IdentityError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_verified_idempotent() {
        let (registry, clock) = registry();
        let account = registry.register("a@x.com", "h".into(), None).await.unwrap();

        let first = registry.mark_verified(&account.id).await.unwrap();
        clock.advance(Duration::minutes(10));
        let second = registry.mark_verified(&account.id).await.unwrap();

        assert_eq!(first.status, AccountStatus::Verified);
        assert!(first.verified_at.is_some());
        assert_eq!(first.verified_at, second.verified_at);
    }

    #[tokio::test]
    async fn test_mark_verified_missing() {
        let (registry, _) = registry();
        assert_eq!(
            registry.mark_verified(&AccountId::from("nope")).await.unwrap_err(),
            IdentityError::NotFound
        );
    }

    #[tokio::test]
    async fn test_authenticate_gate() {
        let (registry, _) = registry();
        let account = registry.register("a@x.com", "h".into(), None).await.unwrap();
        assert_eq!(
            AccountRegistry::authenticate_gate(&account),
            Err(IdentityError::UnverifiedAccount)
        );
        let account = registry.mark_verified(&account.id).await.unwrap();
        assert!(AccountRegistry::authenticate_gate(&account).is_ok());
    }

    #[tokio::test]
    async fn test_find() {
        let (registry, _) = registry();
        let account = registry.register("a@x.com", "h".into(), None).await.unwrap();
        assert_eq!(registry.find_by_email("A@x.com").await.unwrap().id, account.id);
        assert_eq!(registry.find_by_id(&account.id).await.unwrap().email, "a@x.com");
        assert_eq!(registry.find_by_email("b@x.com").await.unwrap_err(), IdentityError::NotFound);
    }

    #[tokio::test]
    async fn test_update_profile_permissions() {
        let (registry, _) = registry();
        let user = registry.register("u@x.com", "h".into(), None).await.unwrap();
        let other = registry.register("o@x.com", "h".into(), None).await.unwrap();
        let admin_id = AccountId::from("admin");

        // Owner may rename
        let updated = registry
            .update_profile(&claims(&user.id, Role::User), &user.id, ProfileUpdate::full_name("Ursula"))
            .await
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Ursula"));

        // Owner may not change own role
        assert_eq!(
            registry
                .update_profile(&claims(&user.id, Role::User), &user.id, ProfileUpdate::role(Role::Admin))
                .await
                .unwrap_err(),
            IdentityError::InsufficientRole
        );

        // User may not touch another account
        assert_eq!(
            registry
                .update_profile(&claims(&user.id, Role::User), &other.id, ProfileUpdate::full_name("X"))
                .await
                .unwrap_err(),
            IdentityError::InsufficientRole
        );

        // Admin may change another account's role
        let promoted = registry
            .update_profile(&claims(&admin_id, Role::Admin), &other.id, ProfileUpdate::role(Role::Admin))
            .await
            .unwrap();
        assert_eq!(promoted.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_update_profile_clears_blank_name() {
        let (registry, _) = registry();
        let user = registry.register("u@x.com", "h".into(), Some("Ursula".into())).await.unwrap();
        let update = ProfileUpdate {
            full_name: Some(Some("   ".into())),
            role: None,
        };
        let updated = registry
            .update_profile(&claims(&user.id, Role::User), &user.id, update)
            .await
            .unwrap();
        assert!(updated.full_name.is_none());
    }

    #[tokio::test]
    async fn test_update_profile_missing_account() {
        let (registry, _) = registry();
        let admin = claims(&AccountId::from("admin"), Role::Admin);
        assert_eq!(
            registry
                .update_profile(&admin, &AccountId::from("ghost"), ProfileUpdate::full_name("X"))
                .await
                .unwrap_err(),
            IdentityError::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let (registry, _) = registry();
        let account = registry.register("a@x.com", "h".into(), None).await.unwrap();
        registry.delete(&account.id).await.unwrap();
        assert_eq!(registry.delete(&account.id).await.unwrap_err(), IdentityError::NotFound);
        // Email is free again
        registry.register("a@x.com", "h".into(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_page_limits() {
        let (registry, clock) = registry();
        for i in 0..5 {
            registry.register(&format!("u{i}@x.com"), "h".into(), None).await.unwrap();
            clock.advance(Duration::seconds(1));
        }

        let page = registry.list_page(1, 2).await.unwrap();
        let emails: Vec<&str> = page.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, ["u1@x.com", "u2@x.com"]);

        assert!(matches!(registry.list_page(0, 0).await, Err(IdentityError::Validation(_))));
        assert_eq!(registry.list_page(0, 10_000).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_purge_if_pending_skips_verified() {
        let (registry, clock) = registry();
        let account = registry.register("a@x.com", "h".into(), None).await.unwrap();
        clock.advance(Duration::days(3));
        let cutoff = clock.now() - Duration::days(2);

        assert_eq!(registry.pending_before(cutoff, 10).await.unwrap(), vec![account.id.clone()]);
        registry.mark_verified(&account.id).await.unwrap();

        assert_eq!(
            registry.purge_if_pending(&account.id, cutoff).await.unwrap(),
            PurgeOutcome::SkippedVerified
        );
        assert!(registry.find_by_id(&account.id).await.is_ok());
    }

    #[test]
    fn test_clean_full_name() {
        assert_eq!(clean_full_name(None).unwrap(), None);
        assert_eq!(clean_full_name(Some("  ".into())).unwrap(), None);
        assert_eq!(clean_full_name(Some(" Ada ".into())).unwrap().as_deref(), Some("Ada"));
        assert!(clean_full_name(Some("x".repeat(101))).is_err());
        assert!(clean_full_name(Some("a\u{0}b".into())).is_err());
    }
}
