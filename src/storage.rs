//! Bounded storage calls (SC-5, SI-11)
//!
//! Every store call made by the identity core goes through a
//! [`StorageGuard`]. The guard puts a deadline on each attempt and retries
//! transient failures of idempotent operations a bounded number of times
//! with linear backoff. Operations whose replay could double-apply a write
//! (account insert, code replacement, code consumption, refresh revocation)
//! use [`StorageGuard::once`] and are never retried.
//!
//! When the budget is exhausted the failure surfaces as
//! [`IdentityError::TransientStorage`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::IdentityConfig;
use crate::error::IdentityError;
use crate::observability::{security_event, SecurityEvent};
use crate::store::{IdentityStore, StoreError, StoreFuture};

/// Default pause before the first retry; later retries wait proportionally longer.
const DEFAULT_BACKOFF: Duration = Duration::from_millis(25);

/// Timeout and retry policy wrapped around an [`IdentityStore`].
#[derive(Clone)]
pub struct StorageGuard {
    store: Arc<dyn IdentityStore>,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl StorageGuard {
    /// Wrap a store with the configured timeout and retry count
    pub fn new(store: Arc<dyn IdentityStore>, config: &IdentityConfig) -> Self {
        Self {
            store,
            timeout: config.storage_timeout,
            retries: config.storage_retries,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Override the base backoff between retries
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run an idempotent operation with timeout and bounded retries.
    pub async fn idempotent<T, F>(&self, operation: &'static str, call: F) -> Result<T, IdentityError>
    where
        F: for<'a> Fn(&'a dyn IdentityStore) -> StoreFuture<'a, T>,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&call).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(operation, attempt, error = %err, "Transient storage failure, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(err) => return Err(self.surface(operation, err)),
            }
        }
    }

    /// Run a non-idempotent operation exactly once, with a timeout.
    pub async fn once<T, F>(&self, operation: &'static str, call: F) -> Result<T, IdentityError>
    where
        F: for<'a> FnOnce(&'a dyn IdentityStore) -> StoreFuture<'a, T>,
    {
        match tokio::time::timeout(self.timeout, call(self.store.as_ref())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.surface(operation, err)),
            Err(_) => Err(self.surface(operation, StoreError::Timeout)),
        }
    }

    async fn attempt<T, F>(&self, call: &F) -> Result<T, StoreError>
    where
        F: for<'a> Fn(&'a dyn IdentityStore) -> StoreFuture<'a, T>,
    {
        tokio::time::timeout(self.timeout, call(self.store.as_ref()))
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    fn surface(&self, operation: &'static str, err: StoreError) -> IdentityError {
        if err.is_transient() {
            security_event!(
                SecurityEvent::StorageUnavailable,
                operation,
                error = %err,
                "Storage unavailable after retries"
            );
        }
        err.into()
    }
}

impl std::fmt::Debug for StorageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageGuard")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountId};
    use crate::store::MemoryStore;
    use crate::testing::{FlakyStore, StoreFault};
    use chrono::Utc;

    const SECRET: &str = "kT9vQ2xLr7WmZp4sNc8YbHd3JfUe6Ga1";

    fn guard(store: Arc<dyn IdentityStore>, timeout: Duration, retries: u32) -> StorageGuard {
        let config = IdentityConfig::builder()
            .signing_secret(SECRET)
            .storage(timeout, retries)
            .build()
            .unwrap();
        StorageGuard::new(store, &config).with_backoff(Duration::from_millis(1))
    }

    fn account() -> Account {
        Account::pending("a@x.com".into(), "$argon2id$h".into(), None, Utc::now())
    }

    #[tokio::test]
    async fn test_idempotent_retries_transient_failures() {
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        flaky.fail_next(2, StoreFault::Unavailable);
        let guard = guard(flaky.clone(), Duration::from_secs(1), 2);

        let id = AccountId::from("missing");
        let found = guard.idempotent("account_by_id", |s| s.account_by_id(&id)).await.unwrap();
        assert!(found.is_none());
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_idempotent_gives_up_after_budget() {
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        flaky.fail_next(10, StoreFault::Unavailable);
        let guard = guard(flaky.clone(), Duration::from_secs(1), 2);

        let id = AccountId::from("missing");
        let err = guard.idempotent("account_by_id", |s| s.account_by_id(&id)).await.unwrap_err();
        assert!(matches!(err, IdentityError::TransientStorage(_)));
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_once_never_retries() {
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        flaky.fail_next(1, StoreFault::Unavailable);
        let guard = guard(flaky.clone(), Duration::from_secs(1), 5);

        let err = guard.once("insert_account", |s| s.insert_account(account())).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(flaky.calls(), 1);
        assert_eq!(flaky.inner().account_count(), 0);
    }

    #[tokio::test]
    async fn test_unique_violation_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(store.clone(), Duration::from_secs(1), 3);

        guard.once("insert_account", |s| s.insert_account(account())).await.unwrap();
        let err = guard.once("insert_account", |s| s.insert_account(account())).await.unwrap_err();
        assert_eq!(err, IdentityError::DuplicateEmail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_store_times_out() {
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        flaky.fail_next(u32::MAX, StoreFault::Hang);
        let guard = guard(flaky.clone(), Duration::from_millis(50), 1);

        let id = AccountId::from("42");
        let err = guard.idempotent("account_by_id", |s| s.account_by_id(&id)).await.unwrap_err();
        assert!(matches!(err, IdentityError::TransientStorage(msg) if msg.contains("timed out")));
        assert_eq!(flaky.calls(), 2);
    }
}
