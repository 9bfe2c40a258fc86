//! Test doubles for the identity core (SA-11)
//!
//! Available to unit tests and, through the `testing` feature, to
//! integration tests and downstream crates that want to exercise their own
//! wiring against failure modes:
//!
//! - [`FlakyStore`] wraps any [`IdentityStore`] and injects transient
//!   failures, hangs and per-account purge failures
//! - [`FixedCodes`] hands out predetermined verification codes
//! - [`RecordingDelivery`] captures delivered codes instead of sending them
//! - [`check_account_enumeration`] compares the login failures for a known
//!   and an unknown account

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::account::{Account, AccountId, ProfileUpdate};
use crate::crypto::random_digits;
use crate::delivery::{CodeDelivery, DeliveryError, DeliveryFuture};
use crate::error::IdentityError;
use crate::store::{CodeCheck, IdentityStore, PurgeOutcome, StoreError, StoreFuture, StoredCode};
use crate::verification::CodeSource;

// ============================================================================
// Fault-injecting store
// ============================================================================

/// Kind of failure [`FlakyStore`] injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Return `StoreError::Unavailable`
    Unavailable,
    /// Return `StoreError::Timeout`
    Timeout,
    /// Never complete
    Hang,
}

type ScanFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type ScanHook = Arc<dyn Fn(Vec<AccountId>) -> ScanFuture + Send + Sync>;

/// Store wrapper that fails on demand.
pub struct FlakyStore<S> {
    inner: S,
    calls: AtomicU32,
    pending_faults: AtomicU32,
    fault: Mutex<StoreFault>,
    operation_faults: Mutex<HashMap<&'static str, (u32, StoreFault)>>,
    failing_purges: Mutex<HashSet<AccountId>>,
    pending_scan_hook: Mutex<Option<ScanHook>>,
}

impl<S: IdentityStore> FlakyStore<S> {
    /// Wrap `inner`; no faults are armed
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
            pending_faults: AtomicU32::new(0),
            fault: Mutex::new(StoreFault::Unavailable),
            operation_faults: Mutex::new(HashMap::new()),
            failing_purges: Mutex::new(HashSet::new()),
            pending_scan_hook: Mutex::new(None),
        }
    }

    /// Fail the next `count` calls with `fault`
    pub fn fail_next(&self, count: u32, fault: StoreFault) {
        *self.fault.lock() = fault;
        self.pending_faults.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` calls of one store method, named as on
    /// [`IdentityStore`] (e.g. `"account_by_id"`), with `fault`
    pub fn fail_operation(&self, operation: &'static str, count: u32, fault: StoreFault) {
        let mut faults = self.operation_faults.lock();
        if count == 0 {
            faults.remove(operation);
        } else {
            faults.insert(operation, (count, fault));
        }
    }

    /// Make every conditional purge of `id` fail with `Unavailable`
    pub fn fail_purge_for(&self, id: &AccountId) {
        self.failing_purges.lock().insert(id.clone());
    }

    /// Run `hook` with the scan result every time pending accounts are
    /// listed, before the result is returned to the caller
    pub fn on_pending_scan<F, Fut>(&self, hook: F)
    where
        F: Fn(Vec<AccountId>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ScanHook = Arc::new(move |ids: Vec<AccountId>| -> ScanFuture { Box::pin(hook(ids)) });
        *self.pending_scan_hook.lock() = Some(hook);
    }

    /// Number of calls made so far, including failed ones
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn take_fault(&self, operation: &'static str) -> Option<StoreFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut targeted = self.operation_faults.lock();
        if let Some((remaining, fault)) = targeted.get_mut(operation) {
            let fault = *fault;
            *remaining -= 1;
            if *remaining == 0 {
                targeted.remove(operation);
            }
            return Some(fault);
        }
        drop(targeted);

        self.pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| *self.fault.lock())
    }

    fn gate<'a, T: Send + 'a>(
        &'a self,
        operation: &'static str,
        call: impl FnOnce() -> StoreFuture<'a, T>,
    ) -> StoreFuture<'a, T> {
        match self.take_fault(operation) {
            Some(fault) => Box::pin(async move {
                match fault {
                    StoreFault::Unavailable => Err(StoreError::Unavailable("injected fault".into())),
                    StoreFault::Timeout => Err(StoreError::Timeout),
                    StoreFault::Hang => std::future::pending().await,
                }
            }),
            None => call(),
        }
    }
}

impl<S: IdentityStore> IdentityStore for FlakyStore<S> {
    fn insert_account(&self, account: Account) -> StoreFuture<'_, Account> {
        self.gate("insert_account", || self.inner.insert_account(account))
    }

    fn account_by_id(&self, id: &AccountId) -> StoreFuture<'_, Option<Account>> {
        let id = id.clone();
        self.gate("account_by_id", move || {
            Box::pin(async move { self.inner.account_by_id(&id).await })
        })
    }

    fn account_by_email(&self, email: &str) -> StoreFuture<'_, Option<Account>> {
        let email = email.to_string();
        self.gate("account_by_email", move || {
            Box::pin(async move { self.inner.account_by_email(&email).await })
        })
    }

    fn mark_verified(&self, id: &AccountId, at: DateTime<Utc>) -> StoreFuture<'_, Option<Account>> {
        let id = id.clone();
        self.gate("mark_verified", move || {
            Box::pin(async move { self.inner.mark_verified(&id, at).await })
        })
    }

    fn update_profile(&self, id: &AccountId, update: ProfileUpdate) -> StoreFuture<'_, Option<Account>> {
        let id = id.clone();
        self.gate("update_profile", move || {
            Box::pin(async move { self.inner.update_profile(&id, update).await })
        })
    }

    fn delete_account(&self, id: &AccountId) -> StoreFuture<'_, bool> {
        let id = id.clone();
        self.gate("delete_account", move || {
            Box::pin(async move { self.inner.delete_account(&id).await })
        })
    }

    fn delete_if_pending(&self, id: &AccountId, cutoff: DateTime<Utc>) -> StoreFuture<'_, PurgeOutcome> {
        let id = id.clone();
        let refuse = self.failing_purges.lock().contains(&id);
        self.gate("delete_if_pending", move || {
            Box::pin(async move {
                if refuse {
                    return Err(StoreError::Unavailable(format!("purge of {} refused", id)));
                }
                self.inner.delete_if_pending(&id, cutoff).await
            })
        })
    }

    fn pending_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<AccountId>> {
        self.gate("pending_before", move || {
            Box::pin(async move {
                let ids = self.inner.pending_before(cutoff, limit).await?;
                let hook = self.pending_scan_hook.lock().clone();
                if let Some(hook) = hook {
                    hook(ids.clone()).await;
                }
                Ok(ids)
            })
        })
    }

    fn list_accounts(&self, skip: usize, limit: usize) -> StoreFuture<'_, Vec<Account>> {
        self.gate("list_accounts", || self.inner.list_accounts(skip, limit))
    }

    fn replace_code(&self, code: StoredCode) -> StoreFuture<'_, ()> {
        self.gate("replace_code", || self.inner.replace_code(code))
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
        self.gate("consume_code", move || {
            Box::pin(async move {
                self.inner
                    .consume_code(&account_id, &digest, now, max_attempts)
                    .await
            })
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
        self.gate("redeem_code", move || {
            Box::pin(async move {
                self.inner
                    .redeem_code(&account_id, &digest, now, max_attempts)
                    .await
            })
        })
    }

    fn purge_codes(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        self.gate("purge_codes", || self.inner.purge_codes(now))
    }

    fn revoke_refresh(&self, jti: &str, expires_at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        let jti = jti.to_string();
        self.gate("revoke_refresh", move || {
            Box::pin(async move { self.inner.revoke_refresh(&jti, expires_at).await })
        })
    }

    fn is_revoked(&self, jti: &str) -> StoreFuture<'_, bool> {
        let jti = jti.to_string();
        self.gate("is_revoked", move || Box::pin(async move { self.inner.is_revoked(&jti).await }))
    }

    fn purge_revocations(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        self.gate("purge_revocations", || self.inner.purge_revocations(now))
    }
}

// ============================================================================
// Deterministic codes
// ============================================================================

/// Code source that returns predetermined values in order.
///
/// Once the list is exhausted the last value repeats. An empty list falls
/// back to random digits.
#[derive(Debug)]
pub struct FixedCodes {
    codes: Vec<String>,
    next: Mutex<usize>,
}

impl FixedCodes {
    pub fn new(codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
            next: Mutex::new(0),
        }
    }
}

impl CodeSource for FixedCodes {
    fn generate(&self, length: usize) -> String {
        let mut next = self.next.lock();
        let code = match self.codes.get(*next).or_else(|| self.codes.last()) {
            Some(code) => code.clone(),
            None => return random_digits(length),
        };
        *next += 1;
        code
    }
}

// ============================================================================
// Recording delivery
// ============================================================================

/// Delivery that keeps every `(address, code)` it is handed.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
    failing: bool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record deliveries but report each one as failed
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Every delivery attempt so far, oldest first
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// The most recent code handed over for `address`
    pub fn last_code_for(&self, address: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|(to, _)| to == address)
            .map(|(_, code)| code.clone())
    }
}

impl CodeDelivery for RecordingDelivery {
    fn deliver(&self, address: &str, code: &str) -> DeliveryFuture<'_> {
        self.sent.lock().push((address.to_string(), code.to_string()));
        let failing = self.failing;
        Box::pin(async move {
            if failing {
                Err(DeliveryError::Failed("recording delivery set to fail".into()))
            } else {
                Ok(())
            }
        })
    }
}

// ============================================================================
// Account enumeration check
// ============================================================================

/// Result of an account enumeration check
#[derive(Debug, Clone)]
pub struct EnumerationResult {
    /// Whether the two failures can be told apart
    pub vulnerable: bool,
    /// Specific differences found
    pub issues: Vec<String>,
}

/// Compare the failure for a known account with the one for an unknown
/// account. Error code, status, public message and a timing gap above
/// `max_timing_gap` all count as leaks.
pub fn check_account_enumeration(
    known: &IdentityError,
    unknown: &IdentityError,
    known_timing: Duration,
    unknown_timing: Duration,
    max_timing_gap: Duration,
) -> EnumerationResult {
    let mut issues = Vec::new();

    if known.code() != unknown.code() {
        issues.push(format!("Different error codes: {} vs {}", known.code(), unknown.code()));
    }
    if known.kind().status_code() != unknown.kind().status_code() {
        issues.push("Different status codes for known vs unknown accounts".to_string());
    }
    if known.public_message() != unknown.public_message() {
        issues.push("Different error messages for known vs unknown accounts".to_string());
    }

    let gap = if known_timing > unknown_timing {
        known_timing - unknown_timing
    } else {
        unknown_timing - known_timing
    };
    if gap > max_timing_gap {
        issues.push(format!("Timing difference of {:?} between known and unknown accounts", gap));
    }

    EnumerationResult {
        vulnerable: !issues.is_empty(),
        issues,
    }
}

/// Common weak passwords for testing password policy
pub fn weak_passwords() -> Vec<&'static str> {
    vec![
        "password", "123456", "12345678", "qwerty", "abc123", "password1", "letmein", "welcome",
        "iloveyou", "trustno1",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_flaky_store_recovers_after_faults() {
        let store = FlakyStore::new(MemoryStore::new());
        store.fail_next(1, StoreFault::Timeout);

        let id = AccountId::from("1");
        assert_eq!(store.account_by_id(&id).await, Err(StoreError::Timeout));
        assert_eq!(store.account_by_id(&id).await, Ok(None));
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_fail_operation_targets_one_method() {
        let store = FlakyStore::new(MemoryStore::new());
        store.fail_operation("account_by_id", 2, StoreFault::Unavailable);

        let id = AccountId::from("1");
        assert_eq!(store.account_by_email("a@x.com").await, Ok(None));
        assert!(store.account_by_id(&id).await.is_err());
        assert!(store.account_by_id(&id).await.is_err());
        assert_eq!(store.account_by_id(&id).await, Ok(None));
    }

    #[tokio::test]
    async fn test_fail_purge_for_targets_one_account() {
        let store = FlakyStore::new(MemoryStore::new());
        let now = Utc::now();
        let a = store
            .insert_account(Account::pending("a@x.com".into(), "h".into(), None, now))
            .await
            .unwrap();
        store.fail_purge_for(&a.id);

        let cutoff = now + chrono::Duration::seconds(1);
        assert!(store.delete_if_pending(&a.id, cutoff).await.is_err());
        assert_eq!(
            store.delete_if_pending(&AccountId::from("other"), cutoff).await,
            Ok(PurgeOutcome::Missing)
        );
    }

    #[test]
    fn test_fixed_codes_repeat_last() {
        let codes = FixedCodes::new(["111111", "222222"]);
        assert_eq!(codes.generate(6), "111111");
        assert_eq!(codes.generate(6), "222222");
        assert_eq!(codes.generate(6), "222222");
        assert_eq!(FixedCodes::new(Vec::<String>::new()).generate(8).len(), 8);
    }

    #[tokio::test]
    async fn test_recording_delivery() {
        let delivery = RecordingDelivery::new();
        delivery.deliver("a@x.com", "111111").await.unwrap();
        delivery.deliver("a@x.com", "222222").await.unwrap();
        assert_eq!(delivery.last_code_for("a@x.com").as_deref(), Some("222222"));
        assert_eq!(delivery.sent().len(), 2);

        let failing = RecordingDelivery::failing();
        assert!(failing.deliver("a@x.com", "1").await.is_err());
        assert_eq!(failing.sent().len(), 1);
    }

    #[test]
    fn test_enumeration_check() {
        let same = check_account_enumeration(
            &IdentityError::InvalidCredentials,
            &IdentityError::InvalidCredentials,
            Duration::from_millis(40),
            Duration::from_millis(45),
            Duration::from_millis(100),
        );
        assert!(!same.vulnerable);

        let leaky = check_account_enumeration(
            &IdentityError::InvalidCredentials,
            &IdentityError::NotFound,
            Duration::from_millis(200),
            Duration::from_millis(1),
            Duration::from_millis(100),
        );
        assert!(leaky.vulnerable);
        assert_eq!(leaky.issues.len(), 4);
    }
}
