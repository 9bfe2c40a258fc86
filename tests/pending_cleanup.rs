//! Pending-account cleanup integration tests.
//!
//! - Pending accounts older than the TTL are removed with their codes
//! - Verified accounts are never removed
//! - A verification that lands between the scan and the delete wins

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{TestHarness, CODE, PASSWORD};
use portcullis::testing::StoreFault;
use portcullis::{AccountId, IdentityError};

fn two_day_ttl() -> TestHarness {
    TestHarness::with_config(|b| b.pending_account_ttl(Duration::from_secs(2 * 24 * 3600)))
}

#[tokio::test]
async fn test_pending_account_lifecycle_across_sweeps() {
    let h = two_day_ttl();
    let registration = h.service.register("a@x.com", PASSWORD, None).await.unwrap();
    let id = registration.account.id;
    let scheduler = h.service.cleanup_scheduler();

    h.clock.advance(chrono::Duration::days(1));
    let report = scheduler.sweep().await;
    assert_eq!(report.purged, 0);
    let account = h.service.registry().find_by_id(&id).await.unwrap();
    assert!(!account.is_verified());

    h.clock.advance(chrono::Duration::days(2));
    let report = scheduler.sweep().await;
    assert_eq!(report.purged, 1);
    assert_eq!(
        h.service.registry().find_by_id(&id).await.unwrap_err(),
        IdentityError::NotFound
    );
    assert_eq!(h.store.inner().code_count(), 0);

    // The address is free again
    h.service.register("a@x.com", PASSWORD, None).await.unwrap();
}

#[tokio::test]
async fn test_verified_account_outlives_ttl() {
    let h = two_day_ttl();
    let (profile, _) = h.verified_account("a@x.com").await;

    h.clock.advance(chrono::Duration::days(10));
    let report = h.service.cleanup_scheduler().sweep().await;
    assert_eq!(report.purged, 0);
    assert!(h.service.registry().find_by_id(&profile.id).await.is_ok());
}

#[tokio::test]
async fn test_verification_during_sweep_keeps_account() {
    let h = two_day_ttl();
    h.service.register("a@x.com", PASSWORD, None).await.unwrap();

    // The account holder asks for a fresh code and redeems it after the
    // sweep has listed the account but before it deletes it
    let service = h.service.clone();
    h.store.on_pending_scan(move |_ids: Vec<AccountId>| {
        let service = service.clone();
        async move {
            service.resend_verification("a@x.com").await.unwrap();
            service.verify("a@x.com", CODE).await.unwrap();
        }
    });

    h.clock.advance(chrono::Duration::days(3));
    let report = h.service.cleanup_scheduler().sweep().await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.purged, 0);
    assert_eq!(report.skipped, 1);

    assert!(h.service.login("a@x.com", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn test_sweep_survives_storage_outage() {
    let h = TestHarness::with_config(|b| {
        b.pending_account_ttl(Duration::from_secs(3600))
            .storage(Duration::from_secs(1), 0)
    });
    h.service.register("a@x.com", PASSWORD, None).await.unwrap();
    h.clock.advance(chrono::Duration::hours(2));

    let scheduler = h.service.cleanup_scheduler();
    h.store.fail_next(3, StoreFault::Unavailable);
    let report = scheduler.sweep().await;
    assert_eq!(report.purged, 0);
    assert_eq!(report.failed, 3);

    let report = scheduler.sweep().await;
    assert_eq!(report.purged, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_until_shutdown() {
    let h = two_day_ttl();
    let registration = h.service.register("a@x.com", PASSWORD, None).await.unwrap();
    h.clock.advance(chrono::Duration::days(3));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = h.service.cleanup_scheduler().start(shutdown_rx);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        h.service.registry().find_by_id(&registration.account.id).await.unwrap_err(),
        IdentityError::NotFound
    );

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
