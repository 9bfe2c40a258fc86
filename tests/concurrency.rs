//! Concurrency integration tests.
//!
//! Many tasks race on the same email, code or refresh token; exactly one
//! of them may win.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{TestHarness, CODE, PASSWORD};
use portcullis::IdentityError;

const TASKS: usize = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_registration_single_winner() {
    let h = TestHarness::new();

    let mut handles = Vec::with_capacity(TASKS);
    for i in 0..TASKS {
        let service = h.service.clone();
        // Same address after normalization
        let email = if i % 2 == 0 { "race@x.com" } else { " RACE@X.com" };
        handles.push(tokio::spawn(async move { service.register(email, PASSWORD, None).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e, IdentityError::DuplicateEmail),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(h.store.inner().account_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_verification_single_winner() {
    let h = TestHarness::new();
    h.service.register("a@x.com", PASSWORD, None).await.unwrap();

    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move { service.verify("a@x.com", CODE).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(e) => assert_eq!(e, IdentityError::InvalidOrExpiredCode),
        }
    }

    assert_eq!(winners, 1);
    assert!(h.service.login("a@x.com", PASSWORD).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_refresh_single_winner() {
    let h = TestHarness::new();
    let (_, tokens) = h.verified_account("a@x.com").await;

    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let service = h.service.clone();
        let refresh_token = tokens.refresh_token.clone();
        handles.push(tokio::spawn(async move { service.refresh(&refresh_token).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e, IdentityError::InvalidToken),
        }
    }

    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_token_validation_in_parallel() {
    let h = TestHarness::new();
    let (profile, tokens) = h.verified_account("a@x.com").await;

    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let service = h.service.clone();
        let access_token = tokens.access_token.clone();
        handles.push(tokio::spawn(async move { service.authenticate(&access_token) }));
    }

    for handle in handles {
        let claims = handle.await.unwrap().unwrap();
        assert_eq!(claims.sub, profile.id);
    }
}
