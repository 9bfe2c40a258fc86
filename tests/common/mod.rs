//! Test harness for identity flow integration tests.
//!
//! Builds an [`IdentityService`] over a fault-injecting in-memory store, a
//! manual clock, a recording delivery channel and fixed verification codes
//! (every code is `555111`).

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use portcullis::testing::{FixedCodes, FlakyStore, RecordingDelivery};
use portcullis::{
    AccountId, AccountProfile, CredentialStore, IdentityConfig, IdentityConfigBuilder, IdentityService,
    IdentityStore, ManualClock, MemoryStore, ProfileUpdate, Role, TokenPair,
};

pub const SECRET: &str = "kT9vQ2xLr7WmZp4sNc8YbHd3JfUe6Ga1";
pub const PASSWORD: &str = "pw123456";
pub const CODE: &str = "555111";

/// A service plus handles on its collaborators.
pub struct TestHarness {
    pub service: Arc<IdentityService>,
    pub store: Arc<FlakyStore<MemoryStore>>,
    pub clock: ManualClock,
    pub delivery: Arc<RecordingDelivery>,
}

impl TestHarness {
    /// Harness with default lifetimes
    pub fn new() -> Self {
        Self::with_config(|builder| builder)
    }

    /// Harness with configuration adjusted by `configure`
    pub fn with_config(configure: impl FnOnce(IdentityConfigBuilder) -> IdentityConfigBuilder) -> Self {
        let config = configure(IdentityConfig::builder().signing_secret(SECRET))
            .build()
            .expect("valid test configuration");

        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let clock = ManualClock::starting_now();
        let delivery = Arc::new(RecordingDelivery::new());

        let service = IdentityService::builder(config)
            .store(store.clone() as Arc<dyn IdentityStore>)
            .clock(Arc::new(clock.clone()))
            .delivery(delivery.clone())
            .code_source(Arc::new(FixedCodes::new([CODE])))
            .credentials(CredentialStore::fast_for_tests())
            .build()
            .expect("service builds");

        Self {
            service: Arc::new(service),
            store,
            clock,
            delivery,
        }
    }

    /// Register, verify and log in; returns the profile and the login tokens
    pub async fn verified_account(&self, email: &str) -> (AccountProfile, TokenPair) {
        let registration = self.service.register(email, PASSWORD, None).await.unwrap();
        self.service.verify(email, CODE).await.unwrap();
        let tokens = self.service.login(email, PASSWORD).await.unwrap();
        (registration.account, tokens)
    }

    /// A verified admin; the role is set directly in the store, then a fresh login picks it up
    pub async fn admin_account(&self, email: &str) -> (AccountProfile, TokenPair) {
        let (profile, _) = self.verified_account(email).await;
        self.promote(&profile.id).await;
        let tokens = self.service.login(email, PASSWORD).await.unwrap();
        (profile, tokens)
    }

    /// Set `role = Admin` bypassing authorization
    pub async fn promote(&self, id: &AccountId) {
        self.store
            .inner()
            .update_profile(id, ProfileUpdate::role(Role::Admin))
            .await
            .unwrap()
            .expect("account exists");
    }
}
