//! Abandoned registration cleanup
//!
//! A background task that periodically removes accounts which registered
//! but never verified their email. Each sweep:
//!
//! 1. Computes `cutoff = now - pending_account_ttl`
//! 2. Lists up to `cleanup_batch_size` pending accounts with `created_at < cutoff`
//! 3. Deletes each through [`AccountRegistry::purge_if_pending`], which
//!    re-checks the pending status in the same atomic unit as the delete,
//!    so an account verified after step 2 is kept
//! 4. Drops spent or expired verification codes and expired refresh-token
//!    revocations
//!
//! A failure on one account is logged and counted; the sweep carries on
//! with the rest. Re-running a sweep with nothing newly eligible is a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::clock::{to_chrono, Clock};
use crate::config::IdentityConfig;
use crate::observability::{security_event, SecurityEvent};
use crate::registry::AccountRegistry;
use crate::storage::StorageGuard;
use crate::store::PurgeOutcome;
use crate::verification::VerificationCodeIssuer;

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Eligible pending accounts found by the scan
    pub examined: usize,
    /// Accounts deleted
    pub purged: usize,
    /// Accounts left in place (verified meanwhile, already gone, or no longer eligible)
    pub skipped: usize,
    /// Steps that failed: per-account deletes, the scan, or housekeeping
    pub failed: usize,
    /// Verification codes removed
    pub codes_removed: usize,
    /// Expired refresh-token revocations removed
    pub revocations_removed: usize,
}

/// Periodic sweeper for pending accounts.
pub struct CleanupScheduler {
    registry: Arc<AccountRegistry>,
    codes: Arc<VerificationCodeIssuer>,
    storage: StorageGuard,
    clock: Arc<dyn Clock>,
    pending_ttl: chrono::Duration,
    interval: Duration,
    batch_size: usize,
}

impl CleanupScheduler {
    /// Create a scheduler using the configured TTL, interval and batch size
    pub fn new(
        registry: Arc<AccountRegistry>,
        codes: Arc<VerificationCodeIssuer>,
        storage: StorageGuard,
        clock: Arc<dyn Clock>,
        config: &IdentityConfig,
    ) -> Self {
        Self {
            registry,
            codes,
            storage,
            clock,
            pending_ttl: to_chrono(config.pending_account_ttl),
            interval: config.cleanup_interval,
            batch_size: config.cleanup_batch_size,
        }
    }

    /// Interval between sweeps
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        // A TTL reaching back past the earliest representable instant leaves nothing eligible
        if let Some(cutoff) = now.checked_sub_signed(self.pending_ttl) {
            self.purge_pending(cutoff, &mut report).await;
        }

        match self.codes.purge_expired().await {
            Ok(removed) => report.codes_removed = removed,
            Err(e) => {
                report.failed += 1;
                security_event!(
                    SecurityEvent::CleanupFailure,
                    step = "purge_codes",
                    error = %e,
                    "Verification code purge failed"
                );
            }
        }

        match self
            .storage
            .idempotent("purge_revocations", |s| s.purge_revocations(now))
            .await
        {
            Ok(removed) => report.revocations_removed = removed,
            Err(e) => {
                report.failed += 1;
                security_event!(
                    SecurityEvent::CleanupFailure,
                    step = "purge_revocations",
                    error = %e,
                    "Revocation purge failed"
                );
            }
        }

        security_event!(
            SecurityEvent::CleanupSweepCompleted,
            examined = report.examined,
            purged = report.purged,
            skipped = report.skipped,
            failed = report.failed,
            codes_removed = report.codes_removed,
            revocations_removed = report.revocations_removed,
            "Cleanup sweep completed"
        );

        report
    }

    async fn purge_pending(&self, cutoff: chrono::DateTime<chrono::Utc>, report: &mut SweepReport) {
        let candidates = match self.registry.pending_before(cutoff, self.batch_size).await {
            Ok(ids) => ids,
            Err(e) => {
                report.failed += 1;
                security_event!(
                    SecurityEvent::CleanupFailure,
                    step = "scan",
                    error = %e,
                    "Pending account scan failed"
                );
                return;
            }
        };

        report.examined = candidates.len();

        for id in candidates {
            match self.registry.purge_if_pending(&id, cutoff).await {
                Ok(PurgeOutcome::Purged) => {
                    report.purged += 1;
                    security_event!(
                        SecurityEvent::PendingAccountPurged,
                        account_id = %id,
                        cutoff = %cutoff,
                        "Removed abandoned registration"
                    );
                }
                Ok(outcome) => {
                    report.skipped += 1;
                    debug!(account_id = %id, ?outcome, "Pending account left in place");
                }
                Err(e) => {
                    report.failed += 1;
                    security_event!(
                        SecurityEvent::CleanupFailure,
                        step = "purge_account",
                        account_id = %id,
                        error = %e,
                        "Pending account purge failed, skipping"
                    );
                }
            }
        }
    }

    /// Start the sweeper as a background task.
    ///
    /// The first sweep runs immediately, then one per interval. A sweep that
    /// overruns delays the next tick rather than causing a burst. The task
    /// exits after the current sweep once `shutdown` becomes `true` or its
    /// sender is dropped.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval = ?self.interval, batch_size = self.batch_size, "Cleanup scheduler started");

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            info!("Cleanup scheduler stopped");
        })
    }
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("pending_ttl", &self.pending_ttl)
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
