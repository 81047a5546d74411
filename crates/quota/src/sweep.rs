//! Grace reconciliation sweep
//!
//! Recurring job that finds accounts whose grace window has lapsed and
//! trims their listings down to the (downgraded) plan limit, newest first.
//! One bad account never aborts the batch; each account runs under its own
//! timeout and failures are logged and retried on the next scheduled run.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::{cleanup_artifacts, ArtifactStore};
use crate::config::QuotaConfig;
use crate::error::QuotaResult;
use crate::plans::PlanSource;
use crate::store::{ResourceStore, SubscriptionStore};

/// Result of sweeping a single account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AccountSweepOutcome {
    /// Already within limit (or unlimited); grace window cleared
    Cleared,
    /// Excess listings deleted, then grace cleared
    Trimmed { deleted: usize },
    /// Nothing to do (account vanished or grace already cleared)
    Skipped,
}

/// Tallies for one sweep pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub accounts: usize,
    pub cleared: usize,
    pub trimmed: usize,
    pub listings_deleted: usize,
    pub timed_out: usize,
    pub errors: usize,
}

/// The asynchronous trim-to-limit job
#[derive(Clone)]
pub struct GraceSweep {
    subscriptions: Arc<dyn SubscriptionStore>,
    resources: Arc<dyn ResourceStore>,
    plans: Arc<dyn PlanSource>,
    artifacts: Arc<dyn ArtifactStore>,
    config: QuotaConfig,
}

impl GraceSweep {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        resources: Arc<dyn ResourceStore>,
        plans: Arc<dyn PlanSource>,
        artifacts: Arc<dyn ArtifactStore>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            subscriptions,
            resources,
            plans,
            artifacts,
            config,
        }
    }

    /// Run one sweep pass over every account whose grace has lapsed.
    ///
    /// A failure to even select the batch is returned to the caller (the
    /// worker logs it and retries next tick); everything past selection is
    /// isolated per account.
    pub async fn run(&self, now: OffsetDateTime) -> QuotaResult<SweepSummary> {
        let account_ids = self
            .subscriptions
            .find_grace_expired(&self.config.default_plan, now)
            .await?;

        let mut summary = SweepSummary {
            accounts: account_ids.len(),
            ..Default::default()
        };

        for account_id in account_ids {
            let outcome = tokio::time::timeout(
                self.config.sweep_account_timeout,
                self.reconcile_account(account_id, now),
            )
            .await;

            match outcome {
                Ok(Ok(AccountSweepOutcome::Cleared)) => summary.cleared += 1,
                Ok(Ok(AccountSweepOutcome::Trimmed { deleted })) => {
                    summary.trimmed += 1;
                    summary.listings_deleted += deleted;
                }
                Ok(Ok(AccountSweepOutcome::Skipped)) => {}
                Ok(Err(e)) => {
                    error!(account_id = %account_id, error = %e, "Sweep failed for account");
                    summary.errors += 1;
                }
                Err(_) => {
                    warn!(
                        account_id = %account_id,
                        timeout_secs = self.config.sweep_account_timeout.as_secs(),
                        "Sweep timed out for account, skipping until next run"
                    );
                    summary.timed_out += 1;
                }
            }
        }

        info!(
            accounts = summary.accounts,
            cleared = summary.cleared,
            trimmed = summary.trimmed,
            listings_deleted = summary.listings_deleted,
            timed_out = summary.timed_out,
            errors = summary.errors,
            "Grace reconciliation sweep complete"
        );
        Ok(summary)
    }

    /// Trim one account to its plan limit and close its grace window.
    ///
    /// Re-reads limit and count so a re-run or overlapping pass sees the
    /// already-trimmed state and deletes nothing further.
    pub async fn reconcile_account(
        &self,
        account_id: Uuid,
        now: OffsetDateTime,
    ) -> QuotaResult<AccountSweepOutcome> {
        let Some(sub) = self.subscriptions.get(account_id).await? else {
            return Ok(AccountSweepOutcome::Skipped);
        };
        if sub.grace_until.is_none() || sub.in_grace(now) {
            // Cleared by a concurrent pass, or deadline not actually lapsed
            return Ok(AccountSweepOutcome::Skipped);
        }

        let resolution = self.plans.resolve(sub.effective_plan()).await;
        let config = resolution.config();
        if config.is_unlimited() {
            self.subscriptions.clear_grace(account_id).await?;
            return Ok(AccountSweepOutcome::Cleared);
        }

        // Same limit rule evaluate() applies at the gate, restated as a
        // trim count: anything past the limit goes.
        let current = self.resources.count_active(account_id).await?;
        let excess = current - config.listing_limit;
        if excess <= 0 {
            self.subscriptions.clear_grace(account_id).await?;
            return Ok(AccountSweepOutcome::Cleared);
        }

        let victims = self
            .resources
            .list_newest_first(account_id, excess)
            .await?;
        let mut deleted = 0;
        for resource_id in victims {
            let keys = self.resources.artifact_keys(resource_id).await?;
            let cleanup = cleanup_artifacts(self.artifacts.as_ref(), keys).await;
            self.resources.delete(resource_id).await?;
            deleted += 1;
            if !cleanup.is_clean() {
                warn!(
                    account_id = %account_id,
                    resource_id = %resource_id,
                    failed = cleanup.failed.len(),
                    "Listing trimmed with orphaned artifacts"
                );
            }
        }

        self.subscriptions.clear_grace(account_id).await?;
        info!(
            account_id = %account_id,
            deleted = deleted,
            limit = config.listing_limit,
            "Account trimmed to plan limit, grace cleared"
        );
        Ok(AccountSweepOutcome::Trimmed { deleted })
    }
}
