//! Creation gate and post-creation reconciler
//!
//! Listing creation is not atomic with quota evaluation: counting and
//! persisting are separate steps, so two concurrent creations can both
//! pass the gate. Outside of grace that overshoot is accepted as a rare,
//! bounded condition rather than serialized with a lock — quota is a
//! product constraint, not a safety one. The grace path gets a second
//! check *after* persistence: a creation that pushed a grace-window
//! account over its limit is undone before the call returns, so grace
//! protects existing listings but never grants net growth past the limit.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifacts::{cleanup_artifacts, ArtifactStore, CleanupReport};
use crate::error::QuotaResult;
use crate::evaluate::{evaluate, Decision, EvaluationContext};
use crate::plans::PlanSource;
use crate::store::ResourceStore;
use crate::subscription::SubscriptionService;

/// Synchronous pre-creation quota check
#[derive(Clone)]
pub struct CreationGate {
    subscriptions: SubscriptionService,
    resources: Arc<dyn ResourceStore>,
    plans: Arc<dyn PlanSource>,
}

impl CreationGate {
    pub fn new(
        subscriptions: SubscriptionService,
        resources: Arc<dyn ResourceStore>,
        plans: Arc<dyn PlanSource>,
    ) -> Self {
        Self {
            subscriptions,
            resources,
            plans,
        }
    }

    /// Decide whether `account_id` may create one more listing.
    ///
    /// Reads the refreshed subscription, resolves the effective plan, and
    /// evaluates against a fresh listing count. A denial is a normal
    /// outcome carried in the [`Decision`], not an error.
    pub async fn check(&self, account_id: Uuid, admin_bypass: bool) -> QuotaResult<Decision> {
        let now = OffsetDateTime::now_utc();
        let sub = self.subscriptions.load_refreshed(account_id, now).await?;
        let resolution = self.plans.resolve(sub.effective_plan()).await;
        let current = self.resources.count_active(account_id).await?;

        let decision = evaluate(EvaluationContext {
            limit: resolution.config().listing_limit,
            current,
            in_grace: sub.in_grace(now),
            admin_bypass,
        });

        if !decision.allowed {
            info!(
                account_id = %account_id,
                plan = %sub.effective_plan(),
                current = decision.current,
                limit = decision.limit,
                "Listing creation blocked by quota"
            );
        }
        Ok(decision)
    }
}

/// Outcome of the post-creation check
#[derive(Debug, Clone, Serialize)]
pub enum Reconciliation {
    /// The creation stands
    Accepted,
    /// The account was in grace and the new listing pushed it over the
    /// limit; the listing was deleted before the creation call returned.
    /// `current` includes the rolled-back listing.
    RolledBack {
        current: i64,
        limit: i64,
        cleanup: CleanupReport,
    },
}

impl Reconciliation {
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Reconciliation::RolledBack { .. })
    }
}

/// Synchronous check run immediately after a listing is persisted.
///
/// Exists solely to catch the grace-period race: the gate lets grace
/// accounts through unconditionally, so overshoot is detected here, with
/// the just-created listing's id in hand for rollback.
#[derive(Clone)]
pub struct PostCreationReconciler {
    subscriptions: SubscriptionService,
    resources: Arc<dyn ResourceStore>,
    plans: Arc<dyn PlanSource>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl PostCreationReconciler {
    pub fn new(
        subscriptions: SubscriptionService,
        resources: Arc<dyn ResourceStore>,
        plans: Arc<dyn PlanSource>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            subscriptions,
            resources,
            plans,
            artifacts,
        }
    }

    /// Re-evaluate after persistence; roll the new listing back if the
    /// account is in grace and now over its limit.
    pub async fn reconcile(
        &self,
        account_id: Uuid,
        resource_id: Uuid,
    ) -> QuotaResult<Reconciliation> {
        let now = OffsetDateTime::now_utc();
        let sub = self.subscriptions.load_refreshed(account_id, now).await?;

        // Non-grace overshoot is tolerated; only the grace path reconciles.
        if !sub.in_grace(now) {
            return Ok(Reconciliation::Accepted);
        }

        let resolution = self.plans.resolve(sub.effective_plan()).await;
        let config = resolution.config();
        if config.is_unlimited() {
            return Ok(Reconciliation::Accepted);
        }

        // Fresh count, which now includes the just-created listing. Same
        // rule as evaluate() at count = current - 1: the listing stands
        // only if the gate would still admit it.
        let current = self.resources.count_active(account_id).await?;
        if current <= config.listing_limit {
            return Ok(Reconciliation::Accepted);
        }

        let keys = self.resources.artifact_keys(resource_id).await?;
        let cleanup = cleanup_artifacts(self.artifacts.as_ref(), keys).await;
        self.resources.delete(resource_id).await?;

        warn!(
            account_id = %account_id,
            resource_id = %resource_id,
            current = current,
            limit = config.listing_limit,
            artifacts_failed = cleanup.failed.len(),
            "Grace-window creation exceeded plan limit, rolled back"
        );

        Ok(Reconciliation::RolledBack {
            current,
            limit: config.listing_limit,
            cleanup,
        })
    }
}
