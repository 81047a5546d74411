//! Subscription record and lifecycle
//!
//! The subscription is embedded in the account entity. It transitions on
//! explicit subscribe/cancel actions and on passive expiry (trial or
//! billing period elapsing). Expiry transitions and immediate cancellation
//! are the only places the grace window is opened; the sweep (or an
//! already-within-limit observation) is the only way it closes early.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info};
use uuid::Uuid;

use souq_shared::SubscriptionStatus;

use crate::config::QuotaConfig;
use crate::error::{QuotaError, QuotaResult};
use crate::plans::{PlanSource, TRIAL_PLAN};
use crate::store::SubscriptionStore;

/// Per-account subscription state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Current plan identifier
    pub plan: String,
    /// Lifecycle status
    pub status: SubscriptionStatus,
    /// End of the trial window; set whenever `status == Trialing`
    pub trial_ends_at: Option<OffsetDateTime>,
    /// Start of the current billing period
    pub current_period_start: Option<OffsetDateTime>,
    /// End of the current billing period; set whenever `status == Active`
    pub current_period_end: Option<OffsetDateTime>,
    /// While set and in the future, the account may temporarily exceed its
    /// plan limit. Only ever set together with a downgrade to the default
    /// plan.
    pub grace_until: Option<OffsetDateTime>,
    /// Cancellation was requested for the end of the current period
    pub cancel_at_period_end: bool,
    /// When the pending cancellation takes effect
    pub cancel_at: Option<OffsetDateTime>,
    /// When the subscription was actually cancelled
    pub canceled_at: Option<OffsetDateTime>,
}

impl Subscription {
    /// The implicit subscription every account starts with.
    pub fn default_for_plan(default_plan: &str) -> Self {
        Self {
            plan: default_plan.to_string(),
            status: SubscriptionStatus::None,
            trial_ends_at: None,
            current_period_start: None,
            current_period_end: None,
            grace_until: None,
            cancel_at_period_end: false,
            cancel_at: None,
            canceled_at: None,
        }
    }

    /// Plan identifier used for limit purposes: the trial config while
    /// trialing, otherwise the subscription's own plan.
    pub fn effective_plan(&self) -> &str {
        if self.status == SubscriptionStatus::Trialing {
            TRIAL_PLAN
        } else if self.plan.is_empty() {
            souq_shared::DEFAULT_PLAN
        } else {
            &self.plan
        }
    }

    /// Whether the grace window is open at `now`.
    pub fn in_grace(&self, now: OffsetDateTime) -> bool {
        self.grace_until.is_some_and(|until| until > now)
    }

    fn downgrade_with_grace(&mut self, config: &QuotaConfig, now: OffsetDateTime) {
        self.plan = config.default_plan.clone();
        self.grace_until = Some(now + config.grace_window);
        self.current_period_start = None;
        self.current_period_end = None;
    }

    /// Apply passive expiry transitions. Returns true if anything changed.
    ///
    /// - Trial elapsed: downgrade to the default plan with a grace window.
    /// - Active period elapsed with a pending cancellation: cancelled,
    ///   default plan, grace window.
    /// - Active period elapsed otherwise: `past_due`, no plan change and no
    ///   grace (renewal and dunning belong to the payment layer).
    pub fn refresh(&mut self, config: &QuotaConfig, now: OffsetDateTime) -> bool {
        match self.status {
            SubscriptionStatus::Trialing => {
                let elapsed = self.trial_ends_at.is_none_or(|t| t <= now);
                if elapsed {
                    self.status = SubscriptionStatus::None;
                    self.downgrade_with_grace(config, now);
                    return true;
                }
                false
            }
            SubscriptionStatus::Active => {
                let elapsed = self.current_period_end.is_some_and(|t| t <= now);
                if !elapsed {
                    return false;
                }
                if self.cancel_at_period_end {
                    self.status = SubscriptionStatus::Canceled;
                    self.canceled_at = Some(self.cancel_at.unwrap_or(now));
                    self.cancel_at_period_end = false;
                    self.downgrade_with_grace(config, now);
                } else {
                    self.status = SubscriptionStatus::PastDue;
                }
                true
            }
            _ => false,
        }
    }
}

/// Summary of one bulk expiry-refresh pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub checked: usize,
    pub transitioned: usize,
    pub errors: usize,
}

/// Service owning subscription reads, writes and transitions
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    plans: Arc<dyn PlanSource>,
    config: QuotaConfig,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanSource>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            store,
            plans,
            config,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Start a subscription on `plan`, optionally as a trial.
    ///
    /// Rejects unknown and inactive plans; subscribing clears any grace
    /// window and pending cancellation.
    pub async fn subscribe(
        &self,
        account_id: Uuid,
        plan: &str,
        with_trial: bool,
    ) -> QuotaResult<Subscription> {
        let resolution = self.plans.resolve(plan).await;
        if resolution.is_defaulted() {
            return Err(QuotaError::InvalidPlan(plan.to_string()));
        }
        if !resolution.config().active {
            return Err(QuotaError::InvalidPlan(format!("{plan} is not purchasable")));
        }

        let now = OffsetDateTime::now_utc();
        let mut sub = Subscription::default_for_plan(&self.config.default_plan);
        sub.plan = plan.to_string();
        if with_trial {
            sub.status = SubscriptionStatus::Trialing;
            sub.trial_ends_at = Some(now + self.config.trial_period);
        } else {
            sub.status = SubscriptionStatus::Active;
            sub.current_period_start = Some(now);
            sub.current_period_end = Some(now + self.config.billing_period);
        }

        self.store.save(account_id, &sub).await?;
        info!(account_id = %account_id, plan = %plan, trial = with_trial, "Subscription started");
        Ok(sub)
    }

    /// Cancel the account's subscription.
    ///
    /// Immediate cancellation reverts to the default plan right away and
    /// opens a grace window so existing listings are not destroyed at the
    /// moment of downgrade. Otherwise the cancellation is recorded and
    /// takes effect when the current period elapses.
    pub async fn cancel(&self, account_id: Uuid, immediate: bool) -> QuotaResult<Subscription> {
        let now = OffsetDateTime::now_utc();
        let mut sub = self.load_refreshed(account_id, now).await?;

        if immediate {
            sub.status = SubscriptionStatus::Canceled;
            sub.canceled_at = Some(now);
            sub.cancel_at_period_end = false;
            sub.cancel_at = None;
            sub.trial_ends_at = None;
            sub.downgrade_with_grace(&self.config, now);
        } else {
            sub.cancel_at_period_end = true;
            sub.cancel_at = sub.current_period_end;
        }

        self.store.save(account_id, &sub).await?;
        info!(
            account_id = %account_id,
            immediate = immediate,
            grace_until = ?sub.grace_until,
            "Subscription cancelled"
        );
        Ok(sub)
    }

    /// Read the account's subscription, apply passive expiry, and persist
    /// the transition if one occurred.
    ///
    /// Unknown accounts degrade to the default subscription rather than
    /// failing the calling operation.
    pub async fn load_refreshed(
        &self,
        account_id: Uuid,
        now: OffsetDateTime,
    ) -> QuotaResult<Subscription> {
        let Some(mut sub) = self.store.get(account_id).await? else {
            debug!(account_id = %account_id, "No subscription record, using default plan");
            return Ok(Subscription::default_for_plan(&self.config.default_plan));
        };

        if sub.refresh(&self.config, now) {
            info!(
                account_id = %account_id,
                plan = %sub.plan,
                status = %sub.status,
                grace_until = ?sub.grace_until,
                "Subscription expired, transition applied"
            );
            self.store.save(account_id, &sub).await?;
        }
        Ok(sub)
    }

    /// Bulk variant of [`load_refreshed`](Self::load_refreshed) for the
    /// worker: finds accounts whose trial or billing boundary has passed
    /// and applies the transition, isolating per-account failures.
    pub async fn refresh_expired(&self, now: OffsetDateTime) -> QuotaResult<RefreshSummary> {
        let account_ids = self.store.find_expired(now).await?;
        let mut summary = RefreshSummary {
            checked: account_ids.len(),
            ..Default::default()
        };

        for account_id in account_ids {
            match self.load_refreshed(account_id, now).await {
                Ok(_) => summary.transitioned += 1,
                Err(e) => {
                    error!(account_id = %account_id, error = %e, "Failed to refresh subscription");
                    summary.errors += 1;
                }
            }
        }
        Ok(summary)
    }
}

/// Parse a persisted status string, surfacing bad rows as data errors.
pub(crate) fn parse_status(raw: &str) -> QuotaResult<SubscriptionStatus> {
    SubscriptionStatus::from_str(raw).map_err(|e| QuotaError::InvalidData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> QuotaConfig {
        QuotaConfig::default()
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn default_subscription_is_free_and_graceless() {
        let sub = Subscription::default_for_plan("free");
        assert_eq!(sub.plan, "free");
        assert_eq!(sub.status, SubscriptionStatus::None);
        assert!(!sub.in_grace(now()));
        assert_eq!(sub.effective_plan(), "free");
    }

    #[test]
    fn trialing_account_evaluates_against_trial_plan() {
        let mut sub = Subscription::default_for_plan("free");
        sub.plan = "pro".to_string();
        sub.status = SubscriptionStatus::Trialing;
        sub.trial_ends_at = Some(now() + time::Duration::days(3));
        assert_eq!(sub.effective_plan(), TRIAL_PLAN);
    }

    #[test]
    fn trial_expiry_downgrades_with_grace() {
        let t = now();
        let mut sub = Subscription::default_for_plan("free");
        sub.plan = "pro".to_string();
        sub.status = SubscriptionStatus::Trialing;
        sub.trial_ends_at = Some(t - time::Duration::hours(1));

        assert!(sub.refresh(&config(), t));
        assert_eq!(sub.status, SubscriptionStatus::None);
        assert_eq!(sub.plan, "free");
        assert_eq!(sub.grace_until, Some(t + time::Duration::days(7)));
        assert!(sub.in_grace(t));
    }

    #[test]
    fn unexpired_trial_is_untouched() {
        let t = now();
        let mut sub = Subscription::default_for_plan("free");
        sub.status = SubscriptionStatus::Trialing;
        sub.trial_ends_at = Some(t + time::Duration::days(1));
        assert!(!sub.refresh(&config(), t));
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
    }

    #[test]
    fn period_end_with_pending_cancel_downgrades_with_grace() {
        let t = now();
        let mut sub = Subscription::default_for_plan("free");
        sub.plan = "pro".to_string();
        sub.status = SubscriptionStatus::Active;
        sub.current_period_start = Some(t - time::Duration::days(30));
        sub.current_period_end = Some(t - time::Duration::minutes(5));
        sub.cancel_at_period_end = true;
        sub.cancel_at = sub.current_period_end;

        assert!(sub.refresh(&config(), t));
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert_eq!(sub.plan, "free");
        assert!(sub.in_grace(t));
        assert_eq!(sub.canceled_at, Some(t - time::Duration::minutes(5)));
    }

    #[test]
    fn period_end_without_cancel_goes_past_due_without_grace() {
        let t = now();
        let mut sub = Subscription::default_for_plan("free");
        sub.plan = "pro".to_string();
        sub.status = SubscriptionStatus::Active;
        sub.current_period_end = Some(t - time::Duration::hours(2));

        assert!(sub.refresh(&config(), t));
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(sub.plan, "pro");
        assert!(!sub.in_grace(t));
    }

    #[test]
    fn refresh_is_idempotent() {
        let t = now();
        let mut sub = Subscription::default_for_plan("free");
        sub.plan = "pro".to_string();
        sub.status = SubscriptionStatus::Trialing;
        sub.trial_ends_at = Some(t - time::Duration::hours(1));

        assert!(sub.refresh(&config(), t));
        let after_first = sub.clone();
        assert!(!sub.refresh(&config(), t));
        assert_eq!(sub, after_first);
    }

    #[test]
    fn grace_window_closes_at_deadline() {
        let t = now();
        let mut sub = Subscription::default_for_plan("free");
        sub.grace_until = Some(t);
        assert!(!sub.in_grace(t));
        sub.grace_until = Some(t + time::Duration::seconds(1));
        assert!(sub.in_grace(t));
    }
}
