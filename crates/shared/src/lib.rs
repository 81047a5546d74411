//! Souq shared domain primitives
//!
//! Types used by both the quota library and the background worker:
//! subscription lifecycle status, listing status, and the sentinel value
//! for unlimited plan limits.

use serde::{Deserialize, Serialize};

/// Sentinel listing limit meaning "no limit".
///
/// Any negative limit is treated as unlimited; this constant is the
/// canonical value written by the plan catalog.
pub const UNLIMITED_LISTINGS: i64 = -1;

/// Returns true if `limit` is the unlimited sentinel.
pub fn is_unlimited(limit: i64) -> bool {
    limit < 0
}

/// Name of the default (lowest) plan every account falls back to.
pub const DEFAULT_PLAN: &str = "free";

/// Lifecycle status of an account's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// No subscription was ever started (default plan applies).
    None,
    /// In a trial window; `trial_ends_at` must be set.
    Trialing,
    /// Paid and current; `current_period_end` must be set.
    Active,
    /// Billing period elapsed without renewal confirmation.
    PastDue,
    /// Cancelled, either immediately or at period end.
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SubscriptionStatus::None),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Error for unrecognized status strings coming out of the store.
#[derive(Debug, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);

/// Status of a listing. Only `Deleted` listings are excluded from quota
/// counting; every other state counts against the plan limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ResourceStatus {
    Active,
    Paused,
    PendingReview,
    Deleted,
}

impl ResourceStatus {
    /// Whether a listing in this state counts toward the owner's quota.
    pub fn counts_toward_quota(&self) -> bool {
        !matches!(self, ResourceStatus::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SubscriptionStatus::None,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
        ] {
            let parsed = SubscriptionStatus::from_str(status.as_str()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(SubscriptionStatus::from_str("expired").is_err());
    }

    #[test]
    fn unlimited_sentinel() {
        assert!(is_unlimited(UNLIMITED_LISTINGS));
        assert!(is_unlimited(-5));
        assert!(!is_unlimited(0));
        assert!(!is_unlimited(15));
    }

    #[test]
    fn deleted_listings_do_not_count() {
        assert!(ResourceStatus::Active.counts_toward_quota());
        assert!(ResourceStatus::Paused.counts_toward_quota());
        assert!(ResourceStatus::PendingReview.counts_toward_quota());
        assert!(!ResourceStatus::Deleted.counts_toward_quota());
    }
}
