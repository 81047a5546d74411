//! Quota Invariants Module
//!
//! Runnable consistency checks over the subscription and listing data.
//! The worker runs them daily; they can also be run after any bulk
//! mutation to confirm the system is in a valid state.
//!
//! Checks only read, never write, and every violation carries enough
//! context to debug the affected account.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::QuotaResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Account(s) affected
    pub account_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - quota decisions may be wrong right now
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingTimestampRow {
    account_id: Uuid,
    subscription_status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct GraceOffPlanRow {
    account_id: Uuid,
    plan: String,
    grace_until: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleGraceRow {
    account_id: Uuid,
    grace_until: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct OverLimitRow {
    account_id: Uuid,
    plan: String,
    listing_count: i64,
    listing_limit: i64,
}

/// Service for running quota invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> QuotaResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_trialing_has_trial_end().await?);
        violations.extend(self.check_active_has_period_end().await?);
        violations.extend(self.check_grace_only_on_default_plan().await?);
        violations.extend(self.check_grace_expired_not_swept().await?);
        violations.extend(self.check_over_limit_without_grace().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: trialing subscriptions have a trial end
    ///
    /// Without `trial_ends_at` the trial can never expire and the account
    /// keeps trial limits forever.
    async fn check_trialing_has_trial_end(&self) -> QuotaResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingTimestampRow> = sqlx::query_as(
            r#"
            SELECT id as account_id, subscription_status
            FROM accounts
            WHERE subscription_status = 'trialing'
              AND trial_ends_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "trialing_has_trial_end".to_string(),
                account_ids: vec![row.account_id],
                description: "Trialing subscription has no trial_ends_at".to_string(),
                context: serde_json::json!({
                    "subscription_status": row.subscription_status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 2: active subscriptions have a period end
    async fn check_active_has_period_end(&self) -> QuotaResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingTimestampRow> = sqlx::query_as(
            r#"
            SELECT id as account_id, subscription_status
            FROM accounts
            WHERE subscription_status = 'active'
              AND current_period_end IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_has_period_end".to_string(),
                account_ids: vec![row.account_id],
                description: "Active subscription has no current_period_end".to_string(),
                context: serde_json::json!({
                    "subscription_status": row.subscription_status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: grace windows only exist on the default plan
    ///
    /// Grace cushions a downgrade. A grace window on a paid plan means a
    /// transition wrote inconsistent state, and the sweep will never pick
    /// the account up.
    async fn check_grace_only_on_default_plan(&self) -> QuotaResult<Vec<InvariantViolation>> {
        let rows: Vec<GraceOffPlanRow> = sqlx::query_as(
            r#"
            SELECT id as account_id, plan, grace_until
            FROM accounts
            WHERE grace_until IS NOT NULL
              AND plan != 'free'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "grace_only_on_default_plan".to_string(),
                account_ids: vec![row.account_id],
                description: format!(
                    "Account on plan '{}' has a grace window (expected only on the default plan)",
                    row.plan
                ),
                context: serde_json::json!({
                    "plan": row.plan,
                    "grace_until": row.grace_until,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: lapsed grace windows get swept promptly
    ///
    /// A grace deadline more than a day in the past means the sweep has
    /// not run, or keeps failing for this account.
    async fn check_grace_expired_not_swept(&self) -> QuotaResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleGraceRow> = sqlx::query_as(
            r#"
            SELECT id as account_id, grace_until
            FROM accounts
            WHERE grace_until IS NOT NULL
              AND grace_until < NOW() - INTERVAL '1 day'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "grace_expired_not_swept".to_string(),
                account_ids: vec![row.account_id],
                description: format!(
                    "Grace deadline {:?} lapsed over a day ago and was never cleared",
                    row.grace_until
                ),
                context: serde_json::json!({
                    "grace_until": row.grace_until,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: accounts over their limit hold a grace window
    ///
    /// Overshoot without grace is the tolerated creation race; this check
    /// makes it observable instead of silent. Trialing accounts evaluate
    /// against the trial config and are excluded.
    async fn check_over_limit_without_grace(&self) -> QuotaResult<Vec<InvariantViolation>> {
        let rows: Vec<OverLimitRow> = sqlx::query_as(
            r#"
            SELECT
                a.id as account_id,
                a.plan,
                COUNT(l.id) as listing_count,
                p.listing_limit
            FROM accounts a
            JOIN plans p ON p.name = a.plan
            JOIN listings l ON l.account_id = a.id AND l.status != 'deleted'
            WHERE a.grace_until IS NULL
              AND a.subscription_status != 'trialing'
              AND p.listing_limit >= 0
            GROUP BY a.id, a.plan, p.listing_limit
            HAVING COUNT(l.id) > p.listing_limit
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "over_limit_without_grace".to_string(),
                account_ids: vec![row.account_id],
                description: format!(
                    "Account holds {} listings on plan '{}' (limit {}) with no grace window",
                    row.listing_count, row.plan, row.listing_limit
                ),
                context: serde_json::json!({
                    "plan": row.plan,
                    "listing_count": row.listing_count,
                    "listing_limit": row.listing_limit,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> QuotaResult<Vec<InvariantViolation>> {
        match name {
            "trialing_has_trial_end" => self.check_trialing_has_trial_end().await,
            "active_has_period_end" => self.check_active_has_period_end().await,
            "grace_only_on_default_plan" => self.check_grace_only_on_default_plan().await,
            "grace_expired_not_swept" => self.check_grace_expired_not_swept().await,
            "over_limit_without_grace" => self.check_over_limit_without_grace().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "trialing_has_trial_end",
            "active_has_period_end",
            "grace_only_on_default_plan",
            "grace_expired_not_swept",
            "over_limit_without_grace",
        ]
    }
}
