//! Quota configuration
//!
//! Window lengths and sweep tuning. Read from the environment in binaries,
//! constructed directly in tests.

use tracing::warn;

use souq_shared::DEFAULT_PLAN;

/// Tunable parameters of the quota & subscription lifecycle
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Plan every account reverts to on downgrade/expiry
    pub default_plan: String,
    /// How long an account may keep excess listings after a downgrade
    pub grace_window: time::Duration,
    /// Length of a paid billing period
    pub billing_period: time::Duration,
    /// Length of a trial started without a payment method
    pub trial_period: time::Duration,
    /// Per-account budget for one sweep pass; exceeded accounts are
    /// skipped and retried on the next run
    pub sweep_account_timeout: std::time::Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_plan: DEFAULT_PLAN.to_string(),
            grace_window: time::Duration::days(7),
            billing_period: time::Duration::days(30),
            trial_period: time::Duration::days(14),
            sweep_account_timeout: std::time::Duration::from_secs(30),
        }
    }
}

impl QuotaConfig {
    /// Build from environment variables, falling back to defaults on
    /// missing or unparsable values (logged, never fatal).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_plan: std::env::var("QUOTA_DEFAULT_PLAN").unwrap_or(defaults.default_plan),
            grace_window: time::Duration::days(env_i64(
                "QUOTA_GRACE_WINDOW_DAYS",
                defaults.grace_window.whole_days(),
            )),
            billing_period: time::Duration::days(env_i64(
                "QUOTA_BILLING_PERIOD_DAYS",
                defaults.billing_period.whole_days(),
            )),
            trial_period: time::Duration::days(env_i64(
                "QUOTA_TRIAL_PERIOD_DAYS",
                defaults.trial_period.whole_days(),
            )),
            sweep_account_timeout: std::time::Duration::from_secs(
                env_i64(
                    "SWEEP_ACCOUNT_TIMEOUT_SECS",
                    defaults.sweep_account_timeout.as_secs() as i64,
                )
                .max(1) as u64,
            ),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key = key, value = %raw, "Unparsable config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
