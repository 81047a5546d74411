//! Plan catalog and resolution
//!
//! Source of truth for "how many listings is this plan allowed". Resolution
//! never fails and never falls open: an unknown or unreadable plan degrades
//! to the default plan's limit, tagged [`PlanResolution::Defaulted`] so
//! callers and tests can tell a fallback from a genuine hit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::warn;

use souq_shared::{DEFAULT_PLAN, UNLIMITED_LISTINGS};

/// Configuration of a single plan tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlanConfig {
    /// Unique plan identifier (e.g. "free", "pro")
    pub name: String,
    /// Human-readable name for client display
    pub display_name: String,
    /// Maximum concurrently active listings; negative means unlimited
    pub listing_limit: i64,
    /// Monthly price in minor units
    pub price_cents: i64,
    /// ISO currency code
    pub currency: String,
    /// Whether the plan can currently be subscribed to
    pub active: bool,
}

impl PlanConfig {
    pub fn is_unlimited(&self) -> bool {
        souq_shared::is_unlimited(self.listing_limit)
    }
}

/// Outcome of resolving a plan identifier.
///
/// `Defaulted` means the identifier was unknown (or the plan store was
/// unreadable) and the default plan's config was substituted. The
/// substitution itself is the long-standing behavior; the tag exists so it
/// is observable instead of silent.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanResolution {
    /// The requested plan was found
    Resolved(PlanConfig),
    /// The requested plan was not found; default plan config substituted
    Defaulted(PlanConfig),
}

impl PlanResolution {
    pub fn config(&self) -> &PlanConfig {
        match self {
            PlanResolution::Resolved(c) | PlanResolution::Defaulted(c) => c,
        }
    }

    pub fn into_config(self) -> PlanConfig {
        match self {
            PlanResolution::Resolved(c) | PlanResolution::Defaulted(c) => c,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, PlanResolution::Defaulted(_))
    }
}

/// A source of plan configurations.
///
/// `resolve` is side-effect-free and infallible: it always returns *some*
/// config, degrading to the default plan rather than failing closed or
/// granting an unbounded allowance.
#[async_trait::async_trait]
pub trait PlanSource: Send + Sync {
    async fn resolve(&self, name: &str) -> PlanResolution;
}

/// Name of the synthetic plan applied while an account is trialing.
pub const TRIAL_PLAN: &str = "trial";

/// Static in-process plan catalog
#[derive(Debug, Clone)]
pub struct StaticPlanRegistry {
    plans: HashMap<String, PlanConfig>,
}

impl StaticPlanRegistry {
    /// Built-in catalog: free (5 listings), pro (15), business (unlimited),
    /// plus the trial config applied while `status == trialing`.
    pub fn builtin() -> Self {
        let mut plans = HashMap::new();
        for plan in [
            PlanConfig {
                name: DEFAULT_PLAN.to_string(),
                display_name: "Free".to_string(),
                listing_limit: 5,
                price_cents: 0,
                currency: "USD".to_string(),
                active: true,
            },
            PlanConfig {
                name: "pro".to_string(),
                display_name: "Pro".to_string(),
                listing_limit: 15,
                price_cents: 1_900,
                currency: "USD".to_string(),
                active: true,
            },
            PlanConfig {
                name: "business".to_string(),
                display_name: "Business".to_string(),
                listing_limit: UNLIMITED_LISTINGS,
                price_cents: 9_900,
                currency: "USD".to_string(),
                active: true,
            },
            PlanConfig {
                name: TRIAL_PLAN.to_string(),
                display_name: "Trial".to_string(),
                listing_limit: 15,
                price_cents: 0,
                currency: "USD".to_string(),
                // Not directly purchasable
                active: false,
            },
        ] {
            plans.insert(plan.name.clone(), plan);
        }
        Self { plans }
    }

    /// Replace or add plan configs on top of the builtin catalog
    pub fn with_overrides(overrides: Vec<PlanConfig>) -> Self {
        let mut registry = Self::builtin();
        for plan in overrides {
            registry.plans.insert(plan.name.clone(), plan);
        }
        registry
    }

    /// The default plan's config. The builtin catalog always contains it.
    pub fn default_plan(&self) -> PlanConfig {
        self.plans
            .get(DEFAULT_PLAN)
            .cloned()
            .unwrap_or_else(|| PlanConfig {
                name: DEFAULT_PLAN.to_string(),
                display_name: "Free".to_string(),
                listing_limit: 5,
                price_cents: 0,
                currency: "USD".to_string(),
                active: true,
            })
    }

    fn resolve_sync(&self, name: &str) -> PlanResolution {
        match self.plans.get(name) {
            Some(config) => PlanResolution::Resolved(config.clone()),
            None => {
                warn!(plan = %name, "Unknown plan identifier, defaulting to free plan limits");
                PlanResolution::Defaulted(self.default_plan())
            }
        }
    }
}

#[async_trait::async_trait]
impl PlanSource for StaticPlanRegistry {
    async fn resolve(&self, name: &str) -> PlanResolution {
        self.resolve_sync(name)
    }
}

/// Plan source backed by the `plans` table, falling back to the builtin
/// catalog on a miss and on store errors. Admin edits to the table take
/// effect on the next resolution, never retroactively.
pub struct PgPlanSource {
    pool: PgPool,
    fallback: StaticPlanRegistry,
}

impl PgPlanSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            fallback: StaticPlanRegistry::builtin(),
        }
    }
}

#[async_trait::async_trait]
impl PlanSource for PgPlanSource {
    async fn resolve(&self, name: &str) -> PlanResolution {
        let row: Result<Option<PlanConfig>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT name, display_name, listing_limit, price_cents, currency, active
            FROM plans
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(config)) => PlanResolution::Resolved(config),
            Ok(None) => self.fallback.resolve_sync(name),
            Err(e) => {
                // Resolution must not fail closed; degrade to the catalog.
                warn!(plan = %name, error = %e, "Plan store unreadable, using builtin catalog");
                self.fallback.resolve_sync(name)
            }
        }
    }
}
