// Quota crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Service constructors wire several stores
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Souq Quota & Subscription Lifecycle Module
//!
//! Ties mutable, time-bounded subscription state (plan, trial window,
//! billing period, cancellation, grace window) to a hard listing limit,
//! and reconciles the two both synchronously (at creation time) and
//! asynchronously (via the recurring grace sweep).
//!
//! ## Features
//!
//! - **Plan Registry**: static catalog + `plans` table, never-fails
//!   resolution with an explicit `Defaulted` fallback tag
//! - **Subscription Lifecycle**: subscribe, cancel (immediate or at period
//!   end), passive trial/period expiry with downgrade grace windows
//! - **Quota Evaluator**: pure allowed/denied decision with reason codes
//!   and current/limit counts for client display
//! - **Creation Gate**: synchronous pre-creation check
//! - **Post-Creation Reconciler**: rolls back grace-window creations that
//!   exceed the plan limit, before the creation call returns
//! - **Grace Sweep**: recurring trim-to-limit over lapsed grace windows,
//!   newest listings first
//! - **Invariants**: runnable read-only consistency checks

pub mod artifacts;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod gate;
pub mod invariants;
pub mod plans;
pub mod store;
pub mod subscription;
pub mod sweep;


// Artifacts
pub use artifacts::{cleanup_artifacts, ArtifactStore, CleanupReport, HttpArtifactStore};

// Config
pub use config::QuotaConfig;

// Error
pub use error::{QuotaError, QuotaResult};

// Evaluator
pub use evaluate::{evaluate, Decision, DecisionReason, EvaluationContext};

// Gate / Reconciler
pub use gate::{CreationGate, PostCreationReconciler, Reconciliation};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Plans
pub use plans::{PgPlanSource, PlanConfig, PlanResolution, PlanSource, StaticPlanRegistry};

// Stores
pub use store::postgres::{PgResourceStore, PgSubscriptionStore};
pub use store::{ResourceStore, SubscriptionStore};

// Subscriptions
pub use subscription::{RefreshSummary, Subscription, SubscriptionService};

// Sweep
pub use sweep::{AccountSweepOutcome, GraceSweep, SweepSummary};

use std::sync::Arc;

use sqlx::PgPool;

/// Main quota service that combines all quota functionality
pub struct QuotaService {
    pub plans: Arc<dyn PlanSource>,
    pub subscriptions: SubscriptionService,
    pub gate: CreationGate,
    pub reconciler: PostCreationReconciler,
    pub sweep: GraceSweep,
    pub invariants: InvariantChecker,
}

impl QuotaService {
    /// Create a new quota service from environment variables
    pub fn from_env(pool: PgPool) -> QuotaResult<Self> {
        let config = QuotaConfig::from_env();
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(HttpArtifactStore::from_env()?);
        Ok(Self::new(pool, config, artifacts))
    }

    /// Create a new quota service with explicit config and artifact store
    pub fn new(pool: PgPool, config: QuotaConfig, artifacts: Arc<dyn ArtifactStore>) -> Self {
        let sub_store: Arc<dyn SubscriptionStore> =
            Arc::new(PgSubscriptionStore::new(pool.clone()));
        let resources: Arc<dyn ResourceStore> = Arc::new(PgResourceStore::new(pool.clone()));
        let plans: Arc<dyn PlanSource> = Arc::new(PgPlanSource::new(pool.clone()));

        let subscriptions =
            SubscriptionService::new(sub_store.clone(), plans.clone(), config.clone());

        Self {
            gate: CreationGate::new(subscriptions.clone(), resources.clone(), plans.clone()),
            reconciler: PostCreationReconciler::new(
                subscriptions.clone(),
                resources.clone(),
                plans.clone(),
                artifacts.clone(),
            ),
            sweep: GraceSweep::new(sub_store, resources, plans.clone(), artifacts, config),
            invariants: InvariantChecker::new(pool),
            subscriptions,
            plans,
        }
    }
}
