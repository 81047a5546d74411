//! Quota evaluator
//!
//! Pure decision function: given an effective plan limit, a fresh listing
//! count, and the grace/bypass flags, decide whether one more listing may
//! be created. Callers must re-read the count immediately before calling —
//! the gate and the post-creation reconciler straddle a non-atomic,
//! multi-step creation, so a cached count is meaningless here.

use serde::{Deserialize, Serialize};

use souq_shared::is_unlimited;

/// Inputs to a single quota evaluation
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext {
    /// Effective plan limit; negative means unlimited
    pub limit: i64,
    /// Fresh count of non-deleted listings owned by the account
    pub current: i64,
    /// Whether the account's grace window is currently open
    pub in_grace: bool,
    /// Whether the caller holds an administrative bypass role
    pub admin_bypass: bool,
}

/// Why a decision came out the way it did. Serialized snake_case so the
/// reason code is directly usable in API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    AdminBypass,
    GracePeriod,
    Unlimited,
    WithinLimit,
    PostLimitReached,
}

/// Result of a quota evaluation. Carries current/limit so a client can
/// render "X of Y used" on rejection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub current: i64,
    pub limit: i64,
    pub in_grace: bool,
}

/// Evaluate whether the account may create one more listing.
///
/// Rule order: admin bypass, then grace (always allowed, but flagged so the
/// caller applies the post-creation rule), then unlimited sentinel, then
/// the plain count-versus-limit comparison.
pub fn evaluate(ctx: EvaluationContext) -> Decision {
    let EvaluationContext {
        limit,
        current,
        in_grace,
        admin_bypass,
    } = ctx;

    if admin_bypass {
        return Decision {
            allowed: true,
            reason: DecisionReason::AdminBypass,
            current,
            limit,
            in_grace,
        };
    }

    if in_grace {
        // Grace exists precisely to avoid blocking in-flight work at the
        // moment of downgrade; overshoot is handled after persistence.
        return Decision {
            allowed: true,
            reason: DecisionReason::GracePeriod,
            current,
            limit,
            in_grace: true,
        };
    }

    if is_unlimited(limit) {
        return Decision {
            allowed: true,
            reason: DecisionReason::Unlimited,
            current,
            limit,
            in_grace: false,
        };
    }

    if current < limit {
        Decision {
            allowed: true,
            reason: DecisionReason::WithinLimit,
            current,
            limit,
            in_grace: false,
        }
    } else {
        Decision {
            allowed: false,
            reason: DecisionReason::PostLimitReached,
            current,
            limit,
            in_grace: false,
        }
    }
}
