//! Error types for the quota crate
//!
//! A denied creation is *not* an error: the evaluator returns a `Decision`
//! for that. These variants cover genuine faults (store unavailability,
//! bad data) that must fail the calling operation.

use thiserror::Error;

/// Errors that can occur in quota and subscription operations
#[derive(Debug, Error)]
pub enum QuotaError {
    /// Database query failed (store unavailability propagates to the caller)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A store implementation failed for a non-database reason
    #[error("store error: {0}")]
    Store(String),

    /// Persisted data that cannot be interpreted (e.g. unknown status string)
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    /// Subscription operation rejected (e.g. subscribing to an inactive plan)
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Configuration problem detected at service construction
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for quota operations
pub type QuotaResult<T> = Result<T, QuotaError>;
