//! Store interfaces
//!
//! The quota manager talks to persistence through these traits so the
//! serving path and the sweep can be exercised against in-memory doubles.
//! Postgres implementations live in [`postgres`].
//!
//! Contract notes (shared with the out-of-scope collaborators):
//! - subscription writes are last-writer-wins, no optimistic lock assumed;
//! - `count_active` is always a fresh read, never a maintained counter;
//! - `list_newest_first` ordering is stable (`created_at` then id) so a
//!   repeated or overlapping trim cannot over-delete.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::QuotaResult;
use crate::subscription::Subscription;

pub mod postgres;

#[cfg(test)]
pub mod memory;

/// Access to the subscription state embedded in the account entity
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Read an account's subscription; `None` for unknown accounts (the
    /// caller degrades to the default plan).
    async fn get(&self, account_id: Uuid) -> QuotaResult<Option<Subscription>>;

    /// Persist the subscription state (last-writer-wins).
    async fn save(&self, account_id: Uuid, sub: &Subscription) -> QuotaResult<()>;

    /// Accounts on `default_plan` whose grace deadline has already passed.
    async fn find_grace_expired(
        &self,
        default_plan: &str,
        now: OffsetDateTime,
    ) -> QuotaResult<Vec<Uuid>>;

    /// Accounts whose trial or billing boundary has passed and whose
    /// status still reflects the old window.
    async fn find_expired(&self, now: OffsetDateTime) -> QuotaResult<Vec<Uuid>>;

    /// Close the grace window without touching any other field.
    async fn clear_grace(&self, account_id: Uuid) -> QuotaResult<()>;
}

/// Access to listings (the quota-limited resource)
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fresh count of the account's non-deleted listings.
    async fn count_active(&self, account_id: Uuid) -> QuotaResult<i64>;

    /// Ids of the account's `n` newest non-deleted listings, ordered
    /// newest first with a stable id tie-break.
    async fn list_newest_first(&self, account_id: Uuid, n: i64) -> QuotaResult<Vec<Uuid>>;

    /// Object-storage keys of the listing's attached media.
    async fn artifact_keys(&self, resource_id: Uuid) -> QuotaResult<Vec<String>>;

    /// Remove the listing record (and its media rows).
    async fn delete(&self, resource_id: Uuid) -> QuotaResult<()>;
}
