//! Postgres store implementations
//!
//! Subscription state lives as columns on `accounts`; listings and their
//! media rows are separate tables. See `migrations/0001_quota_schema.sql`.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::QuotaResult;
use crate::subscription::{parse_status, Subscription};

use super::{ResourceStore, SubscriptionStore};

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    plan: String,
    subscription_status: String,
    trial_ends_at: Option<OffsetDateTime>,
    current_period_start: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    grace_until: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
    cancel_at: Option<OffsetDateTime>,
    canceled_at: Option<OffsetDateTime>,
}

impl SubscriptionRow {
    fn into_subscription(self) -> QuotaResult<Subscription> {
        Ok(Subscription {
            plan: self.plan,
            status: parse_status(&self.subscription_status)?,
            trial_ends_at: self.trial_ends_at,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            grace_until: self.grace_until,
            cancel_at_period_end: self.cancel_at_period_end,
            cancel_at: self.cancel_at,
            canceled_at: self.canceled_at,
        })
    }
}

/// Subscription store over the `accounts` table
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn get(&self, account_id: Uuid) -> QuotaResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT plan, subscription_status, trial_ends_at,
                   current_period_start, current_period_end, grace_until,
                   cancel_at_period_end, cancel_at, canceled_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubscriptionRow::into_subscription).transpose()
    }

    async fn save(&self, account_id: Uuid, sub: &Subscription) -> QuotaResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET plan = $2,
                subscription_status = $3,
                trial_ends_at = $4,
                current_period_start = $5,
                current_period_end = $6,
                grace_until = $7,
                cancel_at_period_end = $8,
                cancel_at = $9,
                canceled_at = $10
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(&sub.plan)
        .bind(sub.status.as_str())
        .bind(sub.trial_ends_at)
        .bind(sub.current_period_start)
        .bind(sub.current_period_end)
        .bind(sub.grace_until)
        .bind(sub.cancel_at_period_end)
        .bind(sub.cancel_at)
        .bind(sub.canceled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_grace_expired(
        &self,
        default_plan: &str,
        now: OffsetDateTime,
    ) -> QuotaResult<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM accounts
            WHERE plan = $1
              AND grace_until IS NOT NULL
              AND grace_until < $2
            "#,
        )
        .bind(default_plan)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn find_expired(&self, now: OffsetDateTime) -> QuotaResult<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM accounts
            WHERE (subscription_status = 'trialing' AND trial_ends_at <= $1)
               OR (subscription_status = 'active' AND current_period_end <= $1)
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn clear_grace(&self, account_id: Uuid) -> QuotaResult<()> {
        sqlx::query("UPDATE accounts SET grace_until = NULL WHERE id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Listing store over the `listings` / `listing_media` tables
#[derive(Clone)]
pub struct PgResourceStore {
    pool: PgPool,
}

impl PgResourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn count_active(&self, account_id: Uuid) -> QuotaResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM listings
            WHERE account_id = $1
              AND status != 'deleted'
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_newest_first(&self, account_id: Uuid, n: i64) -> QuotaResult<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM listings
            WHERE account_id = $1
              AND status != 'deleted'
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn artifact_keys(&self, resource_id: Uuid) -> QuotaResult<Vec<String>> {
        let keys: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT object_key
            FROM listing_media
            WHERE listing_id = $1
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys.into_iter().map(|(key,)| key).collect())
    }

    async fn delete(&self, resource_id: Uuid) -> QuotaResult<()> {
        // Media rows first, then the listing itself.
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM listing_media WHERE listing_id = $1")
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
