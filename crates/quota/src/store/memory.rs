//! In-memory store doubles for tests
//!
//! Behaviorally equivalent to the Postgres implementations, with failure
//! injection for the isolation and best-effort-cleanup tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::error::{QuotaError, QuotaResult};
use crate::subscription::Subscription;

use super::{ResourceStore, SubscriptionStore};

use souq_shared::SubscriptionStatus;

#[derive(Default)]
pub struct MemorySubscriptionStore {
    subs: Mutex<HashMap<Uuid, Subscription>>,
    fail_accounts: Mutex<HashSet<Uuid>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account_id: Uuid, sub: Subscription) {
        self.subs.lock().unwrap().insert(account_id, sub);
    }

    /// Make every store call for this account fail.
    pub fn fail_for(&self, account_id: Uuid) {
        self.fail_accounts.lock().unwrap().insert(account_id);
    }

    pub fn get_sync(&self, account_id: Uuid) -> Option<Subscription> {
        self.subs.lock().unwrap().get(&account_id).cloned()
    }

    fn check_failure(&self, account_id: Uuid) -> QuotaResult<()> {
        if self.fail_accounts.lock().unwrap().contains(&account_id) {
            return Err(QuotaError::Store(format!(
                "injected failure for account {account_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn get(&self, account_id: Uuid) -> QuotaResult<Option<Subscription>> {
        self.check_failure(account_id)?;
        Ok(self.get_sync(account_id))
    }

    async fn save(&self, account_id: Uuid, sub: &Subscription) -> QuotaResult<()> {
        self.check_failure(account_id)?;
        self.insert(account_id, sub.clone());
        Ok(())
    }

    async fn find_grace_expired(
        &self,
        default_plan: &str,
        now: OffsetDateTime,
    ) -> QuotaResult<Vec<Uuid>> {
        let subs = self.subs.lock().unwrap();
        let mut ids: Vec<Uuid> = subs
            .iter()
            .filter(|(_, sub)| {
                sub.plan == default_plan && sub.grace_until.is_some_and(|until| until < now)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn find_expired(&self, now: OffsetDateTime) -> QuotaResult<Vec<Uuid>> {
        let subs = self.subs.lock().unwrap();
        let mut ids: Vec<Uuid> = subs
            .iter()
            .filter(|(_, sub)| match sub.status {
                SubscriptionStatus::Trialing => sub.trial_ends_at.is_some_and(|t| t <= now),
                SubscriptionStatus::Active => sub.current_period_end.is_some_and(|t| t <= now),
                _ => false,
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn clear_grace(&self, account_id: Uuid) -> QuotaResult<()> {
        self.check_failure(account_id)?;
        if let Some(sub) = self.subs.lock().unwrap().get_mut(&account_id) {
            sub.grace_until = None;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredListing {
    id: Uuid,
    account_id: Uuid,
    created_at: OffsetDateTime,
    artifacts: Vec<String>,
}

#[derive(Default)]
pub struct MemoryResourceStore {
    listings: Mutex<Vec<StoredListing>>,
    fail_accounts: Mutex<HashSet<Uuid>>,
    stall_accounts: Mutex<HashSet<Uuid>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listing(
        &self,
        account_id: Uuid,
        created_at: OffsetDateTime,
        artifacts: Vec<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.listings.lock().unwrap().push(StoredListing {
            id,
            account_id,
            created_at,
            artifacts,
        });
        id
    }

    /// Make count/list/delete calls for this account's listings fail.
    pub fn fail_for(&self, account_id: Uuid) {
        self.fail_accounts.lock().unwrap().insert(account_id);
    }

    /// Make `count_active` for this account hang until the caller gives up.
    pub fn stall_for(&self, account_id: Uuid) {
        self.stall_accounts.lock().unwrap().insert(account_id);
    }

    pub fn contains(&self, resource_id: Uuid) -> bool {
        self.listings
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.id == resource_id)
    }

    /// Ids of the account's live listings, oldest first.
    pub fn live_ids(&self, account_id: Uuid) -> Vec<Uuid> {
        let mut listings: Vec<StoredListing> = self
            .listings
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.account_id == account_id)
            .cloned()
            .collect();
        listings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        listings.into_iter().map(|l| l.id).collect()
    }

    fn check_failure(&self, account_id: Uuid) -> QuotaResult<()> {
        if self.fail_accounts.lock().unwrap().contains(&account_id) {
            return Err(QuotaError::Store(format!(
                "injected failure for account {account_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn count_active(&self, account_id: Uuid) -> QuotaResult<i64> {
        if self.stall_accounts.lock().unwrap().contains(&account_id) {
            std::future::pending::<()>().await;
        }
        self.check_failure(account_id)?;
        let count = self
            .listings
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.account_id == account_id)
            .count();
        Ok(count as i64)
    }

    async fn list_newest_first(&self, account_id: Uuid, n: i64) -> QuotaResult<Vec<Uuid>> {
        self.check_failure(account_id)?;
        let mut listings: Vec<StoredListing> = self
            .listings
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.account_id == account_id)
            .cloned()
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(listings
            .into_iter()
            .take(n.max(0) as usize)
            .map(|l| l.id)
            .collect())
    }

    async fn artifact_keys(&self, resource_id: Uuid) -> QuotaResult<Vec<String>> {
        Ok(self
            .listings
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.id == resource_id)
            .map(|l| l.artifacts.clone())
            .unwrap_or_default())
    }

    async fn delete(&self, resource_id: Uuid) -> QuotaResult<()> {
        let mut listings = self.listings.lock().unwrap();
        if let Some(listing) = listings.iter().find(|l| l.id == resource_id) {
            if self
                .fail_accounts
                .lock()
                .unwrap()
                .contains(&listing.account_id)
            {
                return Err(QuotaError::Store(format!(
                    "injected failure for account {}",
                    listing.account_id
                )));
            }
        }
        listings.retain(|l| l.id != resource_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    deleted: Mutex<Vec<String>>,
    fail_keys: Mutex<HashSet<String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_key(&self, key: &str) {
        self.fail_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn delete_artifact(&self, key: &str) -> QuotaResult<()> {
        if self.fail_keys.lock().unwrap().contains(key) {
            return Err(QuotaError::Store(format!("injected failure for {key}")));
        }
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}
