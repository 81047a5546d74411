//! External artifact cleanup
//!
//! Listings carry media stored in object storage. Deleting those objects
//! is best-effort: a failure is recorded and logged but never blocks the
//! rollback or trim that triggered it — an orphaned object is a lesser
//! failure than a listing that should not exist but does.

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::error::{QuotaError, QuotaResult};

/// Object storage holding listing media
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn delete_artifact(&self, key: &str) -> QuotaResult<()>;
}

/// Record of one best-effort cleanup pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Keys a deletion was attempted for
    pub attempted: Vec<String>,
    /// Keys whose deletion failed (left orphaned in object storage)
    pub failed: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete every key, collecting failures instead of propagating them.
pub async fn cleanup_artifacts(store: &dyn ArtifactStore, keys: Vec<String>) -> CleanupReport {
    let mut report = CleanupReport::default();
    for key in keys {
        if let Err(e) = store.delete_artifact(&key).await {
            warn!(artifact = %key, error = %e, "Artifact deletion failed, leaving orphan");
            report.failed.push(key.clone());
        }
        report.attempted.push(key);
    }
    report
}

/// Artifact store talking to the object-storage service over HTTP
#[derive(Clone)]
pub struct HttpArtifactStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpArtifactStore {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Build from `ARTIFACT_STORE_URL` / `ARTIFACT_STORE_TOKEN`.
    pub fn from_env() -> QuotaResult<Self> {
        let base_url = std::env::var("ARTIFACT_STORE_URL")
            .map_err(|_| QuotaError::Config("ARTIFACT_STORE_URL must be set".to_string()))?;
        let token = std::env::var("ARTIFACT_STORE_TOKEN").unwrap_or_default();
        Ok(Self::new(base_url, token))
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn delete_artifact(&self, key: &str) -> QuotaResult<()> {
        let url = format!("{}/objects/{}", self.base_url, key);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| QuotaError::Store(format!("artifact delete request failed: {e}")))?;

        // 404 is success for a delete: the object is already gone.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(QuotaError::Store(format!(
                "artifact delete returned {} for {key}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryArtifactStore;

    #[tokio::test]
    async fn cleanup_records_every_attempt() {
        let store = MemoryArtifactStore::new();
        let report = cleanup_artifacts(&store, vec!["a.jpg".into(), "b.jpg".into()]).await;
        assert_eq!(report.attempted.len(), 2);
        assert!(report.is_clean());
        assert_eq!(store.deleted(), vec!["a.jpg".to_string(), "b.jpg".to_string()]);
    }

    #[tokio::test]
    async fn cleanup_swallows_failures_and_continues() {
        let store = MemoryArtifactStore::new();
        store.fail_key("b.jpg");
        let report =
            cleanup_artifacts(&store, vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()]).await;
        assert_eq!(report.attempted.len(), 3);
        assert_eq!(report.failed, vec!["b.jpg".to_string()]);
        assert!(!report.is_clean());
        // The ones after the failure were still attempted
        assert!(store.deleted().contains(&"c.jpg".to_string()));
    }

    #[tokio::test]
    async fn cleanup_of_nothing_is_clean() {
        let store = MemoryArtifactStore::new();
        let report = cleanup_artifacts(&store, vec![]).await;
        assert!(report.is_clean());
        assert!(report.attempted.is_empty());
    }
}
