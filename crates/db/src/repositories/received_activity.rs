//! Received activity ledger.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fedi_common::AppResult;
use tokio::sync::RwLock;

use crate::entities::received_activity;

/// Idempotency ledger for inbound activities.
#[async_trait]
pub trait ReceivedActivityRepository: Send + Sync {
    /// Whether an activity id has been recorded.
    async fn exists(&self, activity_id: &str) -> AppResult<bool>;

    /// Record an activity id. Returns `false` if it was already present.
    async fn record(&self, activity_id: &str) -> AppResult<bool>;

    /// Remove a recorded id so a redelivery is processed again.
    async fn forget(&self, activity_id: &str) -> AppResult<()>;
}

/// In-memory ledger.
#[derive(Clone, Default)]
pub struct InMemoryReceivedActivityRepository {
    rows: Arc<RwLock<HashMap<String, received_activity::Model>>>,
}

#[async_trait]
impl ReceivedActivityRepository for InMemoryReceivedActivityRepository {
    async fn exists(&self, activity_id: &str) -> AppResult<bool> {
        Ok(self.rows.read().await.contains_key(activity_id))
    }

    async fn record(&self, activity_id: &str) -> AppResult<bool> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(activity_id) {
            return Ok(false);
        }
        rows.insert(
            activity_id.to_string(),
            received_activity::Model {
                activity_id: activity_id.to_string(),
                received_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn forget(&self, activity_id: &str) -> AppResult<()> {
        self.rows.write().await.remove(activity_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let ledger = InMemoryReceivedActivityRepository::default();
        assert!(!ledger.exists("https://remote.example/a/1").await.unwrap());
        assert!(ledger.record("https://remote.example/a/1").await.unwrap());
        assert!(!ledger.record("https://remote.example/a/1").await.unwrap());
        assert!(ledger.exists("https://remote.example/a/1").await.unwrap());

        ledger.forget("https://remote.example/a/1").await.unwrap();
        assert!(!ledger.exists("https://remote.example/a/1").await.unwrap());
    }
}
