//! Notification service.

use std::sync::Arc;

use async_trait::async_trait;
use fedi_common::AppResult;
use tokio::sync::RwLock;

use crate::entities::notification;

/// Best-effort notification sink.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Record a notification.
    async fn create(&self, model: notification::Model) -> AppResult<()>;

    /// Notifications addressed to a user, oldest first.
    async fn list_for(&self, notifiee_id: &str) -> AppResult<Vec<notification::Model>>;
}

/// In-memory notification service.
#[derive(Clone, Default)]
pub struct InMemoryNotificationService {
    rows: Arc<RwLock<Vec<notification::Model>>>,
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn create(&self, model: notification::Model) -> AppResult<()> {
        self.rows.write().await.push(model);
        Ok(())
    }

    async fn list_for(&self, notifiee_id: &str) -> AppResult<Vec<notification::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|n| n.notifiee_id == notifiee_id)
            .cloned()
            .collect())
    }
}
