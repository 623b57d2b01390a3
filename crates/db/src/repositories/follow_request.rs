//! Follow request repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fedi_common::{AppError, AppResult};
use tokio::sync::RwLock;

use crate::entities::follow_request;

/// Follow request storage contract.
#[async_trait]
pub trait FollowRequestRepository: Send + Sync {
    /// Find a pending request.
    async fn find_by_pair(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> AppResult<Option<follow_request::Model>>;

    /// Insert a request. Fails with `Conflict` if one is pending.
    async fn create(&self, model: follow_request::Model) -> AppResult<follow_request::Model>;

    /// Remove a request. Returns whether one existed.
    async fn delete_by_pair(&self, follower_id: &str, followee_id: &str) -> AppResult<bool>;
}

/// In-memory follow request repository.
#[derive(Clone, Default)]
pub struct InMemoryFollowRequestRepository {
    rows: Arc<RwLock<HashMap<(String, String), follow_request::Model>>>,
}

#[async_trait]
impl FollowRequestRepository for InMemoryFollowRequestRepository {
    async fn find_by_pair(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> AppResult<Option<follow_request::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .get(&(follower_id.to_string(), followee_id.to_string()))
            .cloned())
    }

    async fn create(&self, model: follow_request::Model) -> AppResult<follow_request::Model> {
        let key = (model.follower_id.clone(), model.followee_id.clone());
        let mut rows = self.rows.write().await;
        if rows.contains_key(&key) {
            return Err(AppError::Conflict("Follow request already pending".to_string()));
        }
        rows.insert(key, model.clone());
        Ok(model)
    }

    async fn delete_by_pair(&self, follower_id: &str, followee_id: &str) -> AppResult<bool> {
        Ok(self
            .rows
            .write()
            .await
            .remove(&(follower_id.to_string(), followee_id.to_string()))
            .is_some())
    }
}
