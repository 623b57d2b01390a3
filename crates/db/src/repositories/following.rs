//! Following repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fedi_common::{AppError, AppResult};
use tokio::sync::RwLock;

use crate::entities::following;

/// Following storage contract.
#[async_trait]
pub trait FollowingRepository: Send + Sync {
    /// Whether `follower_id` follows `followee_id`.
    async fn is_following(&self, follower_id: &str, followee_id: &str) -> AppResult<bool>;

    /// Insert a relationship. Fails with `Conflict` if it exists.
    async fn create(&self, model: following::Model) -> AppResult<following::Model>;

    /// Remove a relationship. Returns whether one existed.
    async fn delete_by_pair(&self, follower_id: &str, followee_id: &str) -> AppResult<bool>;
}

/// In-memory following repository.
#[derive(Clone, Default)]
pub struct InMemoryFollowingRepository {
    rows: Arc<RwLock<HashMap<(String, String), following::Model>>>,
}

#[async_trait]
impl FollowingRepository for InMemoryFollowingRepository {
    async fn is_following(&self, follower_id: &str, followee_id: &str) -> AppResult<bool> {
        Ok(self
            .rows
            .read()
            .await
            .contains_key(&(follower_id.to_string(), followee_id.to_string())))
    }

    async fn create(&self, model: following::Model) -> AppResult<following::Model> {
        let key = (model.follower_id.clone(), model.followee_id.clone());
        let mut rows = self.rows.write().await;
        if rows.contains_key(&key) {
            return Err(AppError::Conflict("Already following".to_string()));
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
