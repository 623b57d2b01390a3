//! Custom emoji repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fedi_common::{AppError, AppResult};
use tokio::sync::RwLock;

use crate::entities::emoji;

/// Custom emoji storage contract, keyed by (name, host).
#[async_trait]
pub trait EmojiRepository: Send + Sync {
    /// Find an emoji by shortcode and origin host (`None` = local).
    async fn find_by_name_and_host(
        &self,
        name: &str,
        host: Option<&str>,
    ) -> AppResult<Option<emoji::Model>>;

    /// Insert an emoji. Fails with `Conflict` when (name, host) is taken.
    async fn create(&self, model: emoji::Model) -> AppResult<emoji::Model>;

    /// Replace the image URL of an emoji.
    async fn update_url(&self, id: &str, url: &str) -> AppResult<emoji::Model>;
}

/// In-memory emoji repository.
#[derive(Clone, Default)]
pub struct InMemoryEmojiRepository {
    rows: Arc<RwLock<HashMap<String, emoji::Model>>>,
}

#[async_trait]
impl EmojiRepository for InMemoryEmojiRepository {
    async fn find_by_name_and_host(
        &self,
        name: &str,
        host: Option<&str>,
    ) -> AppResult<Option<emoji::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|e| e.name == name && e.host.as_deref() == host)
            .cloned())
    }

    async fn create(&self, model: emoji::Model) -> AppResult<emoji::Model> {
        let mut rows = self.rows.write().await;
        if rows
            .values()
            .any(|e| e.name == model.name && e.host == model.host)
        {
            return Err(AppError::Conflict(format!("Emoji already exists: {}", model.name)));
        }
        rows.insert(model.id.clone(), model.clone());
        Ok(model)
    }

    async fn update_url(&self, id: &str, url: &str) -> AppResult<emoji::Model> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Emoji not found: {id}")))?;
        row.url = url.to_string();
        row.updated_at = Some(Utc::now());
        Ok(row.clone())
    }
}
