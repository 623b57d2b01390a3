//! Note repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fedi_common::{AppError, AppResult};
use tokio::sync::RwLock;

use crate::entities::note;

/// Note storage contract.
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Find a note by ID, tombstones included.
    async fn find_by_id(&self, id: &str) -> AppResult<Option<note::Model>>;

    /// Find a remote note by `ActivityPub` id, tombstones included.
    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<note::Model>>;

    /// Insert a note. Fails with `Conflict` when the id or uri is taken.
    async fn create(&self, model: note::Model) -> AppResult<note::Model>;

    /// Apply a partial update.
    async fn update(&self, id: &str, changes: note::Changes) -> AppResult<note::Model>;

    /// Mark a note deleted. Deleting a tombstone again is a no-op.
    async fn soft_delete(&self, id: &str) -> AppResult<()>;
}

/// In-memory note repository.
#[derive(Clone, Default)]
pub struct InMemoryNoteRepository {
    rows: Arc<RwLock<HashMap<String, note::Model>>>,
}

#[async_trait]
impl NoteRepository for InMemoryNoteRepository {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<note::Model>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<note::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|n| n.uri.as_deref() == Some(uri))
            .cloned())
    }

    async fn create(&self, model: note::Model) -> AppResult<note::Model> {
        let mut rows = self.rows.write().await;
        let duplicate_uri = model.uri.is_some()
            && rows.values().any(|n| n.uri.is_some() && n.uri == model.uri);
        if rows.contains_key(&model.id) || duplicate_uri {
            return Err(AppError::Conflict(format!("Note already exists: {}", model.id)));
        }
        rows.insert(model.id.clone(), model.clone());
        Ok(model)
    }

    async fn update(&self, id: &str, changes: note::Changes) -> AppResult<note::Model> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| AppError::NoteNotFound(id.to_string()))?;
        changes.apply(row);
        Ok(row.clone())
    }

    async fn soft_delete(&self, id: &str) -> AppResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| AppError::NoteNotFound(id.to_string()))?;
        if row.deleted_at.is_none() {
            row.deleted_at = Some(Utc::now());
        }
        Ok(())
    }
}
