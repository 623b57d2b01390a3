//! Reaction repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fedi_common::{AppError, AppResult};
use tokio::sync::RwLock;

use crate::entities::reaction;

/// Reaction storage contract.
#[async_trait]
pub trait ReactionRepository: Send + Sync {
    /// Find the reaction a user left on a note with a given token.
    async fn find_by_user_note_and_reaction(
        &self,
        user_id: &str,
        note_id: &str,
        reaction: &str,
    ) -> AppResult<Option<reaction::Model>>;

    /// Find every reaction a user left on a note.
    async fn find_by_user_and_note(
        &self,
        user_id: &str,
        note_id: &str,
    ) -> AppResult<Vec<reaction::Model>>;

    /// Find a reaction by the activity that created it.
    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<reaction::Model>>;

    /// Insert a reaction. Fails with `Conflict` on a duplicate (user, note, reaction).
    async fn create(&self, model: reaction::Model) -> AppResult<reaction::Model>;

    /// Delete a reaction. Missing rows are ignored.
    async fn delete(&self, id: &str) -> AppResult<()>;

    /// Reactions on a note.
    async fn list_by_note(&self, note_id: &str) -> AppResult<Vec<reaction::Model>>;
}

/// In-memory reaction repository.
#[derive(Clone, Default)]
pub struct InMemoryReactionRepository {
    rows: Arc<RwLock<HashMap<String, reaction::Model>>>,
}

#[async_trait]
impl ReactionRepository for InMemoryReactionRepository {
    async fn find_by_user_note_and_reaction(
        &self,
        user_id: &str,
        note_id: &str,
        reaction: &str,
    ) -> AppResult<Option<reaction::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.user_id == user_id && r.note_id == note_id && r.reaction == reaction)
            .cloned())
    }

    async fn find_by_user_and_note(
        &self,
        user_id: &str,
        note_id: &str,
    ) -> AppResult<Vec<reaction::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.user_id == user_id && r.note_id == note_id)
            .cloned()
            .collect())
    }

    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<reaction::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.uri.as_deref() == Some(uri))
            .cloned())
    }

    async fn create(&self, model: reaction::Model) -> AppResult<reaction::Model> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|r| {
            r.user_id == model.user_id && r.note_id == model.note_id && r.reaction == model.reaction
        }) {
            return Err(AppError::Conflict("Reaction already exists".to_string()));
        }
        rows.insert(model.id.clone(), model.clone());
        Ok(model)
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.rows.write().await.remove(id);
        Ok(())
    }

    async fn list_by_note(&self, note_id: &str) -> AppResult<Vec<reaction::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.note_id == note_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reaction(id: &str, token: &str) -> reaction::Model {
        reaction::Model {
            id: id.to_string(),
            user_id: "u".to_string(),
            note_id: "n".to_string(),
            reaction: token.to_string(),
            uri: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unique_per_user_note_token() {
        let repo = InMemoryReactionRepository::default();
        repo.create(reaction("1", "👍")).await.unwrap();
        repo.create(reaction("2", ":blob@remote.example:")).await.unwrap();

        assert!(matches!(
            repo.create(reaction("3", "👍")).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(repo.find_by_user_and_note("u", "n").await.unwrap().len(), 2);
    }
}
