//! User repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fedi_common::{AppError, AppResult};
use tokio::sync::RwLock;

use crate::entities::user;

/// User storage contract.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a user by ID.
    async fn find_by_id(&self, id: &str) -> AppResult<Option<user::Model>>;

    /// Find a remote user by `ActivityPub` id.
    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<user::Model>>;

    /// Find a local user by username (case-insensitive).
    async fn find_local_by_username(&self, username: &str) -> AppResult<Option<user::Model>>;

    /// Insert a user. Fails with `Conflict` when the id or uri is taken.
    async fn create(&self, model: user::Model) -> AppResult<user::Model>;

    /// Apply a partial update.
    async fn update(&self, id: &str, changes: user::Changes) -> AppResult<user::Model>;
}

/// In-memory user repository.
#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    rows: Arc<RwLock<HashMap<String, user::Model>>>,
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<user::Model>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<user::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|u| u.uri.as_deref() == Some(uri))
            .cloned())
    }

    async fn find_local_by_username(&self, username: &str) -> AppResult<Option<user::Model>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|u| u.is_local() && u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn create(&self, model: user::Model) -> AppResult<user::Model> {
        let mut rows = self.rows.write().await;
        let duplicate_uri = model.uri.is_some()
            && rows.values().any(|u| u.uri.is_some() && u.uri == model.uri);
        if rows.contains_key(&model.id) || duplicate_uri {
            return Err(AppError::Conflict(format!("User already exists: {}", model.id)));
        }
        rows.insert(model.id.clone(), model.clone());
        Ok(model)
    }

    async fn update(&self, id: &str, changes: user::Changes) -> AppResult<user::Model> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))?;
        changes.apply(row);
        Ok(row.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_rejects_duplicate_uri() {
        let repo = InMemoryUserRepository::default();
        let mut a = user::Model::local("a", "alice");
        a.host = Some("remote.example".into());
        a.uri = Some("https://remote.example/users/alice".into());
        repo.create(a.clone()).await.unwrap();

        let mut b = a.clone();
        b.id = "b".into();
        assert!(matches!(repo.create(b).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_absent_fields() {
        let repo = InMemoryUserRepository::default();
        let mut model = user::Model::local("a", "alice");
        model.description = Some("bio".into());
        repo.create(model).await.unwrap();

        let updated = repo
            .update(
                "a",
                user::Changes {
                    name: Some("Alice".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name.as_deref(), Some("Alice"));
        assert_eq!(updated.description.as_deref(), Some("bio"));
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_find_local_by_username_ignores_remote() {
        let repo = InMemoryUserRepository::default();
        let mut remote = user::Model::local("r", "bob");
        remote.host = Some("remote.example".into());
        repo.create(remote).await.unwrap();
        repo.create(user::Model::local("l", "Bob")).await.unwrap();

        let found = repo.find_local_by_username("bob").await.unwrap().unwrap();
        assert_eq!(found.id, "l");
    }
}
