//! User keypair repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fedi_common::AppResult;
use tokio::sync::RwLock;

use crate::entities::user_keypair;

/// Signing key storage contract.
#[async_trait]
pub trait UserKeypairRepository: Send + Sync {
    /// Find the keypair of a local user.
    async fn find_by_user_id(&self, user_id: &str) -> AppResult<Option<user_keypair::Model>>;

    /// Store (or replace) a keypair.
    async fn save(&self, model: user_keypair::Model) -> AppResult<()>;
}

/// In-memory keypair repository.
#[derive(Clone, Default)]
pub struct InMemoryUserKeypairRepository {
    rows: Arc<RwLock<HashMap<String, user_keypair::Model>>>,
}

#[async_trait]
impl UserKeypairRepository for InMemoryUserKeypairRepository {
    async fn find_by_user_id(&self, user_id: &str) -> AppResult<Option<user_keypair::Model>> {
        Ok(self.rows.read().await.get(user_id).cloned())
    }

    async fn save(&self, model: user_keypair::Model) -> AppResult<()> {
        self.rows.write().await.insert(model.user_id.clone(), model);
        Ok(())
    }
}
