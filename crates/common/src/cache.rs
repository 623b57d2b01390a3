//! Generic TTL cache.
//!
//! [`CacheStore`] is the narrow get/set/delete contract the federation core
//! consumes. [`RedisCache`] stores entries in Redis, [`MemoryCache`] keeps
//! them in process, and [`LayeredCache`] prefers Redis while it is reachable
//! and falls back to the in-process map otherwise.

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::{ClientLike, KeysInterface};
use fred::types::Expiration;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::AppError;

/// Cache error type.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Redis(e) => Self::Redis(e),
            CacheError::Serialization(e) => Self::Internal(e),
        }
    }
}

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store an entry that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Whether the backing store can currently serve requests.
    async fn is_available(&self) -> bool;
}

/// Read and deserialize a JSON entry.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CacheError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

/// Serialize and store a JSON entry.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    store.set(key, &raw, ttl).await
}

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCache {
    redis: Arc<RedisClient>,
    prefix: String,
}

impl RedisCache {
    /// Create a cache whose keys are namespaced under `prefix`.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.redis
            .get::<Option<String>, _>(self.key(key))
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let secs = ttl.as_secs().max(1) as i64;
        self.redis
            .set::<(), _, _>(self.key(key), value, Some(Expiration::EX(secs)), None, false)
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.redis
            .del::<(), _>(self.key(key))
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))
    }

    async fn is_available(&self) -> bool {
        self.redis.is_connected()
    }
}

/// In-process cache.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop expired entries and return how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > Instant::now() => {
                    return Ok(Some(value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Cache that prefers an external store and degrades to process memory.
#[derive(Clone)]
pub struct LayeredCache {
    primary: Option<Arc<dyn CacheStore>>,
    fallback: MemoryCache,
}

impl LayeredCache {
    /// Layer `primary` over an in-process map.
    #[must_use]
    pub fn new(primary: Arc<dyn CacheStore>) -> Self {
        Self {
            primary: Some(primary),
            fallback: MemoryCache::new(),
        }
    }

    /// A cache with no external store.
    #[must_use]
    pub fn memory_only() -> Self {
        Self {
            primary: None,
            fallback: MemoryCache::new(),
        }
    }

    async fn live_primary(&self) -> Option<&Arc<dyn CacheStore>> {
        match &self.primary {
            Some(primary) if primary.is_available().await => Some(primary),
            _ => None,
        }
    }

    /// Drop every in-process entry.
    pub async fn clear_local(&self) {
        self.fallback.clear().await;
    }
}

#[async_trait]
impl CacheStore for LayeredCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(primary) = self.live_primary().await {
            match primary.get(key).await {
                Ok(value) => return Ok(value),
                Err(e) => warn!(error = %e, key = %key, "Cache read failed, using local fallback"),
            }
        }
        self.fallback.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if let Some(primary) = self.live_primary().await {
            match primary.set(key, value, ttl).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, key = %key, "Cache write failed, using local fallback"),
            }
        }
        debug!(key = %key, "Caching entry in process");
        self.fallback.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if let Some(primary) = self.live_primary().await
            && let Err(e) = primary.delete(key).await
        {
            warn!(error = %e, key = %key, "Cache delete failed");
        }
        self.fallback.delete(key).await
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Redis("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Redis("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Redis("connection refused".into()))
        }
        async fn is_available(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_memory_cache_expiry() {
        let cache = MemoryCache::new();
        cache.set("a", "1", Duration::from_millis(20)).await.unwrap();
        cache.set("b", "2", Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap().as_deref(), Some("2"));

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_layered_cache_falls_back_when_primary_down() {
        let cache = LayeredCache::new(Arc::new(DownStore));
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = MemoryCache::new();
        set_json(&cache, "n", &vec![1, 2, 3], Duration::from_secs(5))
            .await
            .unwrap();
        let value: Option<Vec<i32>> = get_json(&cache, "n").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }
}
