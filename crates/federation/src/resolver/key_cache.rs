//! In-process caches consulted before any remote key fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fedi_common::config::ResolverConfig;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

use crate::signature::actor_url_from_key_id;

/// Default time a fetched public key stays valid.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
struct CachedKey {
    pem: String,
    expires_at: Instant,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyCacheStats {
    /// Stored keys, expired ones included until pruned.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed or found an expired key.
    pub misses: u64,
}

/// Public keys by key id.
#[derive(Clone)]
pub struct PublicKeyCache {
    entries: Arc<RwLock<HashMap<String, CachedKey>>>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl Default for PublicKeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_TTL)
    }
}

impl PublicKeyCache {
    /// An empty cache whose keys live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Look up a live key.
    pub async fn get(&self, key_id: &str) -> Option<String> {
        let entries = self.entries.read().await;
        match entries.get(key_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.pem.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a key, replacing any previous one for the same id.
    pub async fn insert(&self, key_id: &str, pem: &str) {
        self.entries.write().await.insert(
            key_id.to_string(),
            CachedKey {
                pem: pem.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop a single key.
    pub async fn invalidate(&self, key_id: &str) {
        self.entries.write().await.remove(key_id);
    }

    /// Drop every key belonging to an actor, e.g. after it rotated keys.
    pub async fn invalidate_actor(&self, actor_url: &str) {
        self.entries
            .write()
            .await
            .retain(|key_id, _| actor_url_from_key_id(key_id) != actor_url);
    }

    /// Drop every key and reset the counters.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Remove expired keys, returning how many were dropped.
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Current size and hit/miss counters.
    pub async fn stats(&self) -> KeyCacheStats {
        KeyCacheStats {
            entries: self.entries.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Why the last fetch of an actor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No response within the fetch timeout.
    Timeout,
    /// 5xx, 429 or a transport error.
    ServerError,
    /// 404, 410 or another 4xx.
    PermanentError,
}

impl FailureKind {
    /// Classify a fetch failure by HTTP status. `None` means no response arrived
    /// for a reason other than a timeout.
    #[must_use]
    pub const fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(404 | 410) => Self::PermanentError,
            Some(429) => Self::ServerError,
            Some(400..=499) => Self::PermanentError,
            _ => Self::ServerError,
        }
    }

    /// A permanent failure means the sender is not going to become resolvable soon.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::PermanentError)
    }

    /// Name used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::PermanentError => "permanent_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long each kind of failure suppresses further fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTtls {
    /// For [`FailureKind::Timeout`].
    pub timeout: Duration,
    /// For [`FailureKind::ServerError`].
    pub server_error: Duration,
    /// For [`FailureKind::PermanentError`].
    pub permanent_error: Duration,
}

impl Default for FailureTtls {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            server_error: Duration::from_secs(120),
            permanent_error: Duration::from_secs(600),
        }
    }
}

impl FailureTtls {
    /// TTLs from the `resolver` config section.
    #[must_use]
    pub const fn from_config(config: &ResolverConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_ttl_secs),
            server_error: Duration::from_secs(config.server_error_ttl_secs),
            permanent_error: Duration::from_secs(config.permanent_error_ttl_secs),
        }
    }

    /// TTL applied to a failure of `kind`.
    #[must_use]
    pub const fn for_kind(&self, kind: FailureKind) -> Duration {
        match kind {
            FailureKind::Timeout => self.timeout,
            FailureKind::ServerError => self.server_error,
            FailureKind::PermanentError => self.permanent_error,
        }
    }

    /// Permanent failures must be remembered longest and timeouts shortest.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.permanent_error > self.server_error && self.server_error > self.timeout
    }
}

/// A remembered fetch failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    /// How the fetch failed.
    pub kind: FailureKind,
    /// Error text of the failed fetch.
    pub message: String,
    /// When the actor may be fetched again.
    pub expires_at: Instant,
}

/// Recent fetch failures by actor URL.
#[derive(Clone, Default)]
pub struct FailureCache {
    entries: Arc<RwLock<HashMap<String, FailureEntry>>>,
    ttls: FailureTtls,
}

impl FailureCache {
    /// An empty cache using `ttls` per failure kind.
    #[must_use]
    pub fn new(ttls: FailureTtls) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttls,
        }
    }

    /// TTLs in effect.
    #[must_use]
    pub const fn ttls(&self) -> &FailureTtls {
        &self.ttls
    }

    /// Live failure for an actor, if any. Expired entries are dropped on read.
    pub async fn get(&self, actor_url: &str) -> Option<FailureEntry> {
        {
            let entries = self.entries.read().await;
            match entries.get(actor_url) {
                Some(entry) if entry.expires_at > Instant::now() => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut entries = self.entries.write().await;
        // A failure recorded since the read above must survive.
        if entries
            .get(actor_url)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(actor_url);
        }
        None
    }

    /// Remember a failed fetch of `actor_url` for the TTL of `kind`.
    pub async fn record(&self, actor_url: &str, kind: FailureKind, message: impl Into<String>) {
        let entry = FailureEntry {
            kind,
            message: message.into(),
            expires_at: Instant::now() + self.ttls.for_kind(kind),
        };
        self.entries
            .write()
            .await
            .insert(actor_url.to_string(), entry);
    }

    /// Forget the failure recorded for an actor.
    pub async fn invalidate(&self, actor_url: &str) {
        self.entries.write().await.remove(actor_url);
    }

    /// Forget every failure.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Remove expired failures, returning how many were dropped.
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored failures, expired ones included until pruned.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no failure is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Prune expired keys and failures every `period`.
pub fn spawn_cache_pruner(
    keys: PublicKeyCache,
    failures: FailureCache,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let keys_dropped = keys.prune_expired().await;
            let failures_dropped = failures.prune_expired().await;
            if keys_dropped + failures_dropped > 0 {
                debug!(keys_dropped, failures_dropped, "Pruned resolver caches");
            }
        }
    })
}
