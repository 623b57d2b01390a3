//! Remote actor resolution.
//!
//! [`ActorResolver`] turns key ids into public keys and actor URIs into local
//! user rows. Every network fetch goes through the same path: consult the
//! failure cache, try an unsigned GET, retry once signed with the instance
//! actor's key when the remote demands authorized fetch, and classify any
//! failure so the next caller can fail fast.

mod document;
mod key_cache;

pub use document::{RemoteActor, extract_public_key};
pub use key_cache::{
    DEFAULT_KEY_TTL, FailureCache, FailureEntry, FailureKind, FailureTtls, KeyCacheStats,
    PublicKeyCache, spawn_cache_pruner,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fedi_common::cache::{self, CacheStore};
use fedi_common::config::ResolverConfig;
use fedi_common::{AppError, IdGenerator};
use fedi_db::entities::user;
use fedi_db::repositories::UserRepository;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{ActorFetch, ApClientError};
use crate::signature::{HttpSigner, actor_url_from_key_id};

/// Error type for actor resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Recent {kind} fetching actor: {message}")]
    CachedFailure { kind: FailureKind, message: String },

    #[error("Failed to fetch actor ({kind}): {source}")]
    Fetch {
        kind: FailureKind,
        #[source]
        source: ApClientError,
    },

    #[error("No usable public key for {0}")]
    MissingKey(String),

    #[error("Invalid actor document: {0}")]
    InvalidActor(String),

    #[error(transparent)]
    Repository(#[from] AppError),
}

impl ResolveError {
    /// Failure category, for errors caused by fetching.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::CachedFailure { kind, .. } | Self::Fetch { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether the remote side could plausibly succeed on a later attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CachedFailure { kind, .. } | Self::Fetch { kind, .. } => !kind.is_permanent(),
            Self::MissingKey(_) | Self::InvalidActor(_) => false,
            Self::Repository(e) => e.is_server_error(),
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Repository(e) => e,
            ResolveError::MissingKey(_) => Self::Unauthorized(err.to_string()),
            ResolveError::InvalidActor(_) => Self::BadRequest(err.to_string()),
            _ if err.is_transient() => Self::Federation(err.to_string()),
            _ => Self::RemoteGone(err.to_string()),
        }
    }
}

fn classify(err: &ApClientError) -> FailureKind {
    match err {
        ApClientError::Timeout(_) => FailureKind::Timeout,
        ApClientError::InvalidUrl(_) => FailureKind::PermanentError,
        other => FailureKind::from_status(other.status()),
    }
}

fn document_key(actor_url: &str) -> String {
    format!("remote_actor:{actor_url}")
}

/// Resolves remote keys and actors, with caching.
#[derive(Clone)]
pub struct ActorResolver {
    fetcher: Arc<dyn ActorFetch>,
    users: Arc<dyn UserRepository>,
    documents: Arc<dyn CacheStore>,
    keys: PublicKeyCache,
    failures: FailureCache,
    system_signer: Option<HttpSigner>,
    document_ttl: Duration,
    id_gen: IdGenerator,
}

impl ActorResolver {
    /// Create a resolver. Actor documents are kept in `documents` for as
    /// long as public keys are.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ActorFetch>,
        users: Arc<dyn UserRepository>,
        documents: Arc<dyn CacheStore>,
        config: &ResolverConfig,
    ) -> Self {
        let key_ttl = Duration::from_secs(config.key_ttl_secs);
        Self {
            fetcher,
            users,
            documents,
            keys: PublicKeyCache::new(key_ttl),
            failures: FailureCache::new(FailureTtls::from_config(config)),
            system_signer: None,
            document_ttl: key_ttl,
            id_gen: IdGenerator::new(),
        }
    }

    /// Sign authorized-fetch retries with the instance actor's key.
    #[must_use]
    pub fn with_system_signer(mut self, signer: HttpSigner) -> Self {
        self.system_signer = Some(signer);
        self
    }

    #[must_use]
    pub const fn key_cache(&self) -> &PublicKeyCache {
        &self.keys
    }

    #[must_use]
    pub const fn failure_cache(&self) -> &FailureCache {
        &self.failures
    }

    /// Public key PEM for a key id.
    pub async fn fetch_public_key(&self, key_id: &str) -> Result<String, ResolveError> {
        if let Some(pem) = self.keys.get(key_id).await {
            return Ok(pem);
        }

        let actor_url = actor_url_from_key_id(key_id);
        let document = self.load_document(&actor_url).await?;
        let (_, pem) = extract_public_key(&document, Some(key_id))
            .ok_or_else(|| ResolveError::MissingKey(key_id.to_string()))?;

        self.keys.insert(key_id, &pem).await;
        debug!(key_id = %key_id, "Cached remote public key");
        Ok(pem)
    }

    /// Find the local row for a remote actor, creating or refreshing it from
    /// the actor document when the cached copy has expired.
    ///
    /// A stale row is returned as-is when the refresh fails.
    pub async fn resolve_actor(&self, actor_uri: &str) -> Result<user::Model, ResolveError> {
        let existing = self.users.find_by_uri(actor_uri).await?;
        let cached = self.cached_document(actor_uri).await;

        if let (Some(user), Some(_)) = (&existing, &cached) {
            return Ok(user.clone());
        }

        let document = match cached {
            Some(document) => document,
            None => match self.load_document(actor_uri).await {
                Ok(document) => document,
                Err(e) => {
                    if let Some(user) = existing {
                        warn!(actor = %actor_uri, error = %e, "Refresh failed, using stored actor");
                        return Ok(user);
                    }
                    return Err(e);
                }
            },
        };

        let remote = RemoteActor::from_json(&document)
            .ok_or_else(|| ResolveError::InvalidActor(actor_uri.to_string()))?;
        if remote.id != actor_uri {
            return Err(ResolveError::InvalidActor(format!(
                "{actor_uri} served a document for {}",
                remote.id
            )));
        }

        match existing {
            Some(user) => self.refresh_user(user, remote).await,
            None => self.create_user(remote).await,
        }
    }

    /// Forget everything cached about an actor.
    pub async fn invalidate_actor(&self, actor_url: &str) {
        self.keys.invalidate_actor(actor_url).await;
        self.failures.invalidate(actor_url).await;
        if let Err(e) = self.documents.delete(&document_key(actor_url)).await {
            warn!(actor = %actor_url, error = %e, "Failed to drop cached actor document");
        }
    }

    /// Empty the key and failure caches.
    pub async fn clear(&self) {
        self.keys.clear().await;
        self.failures.clear().await;
    }

    async fn cached_document(&self, actor_url: &str) -> Option<Value> {
        match cache::get_json::<Value>(self.documents.as_ref(), &document_key(actor_url)).await {
            Ok(document) => document,
            Err(e) => {
                warn!(actor = %actor_url, error = %e, "Actor document cache read failed");
                None
            }
        }
    }

    async fn load_document(&self, actor_url: &str) -> Result<Value, ResolveError> {
        if let Some(failure) = self.failures.get(actor_url).await {
            debug!(actor = %actor_url, kind = %failure.kind, "Skipping fetch after recent failure");
            return Err(ResolveError::CachedFailure {
                kind: failure.kind,
                message: failure.message,
            });
        }

        match self.fetch_document(actor_url).await {
            Ok(document) => {
                if let Err(e) = cache::set_json(
                    self.documents.as_ref(),
                    &document_key(actor_url),
                    &document,
                    self.document_ttl,
                )
                .await
                {
                    warn!(actor = %actor_url, error = %e, "Failed to cache actor document");
                }
                Ok(document)
            }
            Err(source) => {
                let kind = classify(&source);
                warn!(actor = %actor_url, kind = %kind, error = %source, "Actor fetch failed");
                self.failures
                    .record(actor_url, kind, source.to_string())
                    .await;
                Err(ResolveError::Fetch { kind, source })
            }
        }
    }

    async fn fetch_document(&self, url: &str) -> Result<Value, ApClientError> {
        match self.fetcher.fetch(url, None).await {
            Err(e) if e.is_auth_required() => match &self.system_signer {
                Some(signer) => {
                    debug!(url = %url, "Remote requires authorized fetch, retrying signed");
                    self.fetcher.fetch(url, Some(signer)).await
                }
                None => Err(e),
            },
            other => other,
        }
    }

    async fn create_user(&self, remote: RemoteActor) -> Result<user::Model, ResolveError> {
        let uri = remote.id.clone();
        let model = user::Model {
            id: self.id_gen.generate(),
            username: remote.preferred_username,
            host: Some(remote.host),
            uri: Some(remote.id),
            inbox: Some(remote.inbox),
            shared_inbox: remote.shared_inbox,
            followers_url: remote.followers,
            name: remote.name,
            description: remote.summary,
            avatar_url: remote.icon,
            banner_url: remote.image,
            public_key_id: remote.public_key_id,
            public_key_pem: remote.public_key_pem,
            is_locked: remote.manually_approves_followers,
            created_at: Utc::now(),
            updated_at: None,
            last_fetched_at: Some(Utc::now()),
        };

        match self.users.create(model).await {
            Ok(created) => {
                info!(user_id = %created.id, uri = %uri, "Created remote user");
                Ok(created)
            }
            // Lost a race with a concurrent resolve of the same actor.
            Err(AppError::Conflict(_)) => self
                .users
                .find_by_uri(&uri)
                .await?
                .ok_or_else(|| ResolveError::InvalidActor(uri)),
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_user(
        &self,
        user: user::Model,
        remote: RemoteActor,
    ) -> Result<user::Model, ResolveError> {
        let changes = user::Changes {
            name: remote.name,
            description: remote.summary,
            avatar_url: remote.icon,
            banner_url: remote.image,
            inbox: Some(remote.inbox),
            shared_inbox: remote.shared_inbox,
            followers_url: remote.followers,
            public_key_id: remote.public_key_id,
            public_key_pem: remote.public_key_pem,
            is_locked: Some(remote.manually_approves_followers),
        };
        debug!(user_id = %user.id, "Refreshing remote user");
        Ok(self.users.update(&user.id, changes).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fedi_common::MemoryCache;
    use fedi_common::crypto::generate_rsa_keypair_with_bits;
    use fedi_db::repositories::InMemoryUserRepository;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Reply {
        Document(Value),
        Status(u16),
        Timeout,
        /// 401 unsigned, the document when signed
        RequiresSignature(Value),
    }

    #[derive(Default)]
    struct FakeFetch {
        replies: HashMap<String, Reply>,
        calls: Mutex<Vec<(String, bool)>>,
    }

    impl FakeFetch {
        fn with(mut self, url: &str, reply: Reply) -> Self {
            self.replies.insert(url.to_string(), reply);
            self
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActorFetch for FakeFetch {
        async fn fetch(
            &self,
            url: &str,
            signer: Option<&HttpSigner>,
        ) -> Result<Value, ApClientError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), signer.is_some()));
            let status = |status| ApClientError::Status {
                status,
                body: String::new(),
            };
            match self.replies.get(url).cloned() {
                Some(Reply::Document(doc)) => Ok(doc),
                Some(Reply::Status(code)) => Err(status(code)),
                Some(Reply::Timeout) => Err(ApClientError::Timeout("deadline".into())),
                Some(Reply::RequiresSignature(doc)) if signer.is_some() => Ok(doc),
                Some(Reply::RequiresSignature(_)) => Err(status(401)),
                None => Err(status(404)),
            }
        }
    }

    fn actor_doc(url: &str, pem: &str) -> Value {
        json!({
            "id": url,
            "type": "Person",
            "preferredUsername": "alice",
            "name": "Alice",
            "inbox": format!("{url}/inbox"),
            "publicKey": { "id": format!("{url}#main-key"), "owner": url, "publicKeyPem": pem }
        })
    }

    fn resolver(fetch: Arc<FakeFetch>) -> (ActorResolver, Arc<InMemoryUserRepository>) {
        let users = Arc::new(InMemoryUserRepository::default());
        let resolver = ActorResolver::new(
            fetch,
            users.clone(),
            Arc::new(MemoryCache::new()),
            &ResolverConfig::default(),
        );
        (resolver, users)
    }

    #[tokio::test]
    async fn test_key_is_cached_after_first_fetch() {
        let url = "https://remote.example/users/alice";
        let fetch = Arc::new(FakeFetch::default().with(url, Reply::Document(actor_doc(url, "PEM"))));
        let (resolver, _) = resolver(fetch.clone());

        let key_id = format!("{url}#main-key");
        assert_eq!(resolver.fetch_public_key(&key_id).await.unwrap(), "PEM");
        assert_eq!(resolver.fetch_public_key(&key_id).await.unwrap(), "PEM");

        assert_eq!(fetch.calls().len(), 1);
        assert_eq!(resolver.key_cache().stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_authorized_fetch_retries_signed() {
        let url = "https://secure.example/users/alice";
        let fetch = Arc::new(
            FakeFetch::default().with(url, Reply::RequiresSignature(actor_doc(url, "PEM"))),
        );
        let keypair = generate_rsa_keypair_with_bits(1024).unwrap();
        let signer = HttpSigner::new(
            &keypair.private_key_pem,
            "https://local.example/actor#main-key",
        )
        .unwrap();
        let (resolver, _) = resolver(fetch.clone());
        let resolver = resolver.with_system_signer(signer);

        let pem = resolver
            .fetch_public_key(&format!("{url}#main-key"))
            .await
            .unwrap();

        assert_eq!(pem, "PEM");
        assert_eq!(
            fetch.calls(),
            vec![(url.to_string(), false), (url.to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_auth_required_without_system_key_is_permanent() {
        let url = "https://secure.example/users/bob";
        let fetch = Arc::new(
            FakeFetch::default().with(url, Reply::RequiresSignature(actor_doc(url, "PEM"))),
        );
        let (resolver, _) = resolver(fetch);

        let err = resolver
            .fetch_public_key(&format!("{url}#main-key"))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::PermanentError));
    }

    #[tokio::test]
    async fn test_gone_actor_fails_fast_afterwards() {
        let url = "https://remote.example/users/gone";
        let fetch = Arc::new(FakeFetch::default().with(url, Reply::Status(410)));
        let (resolver, _) = resolver(fetch.clone());
        let key_id = format!("{url}#main-key");

        let first = resolver.fetch_public_key(&key_id).await.unwrap_err();
        assert!(matches!(first, ResolveError::Fetch { kind: FailureKind::PermanentError, .. }));

        let second = resolver.fetch_public_key(&key_id).await.unwrap_err();
        assert!(matches!(
            second,
            ResolveError::CachedFailure { kind: FailureKind::PermanentError, .. }
        ));
        assert_eq!(fetch.calls().len(), 1);

        resolver.clear().await;
        resolver.fetch_public_key(&key_id).await.unwrap_err();
        assert_eq!(fetch.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_and_server_error_classification() {
        let slow = "https://slow.example/users/a";
        let broken = "https://broken.example/users/a";
        let fetch = Arc::new(
            FakeFetch::default()
                .with(slow, Reply::Timeout)
                .with(broken, Reply::Status(503)),
        );
        let (resolver, _) = resolver(fetch);

        let timeout = resolver.fetch_public_key(&format!("{slow}#k")).await.unwrap_err();
        let server = resolver.fetch_public_key(&format!("{broken}#k")).await.unwrap_err();

        assert_eq!(timeout.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(server.failure_kind(), Some(FailureKind::ServerError));
        assert!(timeout.is_transient());
        assert!(matches!(AppError::from(server), AppError::Federation(_)));
    }

    #[tokio::test]
    async fn test_resolve_actor_creates_once() {
        let url = "https://remote.example/users/alice";
        let fetch = Arc::new(FakeFetch::default().with(url, Reply::Document(actor_doc(url, "PEM"))));
        let (resolver, users) = resolver(fetch.clone());

        let first = resolver.resolve_actor(url).await.unwrap();
        let second = resolver.resolve_actor(url).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.host.as_deref(), Some("remote.example"));
        assert_eq!(first.inbox.as_deref(), Some("https://remote.example/users/alice/inbox"));
        assert_eq!(fetch.calls().len(), 1);
        assert!(users.find_by_uri(url).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resolve_actor_keeps_stale_row_when_refresh_fails() {
        let url = "https://remote.example/users/alice";
        let fetch = Arc::new(FakeFetch::default().with(url, Reply::Document(actor_doc(url, "PEM"))));
        let (resolver, _) = resolver(fetch);
        let created = resolver.resolve_actor(url).await.unwrap();

        resolver.invalidate_actor(url).await;
        resolver
            .failure_cache()
            .record(url, FailureKind::ServerError, "down")
            .await;

        let resolved = resolver.resolve_actor(url).await.unwrap();
        assert_eq!(resolved.id, created.id);
    }

    #[tokio::test]
    async fn test_resolve_actor_rejects_mismatched_id() {
        let url = "https://remote.example/users/mallory";
        let doc = actor_doc("https://remote.example/users/alice", "PEM");
        let fetch = Arc::new(FakeFetch::default().with(url, Reply::Document(doc)));
        let (resolver, _) = resolver(fetch);

        let err = resolver.resolve_actor(url).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidActor(_)));
    }
}
