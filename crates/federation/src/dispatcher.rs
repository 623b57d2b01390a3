//! Inbound activity dispatch.
//!
//! [`InboxDispatcher::handle_inbound`] authenticates a signed POST, drops
//! replays through the received-activity ledger and routes the activity to
//! its handler. Nothing is written before the request has been
//! authenticated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, Uri};
use fedi_common::{AppError, AppResult};
use fedi_db::repositories::ReceivedActivityRepository;
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::processor::{HandlerContext, HandlerOutcome, HandlerRegistry};
use crate::resolver::{ActorResolver, ResolveError};
use crate::signature::{
    self, SignatureComponents, actor_url_from_key_id, parse_signature_header,
};

/// Headers an inbound signature must cover.
pub const REQUIRED_SIGNED_HEADERS: &[&str] = &["(request-target)", "host", "date"];

/// A raw inbound request, transport-independent.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    /// Path and query, as it appears in `(request-target)`
    pub path: String,
    /// Lowercase header names
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl InboundRequest {
    #[must_use]
    pub fn from_parts(method: &Method, uri: &Uri, headers: &HeaderMap, body: Vec<u8>) -> Self {
        let path = uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        Self {
            method: method.as_str().to_string(),
            path,
            headers,
            body,
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Result of a successfully handled inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    Processed(HandlerOutcome),
    /// The activity id was seen before; nothing was done.
    Duplicate,
}

/// Verifies and dispatches inbound activities.
#[derive(Clone)]
pub struct InboxDispatcher {
    resolver: ActorResolver,
    ledger: Arc<dyn ReceivedActivityRepository>,
    registry: HandlerRegistry,
    date_tolerance: Duration,
}

impl InboxDispatcher {
    #[must_use]
    pub fn new(
        resolver: ActorResolver,
        ledger: Arc<dyn ReceivedActivityRepository>,
        registry: HandlerRegistry,
        date_tolerance: Duration,
    ) -> Self {
        Self {
            resolver,
            ledger,
            registry,
            date_tolerance,
        }
    }

    #[must_use]
    pub const fn resolver(&self) -> &ActorResolver {
        &self.resolver
    }

    /// Authenticate, deduplicate and dispatch one inbound activity.
    ///
    /// Errors map onto responses through [`AppError`]: malformed input is
    /// 400, failed authentication 401, a signer whose key cannot be fetched
    /// right now 502, and handler failures keep their own status.
    pub async fn handle_inbound(&self, request: &InboundRequest) -> AppResult<InboxOutcome> {
        let components = self.authenticate(request).await?;

        let activity = Activity::from_slice(&request.body)
            .map_err(|e| AppError::BadRequest(format!("Invalid activity: {e}")))?;

        if actor_url_from_key_id(&components.key_id) != activity.actor {
            let actor = self.resolve_actor(&activity.actor).await?;
            if actor.public_key_id.as_deref() != Some(components.key_id.as_str()) {
                return Err(AppError::Unauthorized(format!(
                    "Key {} does not belong to {}",
                    components.key_id, activity.actor
                )));
            }
        }

        if self.ledger.exists(&activity.id).await? || !self.ledger.record(&activity.id).await? {
            debug!(id = %activity.id, "Skipping already processed activity");
            return Ok(InboxOutcome::Duplicate);
        }

        let actor = match self.resolve_actor(&activity.actor).await {
            Ok(actor) => actor,
            Err(e) => {
                self.release(&activity.id, &e).await;
                return Err(e);
            }
        };
        let ctx = HandlerContext { actor };

        match self.registry.dispatch(&activity, &ctx).await {
            Ok(outcome) => {
                info!(
                    id = %activity.id,
                    kind = %activity.kind,
                    actor = %activity.actor,
                    message = %outcome.message(),
                    "Handled activity"
                );
                Ok(InboxOutcome::Processed(outcome))
            }
            Err(e) => {
                warn!(
                    id = %activity.id,
                    kind = %activity.kind,
                    actor = %activity.actor,
                    object = ?activity.object_id(),
                    error = %e,
                    "Activity handler failed"
                );
                self.release(&activity.id, &e).await;
                Err(e)
            }
        }
    }

    /// Signature, date and digest checks. Returns the verified signature.
    async fn authenticate(&self, request: &InboundRequest) -> AppResult<SignatureComponents> {
        let header = request
            .header("signature")
            .ok_or_else(|| AppError::Unauthorized("Missing Signature header".to_string()))?;
        let components = parse_signature_header(header)?;

        for required in REQUIRED_SIGNED_HEADERS {
            if !components.headers.iter().any(|h| h == required) {
                return Err(AppError::Unauthorized(format!(
                    "Signature does not cover {required}"
                )));
            }
        }

        // Stale requests are turned away before any key fetch.
        let date = request
            .header("date")
            .ok_or_else(|| AppError::Unauthorized("Missing Date header".to_string()))?;
        if !signature::verify_date_header(date, self.date_tolerance) {
            return Err(AppError::Unauthorized(format!("Date header out of range: {date}")));
        }

        let public_key = self
            .resolver
            .fetch_public_key(&components.key_id)
            .await
            .map_err(resolve_error)?;

        let signing_string = signature::build_signing_string(
            &request.method,
            &request.path,
            &request.headers,
            &components.headers,
        )?;
        if !signature::verify(
            &public_key,
            &signing_string,
            &components.signature,
            &components.algorithm,
        )? {
            return Err(AppError::Unauthorized("Signature mismatch".to_string()));
        }

        if let Some(digest) = request.header("digest")
            && !signature::verify_digest(&request.body, digest)
        {
            return Err(AppError::Unauthorized("Digest mismatch".to_string()));
        }

        debug!(key_id = %components.key_id, "Signature verified");
        Ok(components)
    }

    async fn resolve_actor(&self, uri: &str) -> AppResult<fedi_db::entities::user::Model> {
        self.resolver.resolve_actor(uri).await.map_err(resolve_error)
    }

    /// Let a redelivery through after a failure the sender can retry.
    async fn release(&self, activity_id: &str, error: &AppError) {
        if !error.is_server_error() {
            return;
        }
        if let Err(e) = self.ledger.forget(activity_id).await {
            warn!(id = %activity_id, error = %e, "Failed to release activity id");
        }
    }
}

/// Transient fetch problems are the sender's to retry; anything else means
/// we cannot authenticate it.
fn resolve_error(err: ResolveError) -> AppError {
    match err {
        ResolveError::Repository(e) => e,
        e if e.is_transient() => AppError::Federation(e.to_string()),
        e => AppError::Unauthorized(e.to_string()),
    }
}
