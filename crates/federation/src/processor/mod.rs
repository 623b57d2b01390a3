//! Activity handlers and the table that routes to them.
//!
//! Each activity type gets one [`ActivityHandler`]. The dispatcher looks the
//! handler up in a [`HandlerRegistry`] built once at startup; types without a
//! registered handler fall through to a no-op so that senders are never
//! penalised for extensions we do not implement.

#![allow(missing_docs)]

mod accept;
mod announce;
mod create;
mod delete;
mod follow;
mod like;
mod reject;
mod undo;
mod update;

pub use accept::AcceptHandler;
pub use announce::AnnounceHandler;
pub use create::CreateHandler;
pub use delete::DeleteHandler;
pub use follow::FollowHandler;
pub use like::{LikeHandler, ReactionToken, reaction_token};
pub use reject::RejectHandler;
pub use undo::UndoHandler;
pub use update::UpdateHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fedi_common::{AppError, AppResult, IdGenerator};
use fedi_db::Repositories;
use fedi_db::entities::{note, notification, user};
use tracing::{debug, warn};

use crate::activity::{Activity, ActivityKind};
use crate::builder::ActivityBuilder;
use crate::delivery::DeliveryService;
use crate::resolver::ActorResolver;
use crate::urls::LocalUrls;

/// What a handler did with an activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// State changed.
    Applied(String),
    /// Nothing to do: duplicate, already undone or unsupported.
    NoOp(String),
}

impl HandlerOutcome {
    pub fn applied(message: impl Into<String>) -> Self {
        Self::Applied(message.into())
    }

    pub fn noop(message: impl Into<String>) -> Self {
        Self::NoOp(message.into())
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Applied(m) | Self::NoOp(m) => m,
        }
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Per-request state handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// The authenticated sender, already resolved to a local row.
    pub actor: user::Model,
}

impl HandlerContext {
    /// URI of the sender.
    #[must_use]
    pub fn actor_uri(&self) -> &str {
        self.actor.uri.as_deref().unwrap_or_default()
    }
}

/// Processes one type of inbound activity.
///
/// An `Err` is a failed activity; the error variant says whether the sender
/// could ever succeed by retrying (`NotFound`/`Forbidden` cannot).
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome>;
}

/// Handler for types nobody registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedHandler;

#[async_trait]
impl ActivityHandler for UnsupportedHandler {
    async fn handle(&self, activity: &Activity, _ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        debug!(kind = %activity.kind, id = %activity.id, "Ignoring unsupported activity type");
        Ok(HandlerOutcome::noop(format!(
            "Unsupported activity type: {}",
            activity.kind
        )))
    }
}

/// Collaborators shared by the built-in handlers.
#[derive(Clone)]
pub struct HandlerDeps {
    pub repos: Repositories,
    pub resolver: ActorResolver,
    pub delivery: DeliveryService,
    pub builder: ActivityBuilder,
}

impl HandlerDeps {
    #[must_use]
    pub const fn urls(&self) -> &LocalUrls {
        self.builder.urls()
    }
}

/// Dispatch table from activity type to handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ActivityKind, Arc<dyn ActivityHandler>>,
    fallback: Arc<dyn ActivityHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(UnsupportedHandler),
        }
    }
}

impl HandlerRegistry {
    /// An empty table; every type falls through to the no-op handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The table with every built-in handler registered.
    #[must_use]
    pub fn with_defaults(deps: &HandlerDeps) -> Self {
        let like: Arc<dyn ActivityHandler> = Arc::new(LikeHandler::new(deps));
        Self::new()
            .register(ActivityKind::Follow, Arc::new(FollowHandler::new(deps)))
            .register(ActivityKind::Undo, Arc::new(UndoHandler::new(deps)))
            .register(ActivityKind::Like, like.clone())
            .register(ActivityKind::EmojiReact, like)
            .register(ActivityKind::Create, Arc::new(CreateHandler::new(deps)))
            .register(ActivityKind::Update, Arc::new(UpdateHandler::new(deps)))
            .register(ActivityKind::Delete, Arc::new(DeleteHandler::new(deps)))
            .register(ActivityKind::Announce, Arc::new(AnnounceHandler::new(deps)))
            .register(ActivityKind::Accept, Arc::new(AcceptHandler::new(deps)))
            .register(ActivityKind::Reject, Arc::new(RejectHandler::new(deps)))
    }

    /// Add or replace the handler for a type.
    #[must_use]
    pub fn register(mut self, kind: ActivityKind, handler: Arc<dyn ActivityHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    #[must_use]
    pub fn is_registered(&self, kind: &ActivityKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Handler for a type, or the no-op fallback.
    #[must_use]
    pub fn get(&self, kind: &ActivityKind) -> Arc<dyn ActivityHandler> {
        self.handlers
            .get(kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub async fn dispatch(
        &self,
        activity: &Activity,
        ctx: &HandlerContext,
    ) -> AppResult<HandlerOutcome> {
        self.get(&activity.kind).handle(activity, ctx).await
    }
}

/// Find a note by its `ActivityPub` id, local or remote. Deleted notes count as missing.
pub(crate) async fn find_note(deps: &HandlerDeps, uri: &str) -> AppResult<Option<note::Model>> {
    Ok(find_note_with_deleted(deps, uri)
        .await?
        .filter(|n| !n.is_deleted()))
}

/// Like [`find_note`], but soft-deleted notes are returned too.
pub(crate) async fn find_note_with_deleted(
    deps: &HandlerDeps,
    uri: &str,
) -> AppResult<Option<note::Model>> {
    match deps.urls().local_note_id(uri) {
        Some(id) => deps.repos.notes.find_by_id(&id).await,
        None => deps.repos.notes.find_by_uri(uri).await,
    }
}

/// Local user addressed by an actor URI.
pub(crate) async fn find_local_user(deps: &HandlerDeps, uri: &str) -> AppResult<user::Model> {
    let id = deps
        .urls()
        .local_user_id(uri)
        .ok_or_else(|| AppError::UserNotFound(uri.to_string()))?;
    deps.repos
        .users
        .find_by_id(&id)
        .await?
        .filter(user::Model::is_local)
        .ok_or(AppError::UserNotFound(id))
}

/// Best-effort notification for a local user. Failures are logged only.
pub(crate) async fn notify(
    deps: &HandlerDeps,
    notifiee_id: &str,
    notifier_id: &str,
    kind: notification::Kind,
    note_id: Option<&str>,
    reaction: Option<&str>,
) {
    if notifiee_id == notifier_id {
        return;
    }
    let model = notification::Model {
        id: IdGenerator::new().generate(),
        notifiee_id: notifiee_id.to_string(),
        notifier_id: notifier_id.to_string(),
        kind,
        note_id: note_id.map(String::from),
        reaction: reaction.map(String::from),
        created_at: Utc::now(),
    };
    if let Err(e) = deps.repos.notifications.create(model).await {
        warn!(notifiee = %notifiee_id, kind = ?kind, error = %e, "Failed to create notification");
    }
}

/// Plain text from remote HTML content.
pub(crate) fn strip_html(html: &str) -> String {
    let html = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p><p>", "\n\n")
        .replace("</p>", "\n")
        .replace("<p>", "");

    let mut result = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    result
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<a href='x'>Link</a>"), "Link");
        assert_eq!(strip_html("a &amp;lt; b"), "a &lt; b");
        assert_eq!(strip_html("line1<br>line2"), "line1\nline2");
    }

    #[tokio::test]
    async fn test_unregistered_type_is_noop() {
        let registry = HandlerRegistry::new();
        let activity: Activity = serde_json::from_value(json!({
            "id": "https://remote.example/a/1",
            "type": "Move",
            "actor": "https://remote.example/users/x"
        }))
        .unwrap();
        let ctx = HandlerContext {
            actor: user::Model::local("x", "x"),
        };

        let outcome = registry.dispatch(&activity, &ctx).await.unwrap();
        assert!(!outcome.is_applied());
        assert!(outcome.message().contains("Move"));
    }
}
