//! Update handler.
//!
//! Actor updates may only touch the sender's own profile; note updates only
//! the sender's own notes. Only fields present in the payload change.

use async_trait::async_trait;
use fedi_common::{AppError, AppResult};
use fedi_db::entities::{note, user};
use serde_json::Value;
use tracing::info;

use super::create::{NOTE_TYPES, note_text};
use super::{ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, find_note};
use crate::activity::{Activity, object_id};
use crate::resolver::extract_public_key;

const ACTOR_TYPES: &[&str] = &["Person", "Service", "Application", "Group", "Organization"];

/// Handler for Update of actors and notes.
#[derive(Clone)]
pub struct UpdateHandler {
    deps: HandlerDeps,
}

fn string(object: &Value, field: &str) -> Option<String> {
    object.get(field).and_then(Value::as_str).map(String::from)
}

fn image(object: &Value, field: &str) -> Option<String> {
    match object.get(field)? {
        Value::String(url) => Some(url.clone()),
        value => value.get("url").and_then(Value::as_str).map(String::from),
    }
}

/// Profile changes carried by an actor document. Absent fields stay `None`.
pub(crate) fn actor_changes(object: &Value) -> user::Changes {
    let (public_key_id, public_key_pem) = match extract_public_key(object, None) {
        Some((id, pem)) => (Some(id), Some(pem)),
        None => (None, None),
    };
    user::Changes {
        name: string(object, "name"),
        description: string(object, "summary"),
        avatar_url: image(object, "icon"),
        banner_url: image(object, "image"),
        inbox: string(object, "inbox"),
        shared_inbox: object
            .get("endpoints")
            .and_then(|e| e.get("sharedInbox"))
            .and_then(Value::as_str)
            .map(String::from),
        followers_url: string(object, "followers"),
        public_key_id,
        public_key_pem,
        is_locked: object
            .get("manuallyApprovesFollowers")
            .and_then(Value::as_bool),
    }
}

/// Note changes carried by a note object.
pub(crate) fn note_changes(object: &Value) -> note::Changes {
    let has_text = ["content", "_misskey_content", "source"]
        .iter()
        .any(|f| object.get(f).is_some());
    note::Changes {
        text: if has_text { note_text(object) } else { None },
        cw: object
            .get("summary")
            .map(|s| s.as_str().map(String::from)),
    }
}

impl UpdateHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self { deps: deps.clone() }
    }

    async fn update_actor(&self, object: &Value, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let object_uri = object_id(object).unwrap_or_default();
        if object_uri != ctx.actor_uri() {
            return Err(AppError::Forbidden(format!(
                "{} cannot update actor {object_uri}",
                ctx.actor_uri()
            )));
        }

        let changes = actor_changes(object);
        if changes.is_empty() {
            return Ok(HandlerOutcome::noop("Actor update carries no changes"));
        }
        self.deps.repos.users.update(&ctx.actor.id, changes).await?;
        self.deps.resolver.invalidate_actor(object_uri).await;

        info!(user_id = %ctx.actor.id, "Updated remote actor");
        Ok(HandlerOutcome::applied("Actor updated"))
    }

    async fn update_note(&self, object: &Value, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let uri = object_id(object)
            .ok_or_else(|| AppError::BadRequest("Updated note has no id".to_string()))?;
        let note = find_note(&self.deps, uri)
            .await?
            .ok_or_else(|| AppError::NoteNotFound(uri.to_string()))?;
        if note.user_id != ctx.actor.id {
            return Err(AppError::Forbidden(format!(
                "{} does not own note {uri}",
                ctx.actor_uri()
            )));
        }

        self.deps
            .repos
            .notes
            .update(&note.id, note_changes(object))
            .await?;

        info!(note_id = %note.id, "Updated remote note");
        Ok(HandlerOutcome::applied("Note updated"))
    }
}

#[async_trait]
impl ActivityHandler for UpdateHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let object_type = activity.object_type().unwrap_or_default();
        info!(actor = %activity.actor, object_type = %object_type, "Processing Update activity");

        if ACTOR_TYPES.contains(&object_type) {
            self.update_actor(&activity.object, ctx).await
        } else if NOTE_TYPES.contains(&object_type) {
            self.update_note(&activity.object, ctx).await
        } else {
            Ok(HandlerOutcome::noop(format!(
                "Update of {object_type} is not supported"
            )))
        }
    }
}
