//! Delete handler.

use async_trait::async_trait;
use fedi_common::{AppError, AppResult};
use tracing::info;

use super::{ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, find_note_with_deleted};
use crate::activity::Activity;

/// Handler for Delete of notes (and of the sending actor itself).
#[derive(Clone)]
pub struct DeleteHandler {
    deps: HandlerDeps,
}

impl DeleteHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self { deps: deps.clone() }
    }
}

#[async_trait]
impl ActivityHandler for DeleteHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let uri = activity
            .object_id()
            .ok_or_else(|| AppError::BadRequest("Delete without object".to_string()))?;
        info!(actor = %activity.actor, object = %uri, "Processing Delete activity");

        if uri == ctx.actor_uri() {
            // Account removal: forget cached keys so later requests re-resolve.
            self.deps.resolver.invalidate_actor(uri).await;
            return Ok(HandlerOutcome::noop("Actor deletion acknowledged"));
        }

        let note = find_note_with_deleted(&self.deps, uri)
            .await?
            .ok_or_else(|| AppError::NoteNotFound(uri.to_string()))?;

        if note.user_id != ctx.actor.id {
            return Err(AppError::Forbidden(format!(
                "{} does not own note {uri}",
                ctx.actor_uri()
            )));
        }
        if note.is_deleted() {
            return Ok(HandlerOutcome::noop("Note already deleted"));
        }

        self.deps.repos.notes.soft_delete(&note.id).await?;
        info!(note_id = %note.id, "Deleted note");
        Ok(HandlerOutcome::applied("Note deleted"))
    }
}
