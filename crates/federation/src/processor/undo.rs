//! Undo handler.
//!
//! Undoing something that does not exist succeeds without side effects:
//! senders retry Undo freely, and the original may never have reached us.

use async_trait::async_trait;
use fedi_common::{AppError, AppResult};
use tracing::info;

use super::{
    ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, find_note, reaction_token,
};
use crate::activity::{Activity, ActivityKind};

/// Handler for Undo of Follow, Like, `EmojiReact` and Announce.
#[derive(Clone)]
pub struct UndoHandler {
    deps: HandlerDeps,
}

impl UndoHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self { deps: deps.clone() }
    }

    async fn undo_follow(&self, inner: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let Some(followee_id) = inner
            .object_id()
            .and_then(|uri| self.deps.urls().local_user_id(uri))
        else {
            return Ok(HandlerOutcome::noop("Undo Follow of a non-local actor"));
        };

        let repos = &self.deps.repos;
        let unfollowed = repos
            .following
            .delete_by_pair(&ctx.actor.id, &followee_id)
            .await?;
        let withdrawn = repos
            .follow_requests
            .delete_by_pair(&ctx.actor.id, &followee_id)
            .await?;

        if unfollowed || withdrawn {
            info!(follower = %ctx.actor.id, followee = %followee_id, "Unfollowed");
            Ok(HandlerOutcome::applied("Unfollowed"))
        } else {
            Ok(HandlerOutcome::noop("Follow relationship does not exist"))
        }
    }

    async fn undo_reaction(
        &self,
        inner: &Activity,
        ctx: &HandlerContext,
    ) -> AppResult<HandlerOutcome> {
        let reactions = &self.deps.repos.reactions;

        if let Some(existing) = reactions.find_by_uri(&inner.id).await? {
            if existing.user_id != ctx.actor.id {
                return Err(AppError::Forbidden("Reaction belongs to another actor".into()));
            }
            reactions.delete(&existing.id).await?;
            return Ok(HandlerOutcome::applied("Reaction removed"));
        }

        // Fall back to matching the reaction itself when the Like id was not kept.
        let note = match inner.object_id() {
            Some(uri) => find_note(&self.deps, uri).await?,
            None => None,
        };
        let Some(note) = note else {
            return Ok(HandlerOutcome::noop("Reaction does not exist"));
        };
        let token = reaction_token(inner, ctx.actor.host.as_deref()).token;
        match reactions
            .find_by_user_note_and_reaction(&ctx.actor.id, &note.id, &token)
            .await?
        {
            Some(existing) => {
                reactions.delete(&existing.id).await?;
                Ok(HandlerOutcome::applied("Reaction removed"))
            }
            None => Ok(HandlerOutcome::noop("Reaction does not exist")),
        }
    }

    async fn undo_announce(
        &self,
        inner: &Activity,
        ctx: &HandlerContext,
    ) -> AppResult<HandlerOutcome> {
        let notes = &self.deps.repos.notes;
        match notes.find_by_uri(&inner.id).await? {
            Some(renote) if renote.is_deleted() => Ok(HandlerOutcome::noop("Renote already removed")),
            Some(renote) if renote.user_id != ctx.actor.id => {
                Err(AppError::Forbidden("Renote belongs to another actor".into()))
            }
            Some(renote) => {
                notes.soft_delete(&renote.id).await?;
                Ok(HandlerOutcome::applied("Renote removed"))
            }
            None => Ok(HandlerOutcome::noop("Renote does not exist")),
        }
    }

    /// Undo whose object is only an id: try each kind of stored effect.
    async fn undo_by_id(&self, id: &str, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let reactions = &self.deps.repos.reactions;
        if let Some(existing) = reactions.find_by_uri(id).await? {
            if existing.user_id != ctx.actor.id {
                return Err(AppError::Forbidden("Reaction belongs to another actor".into()));
            }
            reactions.delete(&existing.id).await?;
            return Ok(HandlerOutcome::applied("Reaction removed"));
        }

        let notes = &self.deps.repos.notes;
        if let Some(renote) = notes.find_by_uri(id).await?
            && renote.renote_id.is_some()
            && !renote.is_deleted()
        {
            if renote.user_id != ctx.actor.id {
                return Err(AppError::Forbidden("Renote belongs to another actor".into()));
            }
            notes.soft_delete(&renote.id).await?;
            return Ok(HandlerOutcome::applied("Renote removed"));
        }

        Ok(HandlerOutcome::noop("Nothing to undo"))
    }
}

#[async_trait]
impl ActivityHandler for UndoHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let Some(inner) = activity.inner_activity() else {
            let id = activity
                .object_id()
                .ok_or_else(|| AppError::BadRequest("Undo without object".to_string()))?;
            info!(actor = %activity.actor, object = %id, "Processing Undo by reference");
            return self.undo_by_id(id, ctx).await;
        };

        info!(
            actor = %activity.actor,
            object_type = %inner.kind,
            "Processing Undo activity"
        );

        if inner.actor != activity.actor {
            return Err(AppError::Forbidden(
                "Cannot undo another actor's activity".to_string(),
            ));
        }

        match inner.kind {
            ActivityKind::Follow => self.undo_follow(&inner, ctx).await,
            ActivityKind::Like | ActivityKind::EmojiReact => self.undo_reaction(&inner, ctx).await,
            ActivityKind::Announce => self.undo_announce(&inner, ctx).await,
            ref other => Ok(HandlerOutcome::noop(format!("Undo of {other} is not supported"))),
        }
    }
}
