//! Announce handler.

use async_trait::async_trait;
use chrono::Utc;
use fedi_common::{AppError, AppResult, IdGenerator};
use fedi_db::entities::{note, notification};
use tracing::info;

use super::create::visibility_of;
use super::{ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, find_note, notify};
use crate::activity::Activity;

/// Handler for Announce (renote) of known notes.
#[derive(Clone)]
pub struct AnnounceHandler {
    deps: HandlerDeps,
    id_gen: IdGenerator,
}

impl AnnounceHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self {
            deps: deps.clone(),
            id_gen: IdGenerator::new(),
        }
    }
}

#[async_trait]
impl ActivityHandler for AnnounceHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let target = activity
            .object_id()
            .ok_or_else(|| AppError::BadRequest("Announce without object".to_string()))?;
        info!(actor = %activity.actor, object = %target, "Processing Announce activity");

        let original = find_note(&self.deps, target)
            .await?
            .ok_or_else(|| AppError::NoteNotFound(target.to_string()))?;
        if matches!(
            original.visibility,
            note::Visibility::Followers | note::Visibility::Specified
        ) {
            return Err(AppError::Forbidden(format!("Note {target} cannot be renoted")));
        }

        let notes = &self.deps.repos.notes;
        if notes.find_by_uri(&activity.id).await?.is_some() {
            return Ok(HandlerOutcome::noop("Renote already exists"));
        }

        let addressing = serde_json::json!({ "to": activity.to, "cc": activity.cc });
        let model = note::Model {
            id: self.id_gen.generate(),
            user_id: ctx.actor.id.clone(),
            uri: Some(activity.id.clone()),
            text: None,
            cw: None,
            visibility: visibility_of(&addressing, ctx.actor.followers_url.as_deref()),
            renote_id: Some(original.id.clone()),
            reply_id: None,
            mentions: Vec::new(),
            created_at: activity.published.unwrap_or_else(Utc::now),
            updated_at: None,
            deleted_at: None,
        };
        match notes.create(model).await {
            Ok(renote) => info!(renote_id = %renote.id, original = %original.id, "Created renote"),
            Err(AppError::Conflict(_)) => return Ok(HandlerOutcome::noop("Renote already exists")),
            Err(e) => return Err(e),
        }

        notify(
            &self.deps,
            &original.user_id,
            &ctx.actor.id,
            notification::Kind::Renote,
            Some(&original.id),
            None,
        )
        .await;

        Ok(HandlerOutcome::applied("Renote created"))
    }
}
