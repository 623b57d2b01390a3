//! Accept handler.

use async_trait::async_trait;
use chrono::Utc;
use fedi_common::{AppError, AppResult, IdGenerator};
use fedi_db::entities::{following, notification};
use tracing::info;

use super::{ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, notify};
use crate::activity::{Activity, ActivityKind};

/// Handler for Accept of a Follow one of our users sent.
#[derive(Clone)]
pub struct AcceptHandler {
    deps: HandlerDeps,
    id_gen: IdGenerator,
}

impl AcceptHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self {
            deps: deps.clone(),
            id_gen: IdGenerator::new(),
        }
    }
}

/// The local follower a Follow response refers to.
///
/// Works both with an embedded Follow and with a bare Follow id minted here.
pub(crate) fn local_follower_id(
    deps: &HandlerDeps,
    activity: &Activity,
    ctx: &HandlerContext,
) -> AppResult<Option<String>> {
    match activity.inner_activity() {
        Some(follow) => {
            if follow.kind != ActivityKind::Follow {
                return Ok(None);
            }
            if follow.object_id() != Some(ctx.actor_uri()) {
                return Err(AppError::Forbidden(format!(
                    "{} cannot answer a Follow addressed to someone else",
                    ctx.actor_uri()
                )));
            }
            Ok(deps.urls().local_user_id(&follow.actor))
        }
        None => Ok(activity
            .object_id()
            .and_then(|id| deps.urls().activity_owner_id(id))),
    }
}

#[async_trait]
impl ActivityHandler for AcceptHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        info!(actor = %activity.actor, "Processing Accept activity");

        let Some(follower_id) = local_follower_id(&self.deps, activity, ctx)? else {
            return Ok(HandlerOutcome::noop("Accept of something other than our Follow"));
        };
        let followee = &ctx.actor;
        let repos = &self.deps.repos;

        let follower = repos
            .users
            .find_by_id(&follower_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(follower_id.clone()))?;

        let pending = repos
            .follow_requests
            .delete_by_pair(&follower.id, &followee.id)
            .await?;
        if !pending {
            if repos.following.is_following(&follower.id, &followee.id).await? {
                return Ok(HandlerOutcome::noop("Already following"));
            }
            return Err(AppError::NotFound(format!(
                "No pending follow from {} to {}",
                follower.id,
                ctx.actor_uri()
            )));
        }

        let model = following::Model {
            id: self.id_gen.generate(),
            follower_id: follower.id.clone(),
            followee_id: followee.id.clone(),
            created_at: Utc::now(),
        };
        match repos.following.create(model).await {
            Ok(_) => {}
            Err(AppError::Conflict(_)) => return Ok(HandlerOutcome::noop("Already following")),
            Err(e) => return Err(e),
        }

        info!(follower = %follower.id, followee = %followee.id, "Follow request accepted");
        notify(
            &self.deps,
            &follower.id,
            &followee.id,
            notification::Kind::FollowAccepted,
            None,
            None,
        )
        .await;

        Ok(HandlerOutcome::applied("Follow accepted"))
    }
}
