//! Reject handler.

use async_trait::async_trait;
use fedi_common::AppResult;
use tracing::info;

use super::accept::local_follower_id;
use super::{ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome};
use crate::activity::Activity;

/// Handler for Reject of a Follow one of our users sent.
///
/// Also covers a remote user removing one of our followers after the fact.
#[derive(Clone)]
pub struct RejectHandler {
    deps: HandlerDeps,
}

impl RejectHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self { deps: deps.clone() }
    }
}

#[async_trait]
impl ActivityHandler for RejectHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        info!(actor = %activity.actor, "Processing Reject activity");

        let Some(follower_id) = local_follower_id(&self.deps, activity, ctx)? else {
            return Ok(HandlerOutcome::noop("Reject of something other than our Follow"));
        };
        let repos = &self.deps.repos;

        let withdrawn = repos
            .follow_requests
            .delete_by_pair(&follower_id, &ctx.actor.id)
            .await?;
        let unfollowed = repos
            .following
            .delete_by_pair(&follower_id, &ctx.actor.id)
            .await?;

        if withdrawn || unfollowed {
            info!(follower = %follower_id, followee = %ctx.actor.id, "Follow rejected");
            Ok(HandlerOutcome::applied("Follow rejected"))
        } else {
            Ok(HandlerOutcome::noop("No follow to reject"))
        }
    }
}
