//! Follow handler.

use async_trait::async_trait;
use chrono::Utc;
use fedi_common::{AppError, AppResult, IdGenerator};
use fedi_db::entities::{follow_request, following, notification, user};
use tracing::{info, warn};

use super::{
    ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, find_local_user, notify,
};
use crate::activity::Activity;

/// Handler for incoming Follow activities.
///
/// Unlocked accounts accept immediately and answer with an Accept; locked
/// accounts get a follow request to approve.
#[derive(Clone)]
pub struct FollowHandler {
    deps: HandlerDeps,
    id_gen: IdGenerator,
}

impl FollowHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self {
            deps: deps.clone(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Queue an Accept back to the follower. Delivery problems never fail the follow.
    async fn send_accept(&self, activity: &Activity, followee: &user::Model, follower: &user::Model) {
        let Some(inbox) = follower.inbox.as_deref() else {
            warn!(follower = %follower.id, "Follower has no inbox, not sending Accept");
            return;
        };
        let follow = match serde_json::to_value(activity) {
            Ok(follow) => follow,
            Err(e) => {
                warn!(error = %e, "Failed to serialize Follow for Accept");
                return;
            }
        };
        let accept = self.deps.builder.accept(followee, follow);
        if let Err(e) = self
            .deps
            .delivery
            .deliver_to(&followee.id, accept, inbox)
            .await
        {
            warn!(followee = %followee.id, error = %e, "Failed to queue Accept");
        }
    }
}

#[async_trait]
impl ActivityHandler for FollowHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        info!(
            actor = %activity.actor,
            object = ?activity.object_id(),
            "Processing Follow activity"
        );

        let object = activity
            .object_id()
            .ok_or_else(|| AppError::BadRequest("Follow without object".to_string()))?;
        let followee = find_local_user(&self.deps, object).await?;
        let follower = &ctx.actor;
        let repos = &self.deps.repos;

        if repos.following.is_following(&follower.id, &followee.id).await? {
            // The remote may have lost our earlier Accept.
            self.send_accept(activity, &followee, follower).await;
            return Ok(HandlerOutcome::noop("Already following"));
        }

        if followee.is_locked {
            if repos
                .follow_requests
                .find_by_pair(&follower.id, &followee.id)
                .await?
                .is_some()
            {
                return Ok(HandlerOutcome::noop("Follow request already pending"));
            }

            let request = follow_request::Model {
                id: self.id_gen.generate(),
                follower_id: follower.id.clone(),
                followee_id: followee.id.clone(),
                activity_uri: Some(activity.id.clone()),
                created_at: Utc::now(),
            };
            match repos.follow_requests.create(request).await {
                Ok(_) => {}
                Err(AppError::Conflict(_)) => {
                    return Ok(HandlerOutcome::noop("Follow request already pending"));
                }
                Err(e) => return Err(e),
            }

            info!(follower = %follower.id, followee = %followee.id, "Created follow request");
            notify(
                &self.deps,
                &followee.id,
                &follower.id,
                notification::Kind::FollowRequest,
                None,
                None,
            )
            .await;
            return Ok(HandlerOutcome::applied("Follow request created"));
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

        info!(follower = %follower.id, followee = %followee.id, "Follow accepted");
        notify(
            &self.deps,
            &followee.id,
            &follower.id,
            notification::Kind::Follow,
            None,
            None,
        )
        .await;
        self.send_accept(activity, &followee, follower).await;

        Ok(HandlerOutcome::applied("Follow accepted"))
    }
}
