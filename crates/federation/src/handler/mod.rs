//! HTTP surface: inbox endpoints and local actor documents.

#![allow(missing_docs)]

mod actor;
mod inbox;

pub use actor::actor_handler;
pub use inbox::{inbox_handler, user_inbox_handler};

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fedi_db::Repositories;

use crate::builder::ActivityBuilder;
use crate::dispatcher::InboxDispatcher;

/// Content type of `ActivityPub` responses.
pub const ACTIVITY_JSON_UTF8: &str = "application/activity+json; charset=utf-8";

/// Shared state of the federation routes.
#[derive(Clone)]
pub struct FederationState {
    pub dispatcher: Arc<InboxDispatcher>,
    pub repos: Repositories,
    pub builder: ActivityBuilder,
}

/// Routes for `/inbox`, `/users/{id}/inbox` and `/users/{id}`.
pub fn federation_router(state: FederationState) -> Router {
    Router::new()
        .route("/inbox", post(inbox_handler))
        .route("/users/{id}/inbox", post(user_inbox_handler))
        .route("/users/{id}", get(actor_handler))
        .with_state(state)
}
