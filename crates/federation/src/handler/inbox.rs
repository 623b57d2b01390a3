//! Inbox endpoints.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use fedi_common::AppError;
use serde_json::json;
use tracing::{debug, warn};

use super::FederationState;
use crate::dispatcher::{InboundRequest, InboxOutcome};

/// Handle POST /inbox (shared inbox).
pub async fn inbox_handler(
    State(state): State<FederationState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InboundRequest::from_parts(&method, &uri, &headers, body.to_vec());
    respond(state.dispatcher.handle_inbound(&request).await)
}

/// Handle POST /users/{id}/inbox.
pub async fn user_inbox_handler(
    State(state): State<FederationState>,
    Path(user_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.repos.users.find_by_id(&user_id).await {
        Ok(Some(user)) if user.is_local() => {}
        Ok(_) => return AppError::UserNotFound(user_id).into_response(),
        Err(e) => return e.into_response(),
    }
    debug!(user_id = %user_id, "Personal inbox delivery");

    let request = InboundRequest::from_parts(&method, &uri, &headers, body.to_vec());
    respond(state.dispatcher.handle_inbound(&request).await)
}

fn respond(result: Result<InboxOutcome, AppError>) -> Response {
    match result {
        Ok(InboxOutcome::Processed(outcome)) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "accepted", "message": outcome.message() })),
        )
            .into_response(),
        Ok(InboxOutcome::Duplicate) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "duplicate" })),
        )
            .into_response(),
        Err(e) => {
            warn!(status = %e.status_code(), error = %e, "Rejected inbound activity");
            e.into_response()
        }
    }
}
