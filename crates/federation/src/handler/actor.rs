//! Local actor documents, fetched by remotes to verify our signatures.

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use fedi_common::AppError;
use tracing::{error, info};

use super::{ACTIVITY_JSON_UTF8, FederationState};

/// Handle GET /users/{id}.
pub async fn actor_handler(
    State(state): State<FederationState>,
    Path(user_id): Path<String>,
) -> Response {
    info!(user_id = %user_id, "ActivityPub actor lookup");

    let user = match state.repos.users.find_by_id(&user_id).await {
        Ok(Some(user)) if user.is_local() => user,
        Ok(_) => return AppError::UserNotFound(user_id).into_response(),
        Err(e) => return e.into_response(),
    };

    let keypair = match state.repos.keypairs.find_by_user_id(&user_id).await {
        Ok(Some(keypair)) => keypair,
        Ok(None) => {
            error!(user_id = %user_id, "Keypair not found for local user");
            return AppError::Internal("Actor has no key".to_string()).into_response();
        }
        Err(e) => return e.into_response(),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, ACTIVITY_JSON_UTF8)],
        Json(state.builder.person(&user, &keypair.public_key_pem)),
    )
        .into_response()
}
