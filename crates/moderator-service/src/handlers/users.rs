//! `POST /api/v1/users` - register a participant.

use super::parse_body;
use crate::errors::ModeratorError;
use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub user_id: String,
    pub user_name: String,
}

/// Create a user.
///
/// - 201 Created
/// - 400 Bad Request: invalid body or empty id/name
/// - 409 Conflict: user id already taken
#[instrument(skip_all, name = "moderator.user.create")]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<UserResponse>), ModeratorError> {
    let request: CreateUserRequest = parse_body(&body)?;

    if request.user_id.trim().is_empty() || request.user_name.trim().is_empty() {
        return Err(ModeratorError::BadRequest(
            "userId and userName must not be empty".to_string(),
        ));
    }

    state
        .storage
        .create_user(&request.user_id, &request.user_name)
        .await?;

    info!(target: "moderator.http", user_id = %request.user_id, "User created");

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            user_id: request.user_id,
            user_name: request.user_name,
        }),
    ))
}
