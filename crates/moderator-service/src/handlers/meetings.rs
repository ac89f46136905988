//! Meeting handlers.
//!
//! - `POST /api/v1/meetings` - create a meeting with its presenters
//! - `POST /api/v1/meetings/{meeting_id}/join` - join, reserving the start
//!   announcement on the first join of a meeting that has not started
//! - `POST /api/v1/meetings/{meeting_id}/exit` - leave

use super::parse_body;
use crate::errors::ModeratorError;
use crate::routes::AppState;
use crate::storage::{DocumentId, MeetingId, Presenter};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingRequest {
    pub meeting_name: String,
    /// `YYYY/MM/DD hh:mm:ss` in the service's local offset.
    pub start_time: String,
    pub presenter_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingResponse {
    pub meeting_id: MeetingId,
    /// One per presenter, in presenter order.
    pub document_ids: Vec<DocumentId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenterInfo {
    pub user_id: String,
    pub user_name: String,
    pub document_id: DocumentId,
    pub presenter_order: i32,
}

impl From<Presenter> for PresenterInfo {
    fn from(p: Presenter) -> Self {
        Self {
            user_id: p.user_id,
            user_name: p.user_name,
            document_id: p.document_id,
            presenter_order: p.presenter_order,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMeetingResponse {
    pub meeting_id: MeetingId,
    pub meeting_name: String,
    pub start_time: String,
    pub started: bool,
    pub presenters: Vec<PresenterInfo>,
}

/// Create a meeting.
///
/// - 201 Created
/// - 400 Bad Request: invalid body, bad `startTime`, no presenters
/// - 404 Not Found: a presenter id is not a known user
#[instrument(skip_all, name = "moderator.meeting.create")]
pub async fn create_meeting(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<CreateMeetingResponse>), ModeratorError> {
    let request: CreateMeetingRequest = parse_body(&body)?;

    if request.meeting_name.trim().is_empty() {
        return Err(ModeratorError::BadRequest(
            "meetingName must not be empty".to_string(),
        ));
    }
    if request.presenter_ids.is_empty() {
        return Err(ModeratorError::BadRequest(
            "presenterIds must not be empty".to_string(),
        ));
    }

    let start_time = timestamp::parse_local(&request.start_time, state.utc_offset)
        .map_err(|e| ModeratorError::BadRequest(format!("startTime: {e}")))?;

    let created = state
        .storage
        .create_meeting(&request.meeting_name, start_time, &request.presenter_ids)
        .await?;

    info!(
        target: "moderator.http",
        meeting_id = created.meeting_id,
        presenters = request.presenter_ids.len(),
        start_time = %start_time,
        "Meeting created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateMeetingResponse {
            meeting_id: created.meeting_id,
            document_ids: created.document_ids,
        }),
    ))
}

/// Join a meeting.
///
/// - 200 OK: meeting details and ordered presenters
/// - 404 Not Found: unknown meeting or user
#[instrument(skip_all, name = "moderator.meeting.join", fields(meeting_id = meeting_id))]
pub async fn join_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<MeetingId>,
    body: axum::body::Bytes,
) -> Result<Json<JoinMeetingResponse>, ModeratorError> {
    let request: ParticipantRequest = parse_body(&body)?;

    let joined = state
        .storage
        .join_meeting(meeting_id, &request.user_id)
        .await?;

    if !joined.meeting.started {
        // Dropping the handle detaches the timer.
        let _timer = state
            .announcer
            .schedule(joined.meeting.id, joined.meeting.start_time);
    }

    info!(
        target: "moderator.http",
        meeting_id,
        user_id = %request.user_id,
        "Participant joined"
    );

    Ok(Json(JoinMeetingResponse {
        meeting_id: joined.meeting.id,
        meeting_name: joined.meeting.name,
        start_time: timestamp::format_local(joined.meeting.start_time, state.utc_offset),
        started: joined.meeting.started,
        presenters: joined.presenters.into_iter().map(PresenterInfo::from).collect(),
    }))
}

/// Leave a meeting. The user's pending raised hands are withdrawn.
///
/// - 204 No Content
/// - 404 Not Found: the user is not a participant
#[instrument(skip_all, name = "moderator.meeting.exit", fields(meeting_id = meeting_id))]
pub async fn exit_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<MeetingId>,
    body: axum::body::Bytes,
) -> Result<StatusCode, ModeratorError> {
    let request: ParticipantRequest = parse_body(&body)?;

    state
        .storage
        .exit_meeting(meeting_id, &request.user_id)
        .await?;

    info!(
        target: "moderator.http",
        meeting_id,
        user_id = %request.user_id,
        "Participant left"
    );

    Ok(StatusCode::NO_CONTENT)
}
