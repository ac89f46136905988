//! Document handlers.
//!
//! - `GET /api/v1/documents/{document_id}`
//! - `PUT /api/v1/documents/{document_id}` - update, then broadcast a
//!   `document_update` event to every connection

use super::parse_body;
use crate::errors::ModeratorError;
use crate::protocol::{DocumentUpdateResult, OutboundEnvelope};
use crate::routes::AppState;
use crate::storage::{Document, DocumentId, MeetingId};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub document_id: DocumentId,
    pub meeting_id: MeetingId,
    pub presenter_id: String,
    pub document_url: Option<String>,
    pub script: Option<String>,
}

impl From<Document> for DocumentResponse {
    fn from(d: Document) -> Self {
        Self {
            document_id: d.id,
            meeting_id: d.meeting_id,
            presenter_id: d.presenter_id,
            document_url: d.url,
            script: d.script,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
}

#[instrument(skip_all, name = "moderator.document.get", fields(document_id = document_id))]
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<DocumentId>,
) -> Result<Json<DocumentResponse>, ModeratorError> {
    let document = state.storage.document(document_id).await?;
    Ok(Json(document.into()))
}

/// Update a document.
///
/// - 200 OK: the updated document
/// - 400 Bad Request: invalid body or no field to update
/// - 404 Not Found: unknown document
///
/// The broadcast is best effort: a stopped hub is logged and the update still
/// succeeds.
#[instrument(skip_all, name = "moderator.document.update", fields(document_id = document_id))]
pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<DocumentId>,
    body: axum::body::Bytes,
) -> Result<Json<DocumentResponse>, ModeratorError> {
    let request: UpdateDocumentRequest = parse_body(&body)?;

    if request.document_url.is_none() && request.script.is_none() {
        return Err(ModeratorError::BadRequest(
            "documentUrl or script is required".to_string(),
        ));
    }

    let document = state
        .storage
        .update_document(document_id, request.document_url, request.script)
        .await?;

    let event = OutboundEnvelope::DocumentUpdate(DocumentUpdateResult {
        meeting_id: document.meeting_id,
        document_id: document.id,
    })
    .encode()?;

    if let Err(e) = state.hub.broadcast(event).await {
        warn!(
            target: "moderator.http",
            document_id,
            error = %e,
            "Document update not broadcast"
        );
    }

    info!(
        target: "moderator.http",
        document_id,
        meeting_id = document.meeting_id,
        "Document updated"
    );

    Ok(Json(document.into()))
}
