//! HTTP request handlers.

pub mod documents;
pub mod meetings;
pub mod metrics;
pub mod users;
pub mod ws;

pub use documents::{get_document, update_document};
pub use meetings::{create_meeting, exit_meeting, join_meeting};
pub use metrics::metrics_handler;
pub use users::create_user;
pub use ws::ws_upgrade;

use crate::errors::ModeratorError;
use serde::de::DeserializeOwned;

/// Deserialize a JSON body, returning 400 (not Axum's default 422) on failure.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ModeratorError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "moderator.http", error = %e, "Invalid request body");
        ModeratorError::BadRequest("Invalid request body".to_string())
    })
}
