//! `GET /ws` - realtime WebSocket upgrade.

use crate::connection::{self, ConnectionContext, ConnectionId, MAX_MESSAGE_SIZE};
use crate::routes::AppState;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Upgrade the request and hand the socket to a fresh connection.
pub async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let connection_id = ConnectionId::new();
    let ctx = ConnectionContext {
        hub: state.hub.clone(),
        dispatcher: Arc::clone(&state.dispatcher),
        timings: state.timings,
        shutdown: state.shutdown.clone(),
    };

    debug!(target: "moderator.http", connection_id = %connection_id, "WebSocket upgrade");

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .max_frame_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| connection::serve(socket, connection_id, ctx))
}
