//! HTTP routes for the moderator service.
//!
//! Defines the Axum router and application state.

use crate::connection::PumpTimings;
use crate::dispatcher::Dispatcher;
use crate::handlers;
use crate::hub::HubHandle;
use crate::observability::{health_router, HealthState};
use crate::scheduler::StartAnnouncer;
use crate::storage::Storage;
use axum::{
    routing::{get, post},
    Router,
};
use chrono::FixedOffset;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Timeout for REST requests. A WebSocket upgrade answers immediately, so
/// the socket itself is not bound by it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,

    pub hub: HubHandle,

    pub dispatcher: Arc<Dispatcher>,

    /// Reserves start announcements on first join.
    pub announcer: Arc<StartAnnouncer>,

    /// Offset of the `YYYY/MM/DD hh:mm:ss` timestamps exchanged with clients.
    pub utc_offset: FixedOffset,

    pub timings: PumpTimings,

    /// Service-wide shutdown token handed to every connection.
    pub shutdown: CancellationToken,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - liveness and readiness
/// - `/metrics` - Prometheus scrape endpoint
/// - `/ws` - realtime WebSocket
/// - `/api/v1/users`, `/api/v1/meetings/...`, `/api/v1/documents/...` - REST glue
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let api_routes = Router::new()
        .route("/ws", get(handlers::ws_upgrade))
        .route("/api/v1/users", post(handlers::create_user))
        .route("/api/v1/meetings", post(handlers::create_meeting))
        .route(
            "/api/v1/meetings/:meeting_id/join",
            post(handlers::join_meeting),
        )
        .route(
            "/api/v1/meetings/:meeting_id/exit",
            post(handlers::exit_meeting),
        )
        .route(
            "/api/v1/documents/:document_id",
            get(handlers::get_document).put(handlers::update_document),
        )
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    health_router(health_state)
        .merge(metrics_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
