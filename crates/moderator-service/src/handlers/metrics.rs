//! Prometheus metrics endpoint handler.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Returns Prometheus text format, e.g.
/// ```text
/// # TYPE moderator_ws_connections gauge
/// moderator_ws_connections 12
/// ```
#[tracing::instrument(skip_all, name = "moderator.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
