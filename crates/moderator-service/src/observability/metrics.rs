//! Metrics definitions for the moderator service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `moderator_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `message_type`: the six realtime types plus `unknown`
//! - `outcome`: fixed by the dispatch and moderator code paths
//! - `operation`: one value per storage call
//! - `status`: `success` or `error`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("moderator_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Hub
// ============================================================================

/// Set the number of registered connections.
///
/// Metric: `moderator_ws_connections`
pub fn set_ws_connections(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("moderator_ws_connections").set(count as f64);
}

/// Record one broadcast processed by the hub.
///
/// Metric: `moderator_broadcasts_total`
pub fn record_broadcast() {
    counter!("moderator_broadcasts_total").increment(1);
}

/// Record a payload skipped for a connection whose queue was full or closed.
///
/// Metric: `moderator_broadcast_drops_total`
/// Labels: `reason` (`full`, `closed`)
pub fn record_broadcast_drop(reason: &'static str) {
    counter!("moderator_broadcast_drops_total", "reason" => reason).increment(1);
}

// ============================================================================
// Dispatch
// ============================================================================

/// Record an inbound frame and what happened to it.
///
/// Metric: `moderator_frames_total`
/// Labels: `message_type`, `outcome` (`broadcast`, `dropped`, or an error kind)
pub fn record_frame(message_type: &str, outcome: &str) {
    counter!(
        "moderator_frames_total",
        "message_type" => message_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a moderator step outcome.
///
/// Metric: `moderator_outcomes_total`
/// Labels: `outcome` (`voice`, `written`, `escalation`, `fairness`,
/// `rotation`, `ended`)
pub fn record_moderator_outcome(outcome: &'static str) {
    counter!("moderator_outcomes_total", "outcome" => outcome).increment(1);
}

/// Record a fired start announcement.
///
/// Metric: `moderator_start_announcements_total`
pub fn record_start_announcement() {
    counter!("moderator_start_announcements_total").increment(1);
}

// ============================================================================
// Storage
// ============================================================================

/// Record database query execution.
///
/// Metric: `moderator_db_query_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!(
        "moderator_db_query_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these are no-ops; they must not panic.
    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_ws_connections(3);
        record_broadcast();
        record_broadcast_drop("full");
        record_frame("finishword", "broadcast");
        record_moderator_outcome("fairness");
        record_start_announcement();
        record_db_query("meeting", "success", Duration::from_millis(4));
    }
}
