//! Probe endpoints.
//!
//! - `GET /health` - 200 while the process serves requests
//! - `GET /ready` - 200 once migrations ran and until shutdown starts
//!   draining, 503 otherwise

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness inputs. Liveness has none: answering at all means live.
#[derive(Debug, Default)]
pub struct HealthState {
    migrated: AtomicBool,
    draining: AtomicBool,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The database is reachable and the schema is current.
    pub fn mark_migrated(&self) {
        self.migrated.store(true, Ordering::SeqCst);
    }

    /// Shutdown began; stop advertising readiness for good.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.migrated.load(Ordering::SeqCst) && !self.is_draining()
    }
}

pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness))
        .with_state(health_state)
}

async fn readiness(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn status_of(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_ready_needs_migration_and_no_drain() {
        let state = HealthState::new();
        assert!(!state.is_ready());

        state.mark_migrated();
        assert!(state.is_ready());

        state.start_draining();
        assert!(!state.is_ready());
        assert!(state.is_draining());

        // Draining is one-way.
        state.mark_migrated();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_health_and_ready_endpoints() {
        let state = Arc::new(HealthState::new());
        let app = health_router(Arc::clone(&state));

        assert_eq!(status_of(app.clone(), "/health").await, StatusCode::OK);
        assert_eq!(
            status_of(app.clone(), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.mark_migrated();
        assert_eq!(status_of(app.clone(), "/ready").await, StatusCode::OK);

        state.start_draining();
        assert_eq!(status_of(app.clone(), "/ready").await, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_of(app, "/health").await, StatusCode::OK);
    }
}
