//! HTTP router tests via `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use moderator_service::connection::PumpTimings;
use moderator_service::observability::HealthState;
use moderator_service::routes::{build_routes, AppState};
use moderator_service::storage::Storage;
use moderator_test_utils::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(stack: &TestStack, health: Arc<HealthState>) -> Router {
    let state = Arc::new(AppState {
        storage: Arc::new(stack.storage.clone()) as Arc<dyn Storage>,
        hub: stack.hub.clone(),
        dispatcher: Arc::clone(&stack.dispatcher),
        announcer: Arc::clone(&stack.announcer),
        utc_offset: test_offset(),
        timings: PumpTimings::default(),
        shutdown: stack.shutdown.clone(),
    });
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
    build_routes(state, health, metrics_handle)
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn meeting() -> MockStorage {
    MockStorage::new()
        .with_meeting("Review", fixed_start_time(), &["alice", "bob"])
        .with_attendee(1, "carol")
}

// ============================================================================
// Operational endpoints
// ============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let stack = TestStack::new(meeting(), 5);
    let health = Arc::new(HealthState::new());
    let router = app(&stack, Arc::clone(&health));

    let live = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let not_ready = router.clone().oneshot(get("/ready")).await.unwrap();
    assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);

    health.mark_migrated();
    let ready = router.oneshot(get("/ready")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_renders() {
    let stack = TestStack::new(meeting(), 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let stack = TestStack::new(meeting(), 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router.oneshot(get("/ws")).await.unwrap();

    assert!(response.status().is_client_error());
}

// ============================================================================
// Users and meetings
// ============================================================================

#[tokio::test]
async fn test_create_user_then_duplicate_conflicts() {
    let stack = TestStack::new(MockStorage::new(), 5);
    let router = app(&stack, Arc::new(HealthState::new()));
    let body = json!({"userId": "erin", "userName": "Erin"});

    let created = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/users", &body))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(body_json(created).await["userName"], "Erin");

    let duplicate = router
        .oneshot(json_request("POST", "/api/v1/users", &body))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(duplicate).await["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_create_user_rejects_bad_body() {
    let stack = TestStack::new(MockStorage::new(), 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router
        .oneshot(json_request("POST", "/api/v1/users", &json!({"userId": "erin"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_create_meeting_returns_documents_in_presenter_order() {
    let storage = MockStorage::new()
        .with_user("alice", "Alice")
        .with_user("bob", "Bob");
    let stack = TestStack::new(storage, 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/meetings",
            &json!({
                "meetingName": "Review",
                "startTime": "2024/04/01 19:00:00",
                "presenterIds": ["alice", "bob"],
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["meetingId"], 1);
    assert_eq!(body["documentIds"], json!([1, 2]));

    let meeting = stack.storage.meeting_of(1).unwrap();
    assert_eq!(meeting.start_time, fixed_start_time());
    assert!(!meeting.started);
    assert_eq!(stack.storage.participant_of(1, "bob").unwrap().presenter_order, 1);
}

#[tokio::test]
async fn test_create_meeting_validation() {
    let stack = TestStack::new(MockStorage::new().with_user("alice", "Alice"), 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let bad_time = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/meetings",
            &json!({"meetingName": "Review", "startTime": "tomorrow", "presenterIds": ["alice"]}),
        ))
        .await
        .unwrap();
    assert_eq!(bad_time.status(), StatusCode::BAD_REQUEST);

    let no_presenters = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/meetings",
            &json!({"meetingName": "Review", "startTime": "2024/04/01 19:00:00", "presenterIds": []}),
        ))
        .await
        .unwrap();
    assert_eq!(no_presenters.status(), StatusCode::BAD_REQUEST);

    let unknown_presenter = router
        .oneshot(json_request(
            "POST",
            "/api/v1/meetings",
            &json!({"meetingName": "Review", "startTime": "2024/04/01 19:00:00", "presenterIds": ["zed"]}),
        ))
        .await
        .unwrap();
    assert_eq!(unknown_presenter.status(), StatusCode::NOT_FOUND);
    assert!(stack.storage.meeting_of(1).is_none());
}

#[tokio::test]
async fn test_join_lists_presenters_and_starts_meeting() {
    let stack = TestStack::new(meeting().with_user("dave", "Dave"), 5);
    let (_id, mut queue) = stack.subscribe().await;
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/meetings/1/join",
            &json!({"userId": "dave"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["meetingName"], "Review");
    assert_eq!(body["startTime"], "2024/04/01 19:00:00");
    assert_eq!(
        body["presenters"],
        json!([
            {"userId": "alice", "userName": "Alice", "documentId": 1, "presenterOrder": 0},
            {"userId": "bob", "userName": "Bob", "documentId": 2, "presenterOrder": 1},
        ])
    );

    // The start time is in the past, so the reserved timer fires at once.
    let announcement = tokio::time::timeout(Duration::from_secs(5), queue.recv())
        .await
        .expect("start announcement")
        .unwrap();
    let announcement = parse_payload(&announcement);
    assert_eq!(announcement["messageType"], "moderator_msg");
    assert_eq!(announcement["isStartPresen"], true);

    let dave = stack.storage.participant_of(1, "dave").unwrap();
    assert!(dave.joining);
    assert_eq!(dave.presenter_order, -1);
}

#[tokio::test]
async fn test_join_of_started_meeting_schedules_nothing() {
    let stack = TestStack::new(meeting().with_started(1), 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/meetings/1/join",
            &json!({"userId": "carol"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!stack.announcer.is_reserved(1));
}

#[tokio::test]
async fn test_join_unknown_meeting_is_not_found() {
    let stack = TestStack::new(meeting(), 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/meetings/42/join",
            &json!({"userId": "carol"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!stack.announcer.is_reserved(42));
}

#[tokio::test]
async fn test_exit_withdraws_raised_hands() {
    let storage = meeting().with_question(raised_hand(1, "carol", 2, 0));
    let stack = TestStack::new(storage, 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/meetings/1/exit",
            &json!({"userId": "carol"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(stack.storage.questions_of(1).is_empty());
    assert!(!stack.storage.participant_of(1, "carol").unwrap().joining);
}

// ============================================================================
// Documents
// ============================================================================

#[tokio::test]
async fn test_get_document() {
    let stack = TestStack::new(meeting(), 5);
    let router = app(&stack, Arc::new(HealthState::new()));

    let found = router.clone().oneshot(get("/api/v1/documents/2")).await.unwrap();
    assert_eq!(found.status(), StatusCode::OK);
    let body = body_json(found).await;
    assert_eq!(body["presenterId"], "bob");
    assert_eq!(body["meetingId"], 1);

    let missing = router.oneshot(get("/api/v1/documents/9")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_document_broadcasts_event() {
    let stack = TestStack::new(meeting(), 5);
    let (_id, mut queue) = stack.subscribe().await;
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router
        .oneshot(json_request(
            "PUT",
            "/api/v1/documents/1",
            &json!({"documentUrl": "https://slides.example/1.pdf"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["documentUrl"],
        "https://slides.example/1.pdf"
    );

    stack.settle().await;
    let event = parse_payload(&queue.try_recv().unwrap());
    assert_eq!(event["messageType"], "document_update");
    assert_eq!(event["meetingId"], 1);
    assert_eq!(event["documentId"], 1);
}

#[tokio::test]
async fn test_update_document_needs_a_field() {
    let stack = TestStack::new(meeting(), 5);
    let (_id, mut queue) = stack.subscribe().await;
    let router = app(&stack, Arc::new(HealthState::new()));

    let response = router
        .oneshot(json_request("PUT", "/api/v1/documents/1", &json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    stack.settle().await;
    assert!(queue.try_recv().is_err());
}
