//! Inbound pump tests driven by in-memory streams.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::extract::ws::Message;
use futures::channel::mpsc as fmpsc;
use moderator_service::connection::{run_inbound, PumpExit, PumpTimings};
use moderator_test_utils::*;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Inbound = fmpsc::UnboundedSender<Result<Message, String>>;

fn meeting() -> MockStorage {
    MockStorage::new()
        .with_meeting("Review", fixed_start_time(), &["alice"])
        .with_attendee(1, "carol")
}

/// Spawn an inbound pump for a connection registered with the stack's hub.
async fn spawn_pump(
    stack: &TestStack,
    cancel: CancellationToken,
) -> (
    Inbound,
    tokio::sync::mpsc::Receiver<std::sync::Arc<str>>,
    tokio::task::JoinHandle<PumpExit>,
) {
    let (connection_id, queue) = stack.subscribe().await;
    let (tx, rx) = fmpsc::unbounded();
    let pump = tokio::spawn(run_inbound(
        connection_id,
        rx,
        std::sync::Arc::clone(&stack.dispatcher),
        stack.hub.clone(),
        PumpTimings::default(),
        cancel,
    ));
    (tx, queue, pump)
}

#[tokio::test]
async fn test_frames_are_dispatched_and_broadcast() {
    let stack = TestStack::new(meeting(), 5);
    let (_observer, mut observer_queue) = stack.subscribe().await;
    let (tx, _own_queue, pump) = spawn_pump(&stack, CancellationToken::new()).await;

    tx.unbounded_send(Ok(Message::Text(chat_frame("hi")))).unwrap();
    tx.unbounded_send(Ok(Message::Text("garbage".to_string()))).unwrap();
    tx.unbounded_send(Ok(Message::Text(hands_up_frame(1, "carol", 2, true)))).unwrap();
    tx.unbounded_send(Ok(Message::Close(None))).unwrap();

    assert_eq!(pump.await.unwrap(), PumpExit::PeerClosed);
    stack.settle().await;

    let first = parse_payload(&observer_queue.try_recv().unwrap());
    let second = parse_payload(&observer_queue.try_recv().unwrap());
    assert_eq!(first["messageType"], "message");
    assert_eq!(second["messageType"], "handsup");
    assert!(observer_queue.try_recv().is_err(), "garbage frame was dropped");

    let status = stack.hub.status().await.unwrap();
    assert_eq!(status.connections, 1, "pump unregistered on exit");
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out() {
    let stack = TestStack::new(meeting(), 5);
    let started = Instant::now();
    let (_tx, mut own_queue, pump) = spawn_pump(&stack, CancellationToken::new()).await;

    assert_eq!(pump.await.unwrap(), PumpExit::ReadTimeout);
    assert!(started.elapsed() >= Duration::from_secs(60));

    // Unregistering closes the connection's queue.
    assert!(own_queue.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pong_extends_read_deadline() {
    let stack = TestStack::new(meeting(), 5);
    let started = Instant::now();
    let (tx, _queue, pump) = spawn_pump(&stack, CancellationToken::new()).await;

    tokio::time::advance(Duration::from_secs(50)).await;
    tx.unbounded_send(Ok(Message::Pong(Vec::new()))).unwrap();
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_secs(50)).await;
    tokio::task::yield_now().await;
    assert!(!pump.is_finished(), "deadline moved to 110s");

    // Text frames do not extend the deadline.
    tx.unbounded_send(Ok(Message::Text(chat_frame("still here")))).unwrap();

    assert_eq!(pump.await.unwrap(), PumpExit::ReadTimeout);
    assert!(started.elapsed() >= Duration::from_secs(110));
    assert!(started.elapsed() < Duration::from_secs(160));
}

#[tokio::test]
async fn test_oversized_frame_ends_connection() {
    let stack = TestStack::new(meeting(), 5);
    let (tx, _queue, pump) = spawn_pump(&stack, CancellationToken::new()).await;

    tx.unbounded_send(Ok(Message::Text("x".repeat(600)))).unwrap();

    assert_eq!(pump.await.unwrap(), PumpExit::FrameTooLarge(600));
}

#[tokio::test]
async fn test_read_error_ends_connection() {
    let stack = TestStack::new(meeting(), 5);
    let (tx, _queue, pump) = spawn_pump(&stack, CancellationToken::new()).await;

    tx.unbounded_send(Err("connection reset".to_string())).unwrap();

    assert_eq!(
        pump.await.unwrap(),
        PumpExit::ReadError("connection reset".to_string())
    );
}

#[tokio::test]
async fn test_cancel_stops_pump() {
    let stack = TestStack::new(meeting(), 5);
    let cancel = CancellationToken::new();
    let (_tx, _queue, pump) = spawn_pump(&stack, cancel.clone()).await;

    cancel.cancel();

    assert_eq!(pump.await.unwrap(), PumpExit::Cancelled);
    assert_eq!(stack.hub.status().await.unwrap().connections, 0);
}
