//! Hub fan-out tests with several concurrent producers and consumers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use moderator_service::connection::ConnectionId;
use moderator_service::hub::HubActor;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn drain(queue: &mut mpsc::Receiver<Arc<str>>) -> Vec<String> {
    let mut received = Vec::new();
    while let Ok(payload) = queue.try_recv() {
        received.push(payload.to_string());
    }
    received
}

#[tokio::test]
async fn test_every_connection_sees_every_broadcast_once_in_one_order() {
    let (hub, _task) = HubActor::spawn(CancellationToken::new());

    let mut queues = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = mpsc::channel(256);
        hub.register(ConnectionId::new(), tx).await.unwrap();
        queues.push(rx);
    }

    let producers: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|tag| {
            let hub = hub.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    hub.broadcast(Arc::from(format!("{tag}-{i}"))).await.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    hub.status().await.unwrap();

    let sequences: Vec<Vec<String>> = queues.iter_mut().map(drain).collect();
    let first = sequences.first().unwrap();

    assert_eq!(first.len(), 100);
    assert_eq!(first.iter().collect::<HashSet<_>>().len(), 100, "no duplicates");
    for sequence in &sequences {
        assert_eq!(sequence, first, "all connections share one order");
    }

    // Each producer's own payloads stay in send order.
    let a_order: Vec<&String> = first.iter().filter(|p| p.starts_with("a-")).collect();
    let expected: Vec<String> = (0..50).map(|i| format!("a-{i}")).collect();
    assert_eq!(a_order, expected.iter().collect::<Vec<_>>());
}

#[tokio::test]
async fn test_slow_connection_does_not_hold_back_others() {
    let (hub, _task) = HubActor::spawn(CancellationToken::new());

    let (fast_tx, mut fast_rx) = mpsc::channel(16);
    let (slow_tx, mut slow_rx) = mpsc::channel(1);
    hub.register(ConnectionId::new(), fast_tx).await.unwrap();
    hub.register(ConnectionId::new(), slow_tx).await.unwrap();

    for i in 0..5 {
        hub.broadcast(Arc::from(format!("event-{i}"))).await.unwrap();
    }
    let status = hub.status().await.unwrap();

    assert_eq!(drain(&mut fast_rx).len(), 5);
    assert_eq!(drain(&mut slow_rx), vec!["event-0".to_string()]);
    assert_eq!(status.connections, 2);
    assert_eq!(status.broadcasts, 5);
    assert_eq!(status.dropped, 4);
}

#[tokio::test]
async fn test_unregistered_connection_stops_receiving() {
    let (hub, _task) = HubActor::spawn(CancellationToken::new());
    let leaving = ConnectionId::new();

    let (stay_tx, mut stay_rx) = mpsc::channel(16);
    let (leave_tx, mut leave_rx) = mpsc::channel(16);
    hub.register(ConnectionId::new(), stay_tx).await.unwrap();
    hub.register(leaving, leave_tx).await.unwrap();

    hub.broadcast(Arc::from("before")).await.unwrap();
    hub.unregister(leaving).await.unwrap();
    hub.broadcast(Arc::from("after")).await.unwrap();
    hub.status().await.unwrap();

    assert_eq!(drain(&mut stay_rx), vec!["before", "after"]);
    assert_eq!(leave_rx.recv().await.as_deref(), Some("before"));
    assert!(leave_rx.recv().await.is_none(), "queue closed on unregister");
}
