//! Test fixtures: realtime frame builders, timestamps and a wired-up
//! hub/engine/dispatcher stack over [`MockStorage`].

use crate::mock_storage::MockStorage;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use moderator_service::connection::{ConnectionId, OUTBOUND_QUEUE_CAPACITY};
use moderator_service::dispatcher::Dispatcher;
use moderator_service::hub::{HubActor, HubHandle};
use moderator_service::moderator::ModeratorEngine;
use moderator_service::scheduler::StartAnnouncer;
use moderator_service::storage::{DocumentId, MeetingId, NewQuestion, QuestionId, Storage};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Offset of client timestamps in fixtures (UTC+9).
#[must_use]
pub fn test_offset() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

/// 2024-04-01 10:00:00 UTC.
#[must_use]
pub fn fixed_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap()
}

/// A written question submitted `minutes` after [`fixed_start_time`].
#[must_use]
pub fn written_question(
    document_id: DocumentId,
    user_id: &str,
    page: i32,
    body: &str,
    minutes: i64,
) -> NewQuestion {
    NewQuestion {
        document_id,
        user_id: user_id.to_string(),
        body: body.to_string(),
        page,
        submitted_at: fixed_start_time() + chrono::Duration::minutes(minutes),
        is_voice: false,
        answered: false,
    }
}

/// A raised hand submitted `minutes` after [`fixed_start_time`].
#[must_use]
pub fn raised_hand(document_id: DocumentId, user_id: &str, page: i32, minutes: i64) -> NewQuestion {
    NewQuestion {
        is_voice: true,
        ..written_question(document_id, user_id, page, "", minutes)
    }
}

// ----------------------------------------------------------------------------
// Frame builders
// ----------------------------------------------------------------------------

#[must_use]
pub fn chat_frame(message: &str) -> String {
    json!({"messageType": "message", "message": message}).to_string()
}

#[must_use]
pub fn question_frame(
    meeting_id: MeetingId,
    document_id: DocumentId,
    user_id: &str,
    page: i32,
    body: &str,
    question_time: &str,
) -> String {
    json!({
        "messageType": "question",
        "userId": user_id,
        "meetingId": meeting_id,
        "questionBody": body,
        "documentId": document_id,
        "documentPage": page,
        "questionTime": question_time,
    })
    .to_string()
}

#[must_use]
pub fn vote_frame(question_id: QuestionId, is_vote: bool) -> String {
    json!({"messageType": "question_vote", "questionId": question_id, "isVote": is_vote})
        .to_string()
}

#[must_use]
pub fn hands_up_frame(document_id: DocumentId, user_id: &str, page: i32, is_up: bool) -> String {
    json!({
        "messageType": "handsup",
        "userId": user_id,
        "documentId": document_id,
        "documentPage": page,
        "isUp": is_up,
    })
    .to_string()
}

#[must_use]
pub fn reaction_frame(document_id: DocumentId, page: i32, is_reaction: bool) -> String {
    json!({
        "messageType": "reaction",
        "documentId": document_id,
        "documentPage": page,
        "isReaction": is_reaction,
    })
    .to_string()
}

#[must_use]
pub fn finish_word(meeting_id: MeetingId, presenter_id: &str, finish_type: &str) -> String {
    json!({
        "messageType": "finishword",
        "meetingId": meeting_id,
        "presenterId": presenter_id,
        "finishType": finish_type,
    })
    .to_string()
}

/// Parse a broadcast payload for assertions.
#[must_use]
pub fn parse_payload(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap()
}

// ----------------------------------------------------------------------------
// Service stack
// ----------------------------------------------------------------------------

/// Hub, engine, dispatcher and announcer wired to one [`MockStorage`].
pub struct TestStack {
    pub storage: MockStorage,
    pub hub: HubHandle,
    pub hub_task: JoinHandle<()>,
    pub engine: Arc<ModeratorEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub announcer: Arc<StartAnnouncer>,
    pub shutdown: CancellationToken,
}

impl TestStack {
    /// Spawn the hub and build the stack. Must run inside a tokio runtime.
    #[must_use]
    pub fn new(storage: MockStorage, questions_per_presenter: u32) -> Self {
        let shutdown = CancellationToken::new();
        let (hub, hub_task) = HubActor::spawn(shutdown.child_token());
        let shared: Arc<dyn Storage> = Arc::new(storage.clone());
        let engine = Arc::new(ModeratorEngine::new(
            Arc::clone(&shared),
            questions_per_presenter,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&shared),
            Arc::clone(&engine),
            test_offset(),
        ));
        let announcer = Arc::new(StartAnnouncer::new(
            Arc::clone(&engine),
            shared,
            hub.clone(),
            shutdown.child_token(),
        ));

        Self {
            storage,
            hub,
            hub_task,
            engine,
            dispatcher,
            announcer,
            shutdown,
        }
    }

    /// Register a fake connection and return its outbound queue.
    pub async fn subscribe(&self) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.hub.register(connection_id, tx).await.unwrap();
        (connection_id, rx)
    }

    /// Dispatch a frame and broadcast the result, as an inbound pump does.
    /// Returns whether anything was broadcast.
    pub async fn send(&self, frame: &str) -> bool {
        match self.dispatcher.dispatch(frame).await {
            Ok(Some(envelope)) => {
                self.hub.broadcast(envelope.encode().unwrap()).await.unwrap();
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    /// Wait until the hub has processed everything sent so far.
    pub async fn settle(&self) {
        self.hub.status().await.unwrap();
    }
}

impl Drop for TestStack {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
