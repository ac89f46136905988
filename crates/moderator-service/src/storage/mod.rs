//! Storage collaborator.
//!
//! Every durable entity (users, meetings, participants, documents, questions,
//! reactions) lives behind the [`Storage`] trait. Each call is atomic on its
//! own; multi-step sequences such as "create question, then bump the asker's
//! speak count" are not wrapped in a transaction and may complete partially.
//!
//! [`PgStorage`] is the production implementation. Tests use the in-memory
//! mock from `moderator-test-utils`.

mod postgres;

pub use postgres::PgStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type MeetingId = i64;
pub type DocumentId = i64;
pub type QuestionId = i64;

/// Author id of questions synthesized by the moderator.
pub const MODERATOR_USER_ID: &str = "moderator";

/// `presenter_order` of attendees who do not present.
pub const ATTENDEE_ORDER: i32 = -1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    pub id: MeetingId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    /// Set once the start announcement has been broadcast.
    pub started: bool,
    /// Set once the last presenter has finished.
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub meeting_id: MeetingId,
    pub user_id: String,
    /// [`ATTENDEE_ORDER`] for attendees, else a dense ordinal from 0.
    pub presenter_order: i32,
    pub speak_count: i32,
    pub joining: bool,
}

impl Participant {
    pub fn is_presenter(&self) -> bool {
        self.presenter_order >= 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    pub meeting_id: MeetingId,
    pub presenter_id: String,
    pub url: Option<String>,
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: QuestionId,
    pub document_id: DocumentId,
    pub user_id: String,
    /// Empty for raised hands.
    pub body: String,
    pub page: i32,
    pub vote_count: i32,
    pub submitted_at: DateTime<Utc>,
    pub answered: bool,
    pub is_voice: bool,
}

/// Fields of a question about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub document_id: DocumentId,
    pub user_id: String,
    pub body: String,
    pub page: i32,
    pub submitted_at: DateTime<Utc>,
    pub is_voice: bool,
    pub answered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub document_id: DocumentId,
    pub page: i32,
    pub count: i32,
    /// Set once escalated into a moderator question; never cleared.
    pub suggested: bool,
}

/// A presenter as listed to joining participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presenter {
    pub user_id: String,
    pub user_name: String,
    pub document_id: DocumentId,
    pub presenter_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMeeting {
    pub meeting_id: MeetingId,
    /// One per presenter, in presenter order.
    pub document_ids: Vec<DocumentId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedMeeting {
    pub meeting: Meeting,
    /// Ordered by `presenter_order`.
    pub presenters: Vec<Presenter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub meeting_id: MeetingId,
    pub question_id: QuestionId,
    pub vote_count: i32,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_user(&self, user_id: &str, user_name: &str) -> Result<(), StorageError>;

    async fn user_name(&self, user_id: &str) -> Result<String, StorageError>;

    /// Create a meeting, one presenter participant per id (orders 0..N-1)
    /// and one empty document per presenter.
    async fn create_meeting(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        presenter_ids: &[String],
    ) -> Result<CreatedMeeting, StorageError>;

    async fn meeting(&self, meeting_id: MeetingId) -> Result<Meeting, StorageError>;

    async fn mark_meeting_started(&self, meeting_id: MeetingId) -> Result<(), StorageError>;

    async fn mark_meeting_ended(&self, meeting_id: MeetingId) -> Result<(), StorageError>;

    /// Add the user as an attendee if needed and mark them as joined.
    async fn join_meeting(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<JoinedMeeting, StorageError>;

    /// Mark the user as gone and delete their pending raised hands.
    async fn exit_meeting(&self, meeting_id: MeetingId, user_id: &str)
        -> Result<(), StorageError>;

    async fn participant(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<Participant, StorageError>;

    async fn participant_by_order(
        &self,
        meeting_id: MeetingId,
        presenter_order: i32,
    ) -> Result<Option<Participant>, StorageError>;

    /// Participants currently joined, ordered by user id.
    async fn joined_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, StorageError>;

    async fn increment_speak_count(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<(), StorageError>;

    async fn document(&self, document_id: DocumentId) -> Result<Document, StorageError>;

    async fn presenter_document(
        &self,
        meeting_id: MeetingId,
        presenter_id: &str,
    ) -> Result<Document, StorageError>;

    /// Replace the provided fields; `None` keeps the stored value.
    async fn update_document(
        &self,
        document_id: DocumentId,
        url: Option<String>,
        script: Option<String>,
    ) -> Result<Document, StorageError>;

    /// Fails with [`StorageError::Conflict`] when a second unanswered raised
    /// hand for the same (document, user, page) is created.
    async fn create_question(&self, question: NewQuestion) -> Result<Question, StorageError>;

    /// All questions of a document, oldest first.
    async fn document_questions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Question>, StorageError>;

    async fn pending_voice_question(
        &self,
        document_id: DocumentId,
        user_id: &str,
        page: i32,
    ) -> Result<Option<Question>, StorageError>;

    async fn mark_question_answered(&self, question_id: QuestionId) -> Result<(), StorageError>;

    async fn vote_question(
        &self,
        question_id: QuestionId,
        delta: i32,
    ) -> Result<VoteTally, StorageError>;

    async fn delete_question(&self, question_id: QuestionId) -> Result<(), StorageError>;

    async fn document_reactions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Reaction>, StorageError>;

    /// Apply `delta` to the page's counter and return the new value. A
    /// negative delta on a page with no counter creates nothing and returns 0.
    async fn adjust_reaction(
        &self,
        document_id: DocumentId,
        page: i32,
        delta: i32,
    ) -> Result<i32, StorageError>;

    async fn mark_reaction_suggested(
        &self,
        document_id: DocumentId,
        page: i32,
    ) -> Result<(), StorageError>;
}
