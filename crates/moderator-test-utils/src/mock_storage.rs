//! In-memory storage mock.
//!
//! Mirrors the constraints of the PostgreSQL schema: unique user ids,
//! one pending raised hand per (document, user, page), dense presenter
//! orders, and foreign keys surfacing as `NotFound`. Ids are assigned from
//! 1 in creation order, so fixtures can name them directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use moderator_test_utils::MockStorage;
//!
//! let storage = MockStorage::new()
//!     .with_meeting("Weekly review", start, &["alice", "bob"]) // meeting 1, documents 1 and 2
//!     .with_attendee(1, "carol")
//!     .with_speak_count(1, "carol", 3)
//!     .with_reaction(1, 4, 2);
//!
//! storage.set_fail_writes(true);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moderator_service::storage::{
    CreatedMeeting, Document, DocumentId, JoinedMeeting, Meeting, MeetingId, NewQuestion,
    Participant, Presenter, Question, QuestionId, Reaction, Storage, StorageError, VoteTally,
    ATTENDEE_ORDER, MODERATOR_USER_ID,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory [`Storage`] for tests.
#[derive(Debug, Clone)]
pub struct MockStorage {
    inner: Arc<Mutex<MockStorageInner>>,
}

#[derive(Debug, Default)]
struct MockStorageInner {
    users: HashMap<String, String>,
    meetings: BTreeMap<MeetingId, Meeting>,
    /// Keyed by (meeting, user) so iteration follows user id order.
    participants: BTreeMap<(MeetingId, String), Participant>,
    documents: BTreeMap<DocumentId, Document>,
    questions: BTreeMap<QuestionId, Question>,
    reactions: BTreeMap<(DocumentId, i32), Reaction>,
    next_meeting_id: MeetingId,
    next_document_id: DocumentId,
    next_question_id: QuestionId,
    fail_writes: bool,
    writes: u64,
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStorage {
    /// Empty store with the `moderator` user seeded.
    #[must_use]
    pub fn new() -> Self {
        let mut inner = MockStorageInner {
            next_meeting_id: 1,
            next_document_id: 1,
            next_question_id: 1,
            ..MockStorageInner::default()
        };
        inner
            .users
            .insert(MODERATOR_USER_ID.to_string(), "Moderator".to_string());
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockStorageInner> {
        self.inner.lock().unwrap()
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    /// Add a user.
    #[must_use]
    pub fn with_user(self, user_id: &str, user_name: &str) -> Self {
        self.lock()
            .users
            .insert(user_id.to_string(), user_name.to_string());
        self
    }

    /// Add a meeting whose presenters take orders 0..N-1 and own one
    /// document each. Unknown presenters are created with a capitalized
    /// display name. Presenters start out joined.
    #[must_use]
    pub fn with_meeting(self, name: &str, start_time: DateTime<Utc>, presenters: &[&str]) -> Self {
        {
            let mut inner = self.lock();
            for id in presenters {
                inner
                    .users
                    .entry((*id).to_string())
                    .or_insert_with(|| display_name(id));
            }
            let presenter_ids: Vec<String> = presenters.iter().map(|p| (*p).to_string()).collect();
            let created = inner.insert_meeting(name, start_time, &presenter_ids).unwrap();
            for id in presenters {
                if let Some(p) = inner
                    .participants
                    .get_mut(&(created.meeting_id, (*id).to_string()))
                {
                    p.joining = true;
                }
            }
        }
        self
    }

    /// Add a joined attendee, creating the user if needed.
    #[must_use]
    pub fn with_attendee(self, meeting_id: MeetingId, user_id: &str) -> Self {
        {
            let mut inner = self.lock();
            inner
                .users
                .entry(user_id.to_string())
                .or_insert_with(|| display_name(user_id));
            inner.participants.insert(
                (meeting_id, user_id.to_string()),
                Participant {
                    meeting_id,
                    user_id: user_id.to_string(),
                    presenter_order: ATTENDEE_ORDER,
                    speak_count: 0,
                    joining: true,
                },
            );
        }
        self
    }

    #[must_use]
    pub fn with_speak_count(self, meeting_id: MeetingId, user_id: &str, speak_count: i32) -> Self {
        self.lock()
            .participants
            .get_mut(&(meeting_id, user_id.to_string()))
            .expect("participant fixture missing")
            .speak_count = speak_count;
        self
    }

    #[must_use]
    pub fn with_reaction(self, document_id: DocumentId, page: i32, count: i32) -> Self {
        self.lock().reactions.insert(
            (document_id, page),
            Reaction {
                document_id,
                page,
                count,
                suggested: false,
            },
        );
        self
    }

    #[must_use]
    pub fn with_question(self, question: NewQuestion) -> Self {
        self.lock().insert_question(question).unwrap();
        self
    }

    #[must_use]
    pub fn with_started(self, meeting_id: MeetingId) -> Self {
        self.lock()
            .meetings
            .get_mut(&meeting_id)
            .expect("meeting fixture missing")
            .started = true;
        self
    }

    /// Make every subsequent write fail with `StorageError::Database`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// All questions of a document, oldest first.
    #[must_use]
    pub fn questions_of(&self, document_id: DocumentId) -> Vec<Question> {
        self.lock().sorted_questions(document_id)
    }

    #[must_use]
    pub fn participant_of(&self, meeting_id: MeetingId, user_id: &str) -> Option<Participant> {
        self.lock()
            .participants
            .get(&(meeting_id, user_id.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn reaction_of(&self, document_id: DocumentId, page: i32) -> Option<Reaction> {
        self.lock().reactions.get(&(document_id, page)).cloned()
    }

    #[must_use]
    pub fn meeting_of(&self, meeting_id: MeetingId) -> Option<Meeting> {
        self.lock().meetings.get(&meeting_id).cloned()
    }

    /// Document owned by `presenter_id` in the meeting.
    #[must_use]
    pub fn document_id_of(&self, meeting_id: MeetingId, presenter_id: &str) -> Option<DocumentId> {
        self.lock()
            .documents
            .values()
            .find(|d| d.meeting_id == meeting_id && d.presenter_id == presenter_id)
            .map(|d| d.id)
    }
}

fn display_name(user_id: &str) -> String {
    let mut chars = user_id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn not_found(what: impl Into<String>) -> StorageError {
    StorageError::NotFound(what.into())
}

impl MockStorageInner {
    /// Gate for every write: fails when injection is on, counts otherwise.
    fn begin_write(&mut self) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Database("injected write failure".to_string()));
        }
        self.writes += 1;
        Ok(())
    }

    fn insert_meeting(
        &mut self,
        name: &str,
        start_time: DateTime<Utc>,
        presenter_ids: &[String],
    ) -> Result<CreatedMeeting, StorageError> {
        if let Some(missing) = presenter_ids.iter().find(|id| !self.users.contains_key(*id)) {
            return Err(not_found(format!("user {missing}")));
        }

        let meeting_id = self.next_meeting_id;
        self.next_meeting_id += 1;
        self.meetings.insert(
            meeting_id,
            Meeting {
                id: meeting_id,
                name: name.to_string(),
                start_time,
                started: false,
                ended: false,
            },
        );

        let mut document_ids = Vec::with_capacity(presenter_ids.len());
        for (order, presenter_id) in (0_i32..).zip(presenter_ids) {
            self.participants.insert(
                (meeting_id, presenter_id.clone()),
                Participant {
                    meeting_id,
                    user_id: presenter_id.clone(),
                    presenter_order: order,
                    speak_count: 0,
                    joining: false,
                },
            );

            let document_id = self.next_document_id;
            self.next_document_id += 1;
            self.documents.insert(
                document_id,
                Document {
                    id: document_id,
                    meeting_id,
                    presenter_id: presenter_id.clone(),
                    url: None,
                    script: None,
                },
            );
            document_ids.push(document_id);
        }

        Ok(CreatedMeeting {
            meeting_id,
            document_ids,
        })
    }

    fn insert_question(&mut self, question: NewQuestion) -> Result<Question, StorageError> {
        if !self.documents.contains_key(&question.document_id) {
            return Err(not_found(format!("document {}", question.document_id)));
        }
        if !self.users.contains_key(&question.user_id) {
            return Err(not_found(format!("user {}", question.user_id)));
        }
        if question.is_voice && !question.answered {
            let duplicate = self.questions.values().any(|q| {
                q.is_voice
                    && !q.answered
                    && q.document_id == question.document_id
                    && q.user_id == question.user_id
                    && q.page == question.page
            });
            if duplicate {
                return Err(StorageError::Conflict(format!(
                    "pending voice question of {} on page {}",
                    question.user_id, question.page
                )));
            }
        }

        let id = self.next_question_id;
        self.next_question_id += 1;
        let stored = Question {
            id,
            document_id: question.document_id,
            user_id: question.user_id,
            body: question.body,
            page: question.page,
            vote_count: 0,
            submitted_at: question.submitted_at,
            answered: question.answered,
            is_voice: question.is_voice,
        };
        self.questions.insert(id, stored.clone());
        Ok(stored)
    }

    fn sorted_questions(&self, document_id: DocumentId) -> Vec<Question> {
        let mut questions: Vec<Question> = self
            .questions
            .values()
            .filter(|q| q.document_id == document_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| (q.submitted_at, q.id));
        questions
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn create_user(&self, user_id: &str, user_name: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        if inner.users.contains_key(user_id) {
            return Err(StorageError::Conflict(format!("user {user_id}")));
        }
        inner
            .users
            .insert(user_id.to_string(), user_name.to_string());
        Ok(())
    }

    async fn user_name(&self, user_id: &str) -> Result<String, StorageError> {
        self.lock()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| not_found(format!("user {user_id}")))
    }

    async fn create_meeting(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        presenter_ids: &[String],
    ) -> Result<CreatedMeeting, StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        inner.insert_meeting(name, start_time, presenter_ids)
    }

    async fn meeting(&self, meeting_id: MeetingId) -> Result<Meeting, StorageError> {
        self.lock()
            .meetings
            .get(&meeting_id)
            .cloned()
            .ok_or_else(|| not_found(format!("meeting {meeting_id}")))
    }

    async fn mark_meeting_started(&self, meeting_id: MeetingId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        inner
            .meetings
            .get_mut(&meeting_id)
            .map(|m| m.started = true)
            .ok_or_else(|| not_found(format!("meeting {meeting_id}")))
    }

    async fn mark_meeting_ended(&self, meeting_id: MeetingId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        inner
            .meetings
            .get_mut(&meeting_id)
            .map(|m| m.ended = true)
            .ok_or_else(|| not_found(format!("meeting {meeting_id}")))
    }

    async fn join_meeting(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<JoinedMeeting, StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        let meeting = inner
            .meetings
            .get(&meeting_id)
            .cloned()
            .ok_or_else(|| not_found(format!("meeting {meeting_id}")))?;
        if !inner.users.contains_key(user_id) {
            return Err(not_found(format!("user {user_id}")));
        }

        inner
            .participants
            .entry((meeting_id, user_id.to_string()))
            .or_insert_with(|| Participant {
                meeting_id,
                user_id: user_id.to_string(),
                presenter_order: ATTENDEE_ORDER,
                speak_count: 0,
                joining: false,
            })
            .joining = true;

        let mut presenters: Vec<Presenter> = inner
            .participants
            .values()
            .filter(|p| p.meeting_id == meeting_id && p.is_presenter())
            .filter_map(|p| {
                let document = inner
                    .documents
                    .values()
                    .find(|d| d.meeting_id == meeting_id && d.presenter_id == p.user_id)?;
                Some(Presenter {
                    user_id: p.user_id.clone(),
                    user_name: inner.users.get(&p.user_id).cloned().unwrap_or_default(),
                    document_id: document.id,
                    presenter_order: p.presenter_order,
                })
            })
            .collect();
        presenters.sort_by_key(|p| p.presenter_order);

        Ok(JoinedMeeting {
            meeting,
            presenters,
        })
    }

    async fn exit_meeting(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        let participant = inner
            .participants
            .get_mut(&(meeting_id, user_id.to_string()))
            .ok_or_else(|| not_found(format!("participant {user_id} in meeting {meeting_id}")))?;
        participant.joining = false;

        let documents: Vec<DocumentId> = inner
            .documents
            .values()
            .filter(|d| d.meeting_id == meeting_id)
            .map(|d| d.id)
            .collect();
        inner.questions.retain(|_, q| {
            !(q.is_voice && !q.answered && q.user_id == user_id && documents.contains(&q.document_id))
        });
        Ok(())
    }

    async fn participant(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<Participant, StorageError> {
        self.participant_of(meeting_id, user_id)
            .ok_or_else(|| not_found(format!("participant {user_id} in meeting {meeting_id}")))
    }

    async fn participant_by_order(
        &self,
        meeting_id: MeetingId,
        presenter_order: i32,
    ) -> Result<Option<Participant>, StorageError> {
        if presenter_order < 0 {
            return Ok(None);
        }
        Ok(self
            .lock()
            .participants
            .values()
            .find(|p| p.meeting_id == meeting_id && p.presenter_order == presenter_order)
            .cloned())
    }

    async fn joined_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, StorageError> {
        Ok(self
            .lock()
            .participants
            .values()
            .filter(|p| p.meeting_id == meeting_id && p.joining)
            .cloned()
            .collect())
    }

    async fn increment_speak_count(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        inner
            .participants
            .get_mut(&(meeting_id, user_id.to_string()))
            .map(|p| p.speak_count += 1)
            .ok_or_else(|| not_found(format!("participant {user_id} in meeting {meeting_id}")))
    }

    async fn document(&self, document_id: DocumentId) -> Result<Document, StorageError> {
        self.lock()
            .documents
            .get(&document_id)
            .cloned()
            .ok_or_else(|| not_found(format!("document {document_id}")))
    }

    async fn presenter_document(
        &self,
        meeting_id: MeetingId,
        presenter_id: &str,
    ) -> Result<Document, StorageError> {
        self.lock()
            .documents
            .values()
            .find(|d| d.meeting_id == meeting_id && d.presenter_id == presenter_id)
            .cloned()
            .ok_or_else(|| not_found(format!("document of {presenter_id} in meeting {meeting_id}")))
    }

    async fn update_document(
        &self,
        document_id: DocumentId,
        url: Option<String>,
        script: Option<String>,
    ) -> Result<Document, StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        let document = inner
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| not_found(format!("document {document_id}")))?;
        if url.is_some() {
            document.url = url;
        }
        if script.is_some() {
            document.script = script;
        }
        Ok(document.clone())
    }

    async fn create_question(&self, question: NewQuestion) -> Result<Question, StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        inner.insert_question(question)
    }

    async fn document_questions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Question>, StorageError> {
        Ok(self.lock().sorted_questions(document_id))
    }

    async fn pending_voice_question(
        &self,
        document_id: DocumentId,
        user_id: &str,
        page: i32,
    ) -> Result<Option<Question>, StorageError> {
        Ok(self
            .lock()
            .sorted_questions(document_id)
            .into_iter()
            .find(|q| q.is_voice && !q.answered && q.user_id == user_id && q.page == page))
    }

    async fn mark_question_answered(&self, question_id: QuestionId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        inner
            .questions
            .get_mut(&question_id)
            .map(|q| q.answered = true)
            .ok_or_else(|| not_found(format!("question {question_id}")))
    }

    async fn vote_question(
        &self,
        question_id: QuestionId,
        delta: i32,
    ) -> Result<VoteTally, StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        let (document_id, vote_count) = {
            let question = inner
                .questions
                .get_mut(&question_id)
                .ok_or_else(|| not_found(format!("question {question_id}")))?;
            question.vote_count += delta;
            (question.document_id, question.vote_count)
        };
        let meeting_id = inner
            .documents
            .get(&document_id)
            .map(|d| d.meeting_id)
            .ok_or_else(|| not_found(format!("document {document_id}")))?;
        Ok(VoteTally {
            meeting_id,
            question_id,
            vote_count,
        })
    }

    async fn delete_question(&self, question_id: QuestionId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        inner
            .questions
            .remove(&question_id)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("question {question_id}")))
    }

    async fn document_reactions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Reaction>, StorageError> {
        Ok(self
            .lock()
            .reactions
            .values()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn adjust_reaction(
        &self,
        document_id: DocumentId,
        page: i32,
        delta: i32,
    ) -> Result<i32, StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        if !inner.documents.contains_key(&document_id) {
            return Err(not_found(format!("document {document_id}")));
        }
        if delta > 0 {
            let reaction = inner
                .reactions
                .entry((document_id, page))
                .or_insert(Reaction {
                    document_id,
                    page,
                    count: 0,
                    suggested: false,
                });
            reaction.count += delta;
            return Ok(reaction.count);
        }
        Ok(inner
            .reactions
            .get_mut(&(document_id, page))
            .map_or(0, |r| {
                r.count += delta;
                r.count
            }))
    }

    async fn mark_reaction_suggested(
        &self,
        document_id: DocumentId,
        page: i32,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.begin_write()?;
        inner
            .reactions
            .get_mut(&(document_id, page))
            .map(|r| r.suggested = true)
            .ok_or_else(|| not_found(format!("reaction on page {page} of document {document_id}")))
    }
}
