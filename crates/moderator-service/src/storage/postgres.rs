//! PostgreSQL storage.
//!
//! All queries use parameterized statements and record
//! `moderator_db_query_duration_seconds` with an operation label.

use super::{
    CreatedMeeting, Document, DocumentId, JoinedMeeting, Meeting, MeetingId, NewQuestion,
    Participant, Presenter, Question, QuestionId, Reaction, Storage, StorageError, VoteTally,
    ATTENDEE_ORDER,
};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;

/// [`Storage`] backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Meeting row, presenter participants and their empty documents, in one
    /// transaction.
    async fn insert_meeting(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        presenter_ids: &[String],
    ) -> Result<CreatedMeeting, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let meeting_id: MeetingId = sqlx::query(
            r#"
            INSERT INTO meetings (meeting_name, start_time)
            VALUES ($1, $2)
            RETURNING meeting_id
            "#,
        )
        .bind(name)
        .bind(start_time)
        .fetch_one(&mut *tx)
        .await?
        .get("meeting_id");

        let mut document_ids = Vec::with_capacity(presenter_ids.len());
        for (order, presenter_id) in (0_i32..).zip(presenter_ids) {
            sqlx::query(
                r#"
                INSERT INTO participants (meeting_id, user_id, presenter_order)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(meeting_id)
            .bind(presenter_id)
            .bind(order)
            .execute(&mut *tx)
            .await?;

            let document_id: DocumentId = sqlx::query(
                r#"
                INSERT INTO documents (meeting_id, presenter_id)
                VALUES ($1, $2)
                RETURNING document_id
                "#,
            )
            .bind(meeting_id)
            .bind(presenter_id)
            .fetch_one(&mut *tx)
            .await?
            .get("document_id");

            document_ids.push(document_id);
        }

        tx.commit().await?;
        Ok(CreatedMeeting {
            meeting_id,
            document_ids,
        })
    }

    /// Clear the joined flag and drop pending raised hands. Returns the number
    /// of participant rows updated.
    async fn leave_meeting(&self, meeting_id: MeetingId, user_id: &str) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE participants SET joining = FALSE WHERE meeting_id = $1 AND user_id = $2",
        )
        .bind(meeting_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM questions q
            USING documents d
            WHERE q.document_id = d.document_id
              AND d.meeting_id = $1
              AND q.user_id = $2
              AND q.is_voice AND NOT q.answered
            "#,
        )
        .bind(meeting_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }
}

/// Record the query duration and map driver errors.
fn finish<T>(
    operation: &'static str,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, StorageError> {
    let duration = start.elapsed();
    match result {
        Ok(value) => {
            metrics::record_db_query(operation, "success", duration);
            Ok(value)
        }
        Err(e) => {
            metrics::record_db_query(operation, "error", duration);
            tracing::warn!(target: "moderator.storage", operation, error = %e, "Query failed");
            Err(map_sqlx_error(e))
        }
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::RowNotFound => StorageError::NotFound("row".to_string()),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StorageError::Conflict(db_err.message().to_string())
        }
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            StorageError::NotFound(db_err.message().to_string())
        }
        _ => StorageError::Database(err.to_string()),
    }
}

fn not_found(what: impl Into<String>) -> StorageError {
    StorageError::NotFound(what.into())
}

fn map_row_to_meeting(row: &PgRow) -> Meeting {
    Meeting {
        id: row.get("meeting_id"),
        name: row.get("meeting_name"),
        start_time: row.get("start_time"),
        started: row.get("started"),
        ended: row.get("ended"),
    }
}

fn map_row_to_participant(row: &PgRow) -> Participant {
    Participant {
        meeting_id: row.get("meeting_id"),
        user_id: row.get("user_id"),
        presenter_order: row.get("presenter_order"),
        speak_count: row.get("speak_count"),
        joining: row.get("joining"),
    }
}

fn map_row_to_document(row: &PgRow) -> Document {
    Document {
        id: row.get("document_id"),
        meeting_id: row.get("meeting_id"),
        presenter_id: row.get("presenter_id"),
        url: row.get("document_url"),
        script: row.get("script"),
    }
}

fn map_row_to_question(row: &PgRow) -> Question {
    Question {
        id: row.get("question_id"),
        document_id: row.get("document_id"),
        user_id: row.get("user_id"),
        body: row.get("question_body"),
        page: row.get("document_page"),
        vote_count: row.get("vote_count"),
        submitted_at: row.get("submitted_at"),
        answered: row.get("answered"),
        is_voice: row.get("is_voice"),
    }
}

const QUESTION_COLUMNS: &str = "question_id, document_id, user_id, question_body, document_page, \
     vote_count, submitted_at, answered, is_voice";

#[async_trait]
impl Storage for PgStorage {
    #[instrument(skip_all, name = "moderator.storage.create_user")]
    async fn create_user(&self, user_id: &str, user_name: &str) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = sqlx::query("INSERT INTO users (user_id, user_name) VALUES ($1, $2)")
            .bind(user_id)
            .bind(user_name)
            .execute(&self.pool)
            .await;
        finish("create_user", start, result)?;
        Ok(())
    }

    #[instrument(skip_all, name = "moderator.storage.user_name")]
    async fn user_name(&self, user_id: &str) -> Result<String, StorageError> {
        let start = Instant::now();
        let result = sqlx::query("SELECT user_name FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await;
        let row = finish("user_name", start, result)?
            .ok_or_else(|| not_found(format!("user {user_id}")))?;
        Ok(row.get("user_name"))
    }

    #[instrument(skip_all, name = "moderator.storage.create_meeting")]
    async fn create_meeting(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        presenter_ids: &[String],
    ) -> Result<CreatedMeeting, StorageError> {
        let start = Instant::now();
        let result = self
            .insert_meeting(name, start_time, presenter_ids)
            .await;
        finish("create_meeting", start, result)
    }

    #[instrument(skip_all, name = "moderator.storage.meeting")]
    async fn meeting(&self, meeting_id: MeetingId) -> Result<Meeting, StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            "SELECT meeting_id, meeting_name, start_time, started, ended FROM meetings WHERE meeting_id = $1",
        )
        .bind(meeting_id)
        .fetch_optional(&self.pool)
        .await;
        finish("meeting", start, result)?
            .as_ref()
            .map(map_row_to_meeting)
            .ok_or_else(|| not_found(format!("meeting {meeting_id}")))
    }

    #[instrument(skip_all, name = "moderator.storage.mark_meeting_started")]
    async fn mark_meeting_started(&self, meeting_id: MeetingId) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = sqlx::query("UPDATE meetings SET started = TRUE WHERE meeting_id = $1")
            .bind(meeting_id)
            .execute(&self.pool)
            .await;
        if finish("mark_meeting_started", start, result)?.rows_affected() == 0 {
            return Err(not_found(format!("meeting {meeting_id}")));
        }
        Ok(())
    }

    #[instrument(skip_all, name = "moderator.storage.mark_meeting_ended")]
    async fn mark_meeting_ended(&self, meeting_id: MeetingId) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = sqlx::query("UPDATE meetings SET ended = TRUE WHERE meeting_id = $1")
            .bind(meeting_id)
            .execute(&self.pool)
            .await;
        if finish("mark_meeting_ended", start, result)?.rows_affected() == 0 {
            return Err(not_found(format!("meeting {meeting_id}")));
        }
        Ok(())
    }

    #[instrument(skip_all, name = "moderator.storage.join_meeting")]
    async fn join_meeting(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<JoinedMeeting, StorageError> {
        let meeting = self.meeting(meeting_id).await?;

        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO participants (meeting_id, user_id, presenter_order, joining)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (meeting_id, user_id) DO UPDATE SET joining = TRUE
            "#,
        )
        .bind(meeting_id)
        .bind(user_id)
        .bind(ATTENDEE_ORDER)
        .execute(&self.pool)
        .await;
        finish("join_meeting", start, result)?;

        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT p.user_id, p.presenter_order, u.user_name, d.document_id
            FROM participants p
            JOIN users u ON u.user_id = p.user_id
            JOIN documents d ON d.meeting_id = p.meeting_id AND d.presenter_id = p.user_id
            WHERE p.meeting_id = $1 AND p.presenter_order >= 0
            ORDER BY p.presenter_order
            "#,
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await;
        let presenters = finish("list_presenters", start, result)?
            .iter()
            .map(|row| Presenter {
                user_id: row.get("user_id"),
                user_name: row.get("user_name"),
                document_id: row.get("document_id"),
                presenter_order: row.get("presenter_order"),
            })
            .collect();

        Ok(JoinedMeeting {
            meeting,
            presenters,
        })
    }

    #[instrument(skip_all, name = "moderator.storage.exit_meeting")]
    async fn exit_meeting(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.leave_meeting(meeting_id, user_id).await;
        match finish("exit_meeting", start, result)? {
            0 => Err(not_found(format!(
                "participant {user_id} in meeting {meeting_id}"
            ))),
            _ => Ok(()),
        }
    }

    #[instrument(skip_all, name = "moderator.storage.participant")]
    async fn participant(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<Participant, StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT meeting_id, user_id, presenter_order, speak_count, joining
            FROM participants
            WHERE meeting_id = $1 AND user_id = $2
            "#,
        )
        .bind(meeting_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await;
        finish("participant", start, result)?
            .as_ref()
            .map(map_row_to_participant)
            .ok_or_else(|| not_found(format!("participant {user_id} in meeting {meeting_id}")))
    }

    #[instrument(skip_all, name = "moderator.storage.participant_by_order")]
    async fn participant_by_order(
        &self,
        meeting_id: MeetingId,
        presenter_order: i32,
    ) -> Result<Option<Participant>, StorageError> {
        if presenter_order < 0 {
            return Ok(None);
        }
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT meeting_id, user_id, presenter_order, speak_count, joining
            FROM participants
            WHERE meeting_id = $1 AND presenter_order = $2
            "#,
        )
        .bind(meeting_id)
        .bind(presenter_order)
        .fetch_optional(&self.pool)
        .await;
        Ok(finish("participant_by_order", start, result)?
            .as_ref()
            .map(map_row_to_participant))
    }

    #[instrument(skip_all, name = "moderator.storage.joined_participants")]
    async fn joined_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT meeting_id, user_id, presenter_order, speak_count, joining
            FROM participants
            WHERE meeting_id = $1 AND joining
            ORDER BY user_id
            "#,
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await;
        Ok(finish("joined_participants", start, result)?
            .iter()
            .map(map_row_to_participant)
            .collect())
    }

    #[instrument(skip_all, name = "moderator.storage.increment_speak_count")]
    async fn increment_speak_count(
        &self,
        meeting_id: MeetingId,
        user_id: &str,
    ) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE participants SET speak_count = speak_count + 1
            WHERE meeting_id = $1 AND user_id = $2
            "#,
        )
        .bind(meeting_id)
        .bind(user_id)
        .execute(&self.pool)
        .await;
        if finish("increment_speak_count", start, result)?.rows_affected() == 0 {
            return Err(not_found(format!(
                "participant {user_id} in meeting {meeting_id}"
            )));
        }
        Ok(())
    }

    #[instrument(skip_all, name = "moderator.storage.document")]
    async fn document(&self, document_id: DocumentId) -> Result<Document, StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT document_id, meeting_id, presenter_id, document_url, script
            FROM documents
            WHERE document_id = $1
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await;
        finish("document", start, result)?
            .as_ref()
            .map(map_row_to_document)
            .ok_or_else(|| not_found(format!("document {document_id}")))
    }

    #[instrument(skip_all, name = "moderator.storage.presenter_document")]
    async fn presenter_document(
        &self,
        meeting_id: MeetingId,
        presenter_id: &str,
    ) -> Result<Document, StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT document_id, meeting_id, presenter_id, document_url, script
            FROM documents
            WHERE meeting_id = $1 AND presenter_id = $2
            "#,
        )
        .bind(meeting_id)
        .bind(presenter_id)
        .fetch_optional(&self.pool)
        .await;
        finish("presenter_document", start, result)?
            .as_ref()
            .map(map_row_to_document)
            .ok_or_else(|| {
                not_found(format!(
                    "document of {presenter_id} in meeting {meeting_id}"
                ))
            })
    }

    #[instrument(skip_all, name = "moderator.storage.update_document")]
    async fn update_document(
        &self,
        document_id: DocumentId,
        url: Option<String>,
        script: Option<String>,
    ) -> Result<Document, StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET document_url = COALESCE($2, document_url),
                script = COALESCE($3, script)
            WHERE document_id = $1
            RETURNING document_id, meeting_id, presenter_id, document_url, script
            "#,
        )
        .bind(document_id)
        .bind(url)
        .bind(script)
        .fetch_optional(&self.pool)
        .await;
        finish("update_document", start, result)?
            .as_ref()
            .map(map_row_to_document)
            .ok_or_else(|| not_found(format!("document {document_id}")))
    }

    #[instrument(skip_all, name = "moderator.storage.create_question")]
    async fn create_question(&self, question: NewQuestion) -> Result<Question, StorageError> {
        let start = Instant::now();
        let sql = format!(
            r#"
            INSERT INTO questions
                (document_id, user_id, question_body, document_page, submitted_at, is_voice, answered)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {QUESTION_COLUMNS}
            "#
        );
        let result = sqlx::query(&sql)
            .bind(question.document_id)
            .bind(&question.user_id)
            .bind(&question.body)
            .bind(question.page)
            .bind(question.submitted_at)
            .bind(question.is_voice)
            .bind(question.answered)
            .fetch_one(&self.pool)
            .await;
        let row = finish("create_question", start, result)?;
        Ok(map_row_to_question(&row))
    }

    #[instrument(skip_all, name = "moderator.storage.document_questions")]
    async fn document_questions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Question>, StorageError> {
        let start = Instant::now();
        let sql = format!(
            r#"
            SELECT {QUESTION_COLUMNS}
            FROM questions
            WHERE document_id = $1
            ORDER BY submitted_at, question_id
            "#
        );
        let result = sqlx::query(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await;
        Ok(finish("document_questions", start, result)?
            .iter()
            .map(map_row_to_question)
            .collect())
    }

    #[instrument(skip_all, name = "moderator.storage.pending_voice_question")]
    async fn pending_voice_question(
        &self,
        document_id: DocumentId,
        user_id: &str,
        page: i32,
    ) -> Result<Option<Question>, StorageError> {
        let start = Instant::now();
        let sql = format!(
            r#"
            SELECT {QUESTION_COLUMNS}
            FROM questions
            WHERE document_id = $1 AND user_id = $2 AND document_page = $3
              AND is_voice AND NOT answered
            "#
        );
        let result = sqlx::query(&sql)
            .bind(document_id)
            .bind(user_id)
            .bind(page)
            .fetch_optional(&self.pool)
            .await;
        Ok(finish("pending_voice_question", start, result)?
            .as_ref()
            .map(map_row_to_question))
    }

    #[instrument(skip_all, name = "moderator.storage.mark_question_answered")]
    async fn mark_question_answered(&self, question_id: QuestionId) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = sqlx::query("UPDATE questions SET answered = TRUE WHERE question_id = $1")
            .bind(question_id)
            .execute(&self.pool)
            .await;
        if finish("mark_question_answered", start, result)?.rows_affected() == 0 {
            return Err(not_found(format!("question {question_id}")));
        }
        Ok(())
    }

    #[instrument(skip_all, name = "moderator.storage.vote_question")]
    async fn vote_question(
        &self,
        question_id: QuestionId,
        delta: i32,
    ) -> Result<VoteTally, StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE questions q
            SET vote_count = q.vote_count + $2
            FROM documents d
            WHERE q.question_id = $1 AND d.document_id = q.document_id
            RETURNING d.meeting_id, q.question_id, q.vote_count
            "#,
        )
        .bind(question_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await;
        let row = finish("vote_question", start, result)?
            .ok_or_else(|| not_found(format!("question {question_id}")))?;
        Ok(VoteTally {
            meeting_id: row.get("meeting_id"),
            question_id: row.get("question_id"),
            vote_count: row.get("vote_count"),
        })
    }

    #[instrument(skip_all, name = "moderator.storage.delete_question")]
    async fn delete_question(&self, question_id: QuestionId) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = sqlx::query("DELETE FROM questions WHERE question_id = $1")
            .bind(question_id)
            .execute(&self.pool)
            .await;
        if finish("delete_question", start, result)?.rows_affected() == 0 {
            return Err(not_found(format!("question {question_id}")));
        }
        Ok(())
    }

    #[instrument(skip_all, name = "moderator.storage.document_reactions")]
    async fn document_reactions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Reaction>, StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT document_id, document_page, reaction_count, suggested
            FROM reactions
            WHERE document_id = $1
            ORDER BY document_page
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await;
        Ok(finish("document_reactions", start, result)?
            .iter()
            .map(|row| Reaction {
                document_id: row.get("document_id"),
                page: row.get("document_page"),
                count: row.get("reaction_count"),
                suggested: row.get("suggested"),
            })
            .collect())
    }

    #[instrument(skip_all, name = "moderator.storage.adjust_reaction")]
    async fn adjust_reaction(
        &self,
        document_id: DocumentId,
        page: i32,
        delta: i32,
    ) -> Result<i32, StorageError> {
        let start = Instant::now();
        let result = if delta > 0 {
            sqlx::query(
                r#"
                INSERT INTO reactions (document_id, document_page, reaction_count)
                VALUES ($1, $2, $3)
                ON CONFLICT (document_id, document_page)
                DO UPDATE SET reaction_count = reactions.reaction_count + EXCLUDED.reaction_count
                RETURNING reaction_count
                "#,
            )
            .bind(document_id)
            .bind(page)
            .bind(delta)
            .fetch_optional(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE reactions SET reaction_count = reaction_count + $3
                WHERE document_id = $1 AND document_page = $2
                RETURNING reaction_count
                "#,
            )
            .bind(document_id)
            .bind(page)
            .bind(delta)
            .fetch_optional(&self.pool)
            .await
        };
        Ok(finish("adjust_reaction", start, result)?
            .map(|row| row.get("reaction_count"))
            .unwrap_or(0))
    }

    #[instrument(skip_all, name = "moderator.storage.mark_reaction_suggested")]
    async fn mark_reaction_suggested(
        &self,
        document_id: DocumentId,
        page: i32,
    ) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE reactions SET suggested = TRUE
            WHERE document_id = $1 AND document_page = $2
            "#,
        )
        .bind(document_id)
        .bind(page)
        .execute(&self.pool)
        .await;
        if finish("mark_reaction_suggested", start, result)?.rows_affected() == 0 {
            return Err(not_found(format!(
                "reaction on page {page} of document {document_id}"
            )));
        }
        Ok(())
    }
}
