//! Inbound frame routing.
//!
//! Decodes one text frame, runs the matching handler and returns the
//! envelope to broadcast. Every error means the frame is dropped: nothing is
//! sent back and the connection stays open.

use crate::errors::ModeratorError;
use crate::moderator::ModeratorEngine;
use crate::observability::metrics;
use crate::protocol::{
    ChatMessage, HandsUpFrame, HandsUpResult, InboundEnvelope, OutboundEnvelope, QuestionFrame,
    QuestionResult, QuestionVoteFrame, QuestionVoteResult, ReactionFrame, ReactionResult,
};
use crate::storage::{NewQuestion, Storage};

use chrono::{FixedOffset, Utc};
use common::timestamp;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct Dispatcher {
    storage: Arc<dyn Storage>,
    engine: Arc<ModeratorEngine>,
    /// Offset of client `questionTime` values.
    utc_offset: FixedOffset,
}

impl Dispatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        engine: Arc<ModeratorEngine>,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            storage,
            engine,
            utc_offset,
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Returns `Ok(None)` for frames of an unhandled `messageType`.
    #[instrument(skip_all, name = "moderator.dispatch")]
    pub async fn dispatch(&self, text: &str) -> Result<Option<OutboundEnvelope>, ModeratorError> {
        let envelope = match InboundEnvelope::decode(text) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                metrics::record_frame("unknown", "ignored");
                debug!(target: "moderator.dispatch", "Ignoring frame of unknown type");
                return Ok(None);
            }
            Err(e) => {
                metrics::record_frame("unknown", e.kind());
                debug!(target: "moderator.dispatch", error = %e, "Rejecting malformed frame");
                return Err(e);
            }
        };

        let message_type = envelope.message_type();
        match self.route(envelope).await {
            Ok(outbound) => {
                metrics::record_frame(message_type, "broadcast");
                Ok(Some(outbound))
            }
            Err(e) => {
                metrics::record_frame(message_type, e.kind());
                if e.status_code() >= 500 {
                    warn!(target: "moderator.dispatch", message_type, error = %e, "Frame failed");
                } else {
                    debug!(target: "moderator.dispatch", message_type, error = %e, "Frame dropped");
                }
                Err(e)
            }
        }
    }

    async fn route(&self, envelope: InboundEnvelope) -> Result<OutboundEnvelope, ModeratorError> {
        match envelope {
            InboundEnvelope::Message(frame) => Ok(OutboundEnvelope::Message(ChatMessage {
                message: frame.message,
            })),
            InboundEnvelope::Question(frame) => self.question(frame).await,
            InboundEnvelope::QuestionVote(frame) => self.question_vote(frame).await,
            InboundEnvelope::HandsUp(frame) => self.hands_up(frame).await,
            InboundEnvelope::Reaction(frame) => self.reaction(frame).await,
            InboundEnvelope::FinishWord(frame) => self
                .engine
                .finish_word(&frame)
                .await
                .map(OutboundEnvelope::ModeratorMsg),
        }
    }

    async fn question(&self, frame: QuestionFrame) -> Result<OutboundEnvelope, ModeratorError> {
        let submitted_at = timestamp::parse_local(&frame.question_time, self.utc_offset)
            .map_err(|e| ModeratorError::MalformedFrame(format!("questionTime: {e}")))?;

        let document = self.storage.document(frame.document_id).await?;
        self.storage
            .participant(document.meeting_id, &frame.user_id)
            .await?;
        let question = self
            .storage
            .create_question(NewQuestion {
                document_id: frame.document_id,
                user_id: frame.user_id,
                body: frame.question_body,
                page: frame.document_page,
                submitted_at,
                is_voice: false,
                answered: false,
            })
            .await?;

        Ok(OutboundEnvelope::Question(QuestionResult {
            question_id: question.id,
            meeting_id: frame.meeting_id,
            question_body: question.body,
            document_id: question.document_id,
            document_page: question.page,
            question_time: frame.question_time,
            presenter_id: document.presenter_id,
        }))
    }

    async fn question_vote(
        &self,
        frame: QuestionVoteFrame,
    ) -> Result<OutboundEnvelope, ModeratorError> {
        let delta = if frame.is_vote { 1 } else { -1 };
        let tally = self.storage.vote_question(frame.question_id, delta).await?;

        Ok(OutboundEnvelope::QuestionVote(QuestionVoteResult {
            meeting_id: tally.meeting_id,
            question_id: tally.question_id,
            vote_num: tally.vote_count,
        }))
    }

    async fn hands_up(&self, frame: HandsUpFrame) -> Result<OutboundEnvelope, ModeratorError> {
        let document = self.storage.document(frame.document_id).await?;
        self.storage
            .participant(document.meeting_id, &frame.user_id)
            .await?;
        let pending = self
            .storage
            .pending_voice_question(frame.document_id, &frame.user_id, frame.document_page)
            .await?;

        match (frame.is_up, pending) {
            (true, Some(_)) => {
                return Err(ModeratorError::Conflict(format!(
                    "{} already raised a hand on page {}",
                    frame.user_id, frame.document_page
                )));
            }
            (true, None) => {
                self.storage
                    .create_question(NewQuestion {
                        document_id: frame.document_id,
                        user_id: frame.user_id.clone(),
                        body: String::new(),
                        page: frame.document_page,
                        submitted_at: Utc::now(),
                        is_voice: true,
                        answered: false,
                    })
                    .await?;
            }
            (false, Some(question)) => {
                self.storage.delete_question(question.id).await?;
            }
            (false, None) => {
                return Err(ModeratorError::NotFound(format!(
                    "no raised hand of {} on page {}",
                    frame.user_id, frame.document_page
                )));
            }
        }

        Ok(OutboundEnvelope::HandsUp(HandsUpResult {
            meeting_id: document.meeting_id,
            user_id: frame.user_id,
        }))
    }

    async fn reaction(&self, frame: ReactionFrame) -> Result<OutboundEnvelope, ModeratorError> {
        let document = self.storage.document(frame.document_id).await?;
        let delta = if frame.is_reaction { 1 } else { -1 };
        let reaction_num = self
            .storage
            .adjust_reaction(frame.document_id, frame.document_page, delta)
            .await?;

        Ok(OutboundEnvelope::Reaction(ReactionResult {
            meeting_id: document.meeting_id,
            document_id: frame.document_id,
            document_page: frame.document_page,
            reaction_num,
        }))
    }
}
