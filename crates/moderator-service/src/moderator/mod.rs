//! Moderator engine.
//!
//! Drives each meeting through `Presenting -> AwaitingNextQuestion ->
//! Presenting -> ... -> Ended`, one `finishword` frame at a time.
//!
//! # Step
//!
//! 1. If the meeting's answered tally has reached the threshold, rotate to
//!    the presenter with the next `presenter_order` (or end the meeting) and
//!    reset the tally. Nothing else happens in that step, whatever the
//!    `finishType`.
//! 2. Otherwise the `finishType` must be `present` or `question`, and the
//!    next speaker is selected in strict priority order:
//!    1. oldest pending raised hand on the current document
//!    2. oldest pending written question on the current document
//!    3. reaction escalation
//!    4. fairness pick among eligible participants
//!
//!    Every selection increments the tally by one.
//!
//! Progress is kept per meeting behind its own async lock, held for the whole
//! step, so concurrent `finishword` frames for one meeting are serialized and
//! a reaction can be escalated only once. A storage failure aborts the step
//! with the tally and phase unchanged.
//!
//! Once a meeting ends, the end is recorded in storage and its progress is
//! dropped. A later `finishword` rebuilds progress, finds the recorded end
//! and is rejected.

pub mod selection;
pub mod texts;

use crate::errors::ModeratorError;
use crate::observability::metrics;
use crate::protocol::{FinishWordFrame, ModeratorMsg, FINISH_PRESENT, FINISH_QUESTION};
use crate::storage::{
    Document, MeetingId, NewQuestion, QuestionId, Storage, MODERATOR_USER_ID,
};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument};

/// Page used for questions synthesized by a fairness pick.
const FAIRNESS_QUESTION_PAGE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeratorPhase {
    Presenting { presenter_id: String },
    AwaitingNextQuestion { presenter_id: String },
    Ended,
}

/// Transient per-meeting state.
#[derive(Debug)]
struct MeetingProgress {
    /// Questions resolved since the last rotation.
    answered: u32,
    phase: ModeratorPhase,
    /// Excluded from escalation counts and fairness picks.
    last_questioner: Option<String>,
    /// The current presenter's document. A presenter has exactly one.
    document: Option<Document>,
    /// Storage has been checked for an earlier end of this meeting.
    verified: bool,
}

impl MeetingProgress {
    fn new(presenter_id: &str) -> Self {
        Self {
            answered: 0,
            phase: ModeratorPhase::Presenting {
                presenter_id: presenter_id.to_string(),
            },
            last_questioner: None,
            document: None,
            verified: false,
        }
    }
}

/// What a selection step decided.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    Voice {
        question_id: QuestionId,
        user_id: String,
        user_name: String,
    },
    Written {
        question_id: QuestionId,
        user_id: String,
        page: i32,
        body: String,
    },
    Escalation {
        question_id: QuestionId,
        page: i32,
    },
    Fairness {
        question_id: QuestionId,
        user_id: String,
        user_name: String,
    },
}

impl Selection {
    fn outcome(&self) -> &'static str {
        match self {
            Selection::Voice { .. } => "voice",
            Selection::Written { .. } => "written",
            Selection::Escalation { .. } => "escalation",
            Selection::Fairness { .. } => "fairness",
        }
    }
}

pub struct ModeratorEngine {
    storage: Arc<dyn Storage>,
    threshold: u32,
    meetings: Mutex<HashMap<MeetingId, Arc<tokio::sync::Mutex<MeetingProgress>>>>,
}

impl ModeratorEngine {
    /// `threshold` is the number of answered questions per presenter.
    pub fn new(storage: Arc<dyn Storage>, threshold: u32) -> Self {
        Self {
            storage,
            threshold,
            meetings: Mutex::new(HashMap::new()),
        }
    }

    fn progress(
        &self,
        meeting_id: MeetingId,
        presenter_id: &str,
    ) -> Arc<tokio::sync::Mutex<MeetingProgress>> {
        let mut meetings = self.meetings.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            meetings
                .entry(meeting_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(MeetingProgress::new(presenter_id)))),
        )
    }

    fn existing_progress(
        &self,
        meeting_id: MeetingId,
    ) -> Option<Arc<tokio::sync::Mutex<MeetingProgress>>> {
        self.meetings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&meeting_id)
            .cloned()
    }

    /// Drop the progress of a finished meeting, unless a newer entry has
    /// replaced it.
    fn forget(&self, meeting_id: MeetingId, entry: &Arc<tokio::sync::Mutex<MeetingProgress>>) {
        let mut meetings = self.meetings.lock().unwrap_or_else(PoisonError::into_inner);
        if meetings
            .get(&meeting_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            meetings.remove(&meeting_id);
        }
    }

    /// Current phase while the meeting is tracked. Ended meetings are not.
    pub async fn phase(&self, meeting_id: MeetingId) -> Option<ModeratorPhase> {
        let progress = self.existing_progress(meeting_id)?;
        let progress = progress.lock().await;
        Some(progress.phase.clone())
    }

    /// Questions answered since the last rotation.
    pub async fn answered_count(&self, meeting_id: MeetingId) -> u32 {
        match self.existing_progress(meeting_id) {
            Some(progress) => progress.lock().await.answered,
            None => 0,
        }
    }

    /// Run one moderator step for a `finishword` frame.
    #[instrument(
        skip_all,
        name = "moderator.engine.finish_word",
        fields(meeting_id = frame.meeting_id, finish_type = %frame.finish_type)
    )]
    pub async fn finish_word(&self, frame: &FinishWordFrame) -> Result<ModeratorMsg, ModeratorError> {
        let meeting_id = frame.meeting_id;
        let entry = self.progress(meeting_id, &frame.presenter_id);
        let mut progress = entry.lock().await;

        if !progress.verified {
            match self.storage.meeting(meeting_id).await {
                Ok(meeting) if meeting.ended => progress.phase = ModeratorPhase::Ended,
                Ok(_) => progress.verified = true,
                Err(e) => {
                    self.forget(meeting_id, &entry);
                    return Err(e.into());
                }
            }
        }

        if progress.phase == ModeratorPhase::Ended {
            self.forget(meeting_id, &entry);
            return Err(ModeratorError::MeetingEnded(meeting_id));
        }

        if progress.answered >= self.threshold {
            let message = self
                .rotate(&mut progress, meeting_id, &frame.presenter_id)
                .await?;
            if progress.phase == ModeratorPhase::Ended {
                self.forget(meeting_id, &entry);
            }
            return Ok(message);
        }

        let prefix = match frame.finish_type.as_str() {
            FINISH_PRESENT => texts::PRESENTATION_FINISHED,
            FINISH_QUESTION => texts::ANSWER_FINISHED,
            other => return Err(ModeratorError::UnexpectedFinishType(other.to_string())),
        };

        let mut last_questioner = progress.last_questioner.clone();
        if frame.finish_type == FINISH_QUESTION {
            if let Some(user_id) = frame.question_user_id.as_ref().filter(|id| !id.is_empty()) {
                last_questioner = Some(user_id.clone());
            }
        }

        let document = self
            .current_document(&mut progress, meeting_id, &frame.presenter_id)
            .await?;
        let selection = self
            .select(
                meeting_id,
                &document,
                &frame.presenter_id,
                last_questioner.as_deref(),
            )
            .await?;

        progress.answered += 1;
        progress.phase = ModeratorPhase::AwaitingNextQuestion {
            presenter_id: frame.presenter_id.clone(),
        };
        progress.last_questioner = match &selection {
            Selection::Voice { user_id, .. } | Selection::Fairness { user_id, .. } => {
                Some(user_id.clone())
            }
            Selection::Written { user_id, .. } if user_id != MODERATOR_USER_ID => {
                Some(user_id.clone())
            }
            _ => last_questioner,
        };

        metrics::record_moderator_outcome(selection.outcome());
        debug!(
            target: "moderator.engine",
            meeting_id,
            outcome = selection.outcome(),
            answered = progress.answered,
            "Next question selected"
        );

        Ok(announce_selection(meeting_id, prefix, selection))
    }

    /// Hand over to the next presenter, or end the meeting after the last.
    async fn rotate(
        &self,
        progress: &mut MeetingProgress,
        meeting_id: MeetingId,
        presenter_id: &str,
    ) -> Result<ModeratorMsg, ModeratorError> {
        let current = self.storage.participant(meeting_id, presenter_id).await?;
        if !current.is_presenter() {
            return Err(ModeratorError::NotFound(format!(
                "presenter {presenter_id} in meeting {meeting_id}"
            )));
        }
        let next = self
            .storage
            .participant_by_order(meeting_id, current.presenter_order + 1)
            .await?;

        let message = match next {
            Some(next) => {
                let presenter_name = self.storage.user_name(presenter_id).await?;
                let next_name = self.storage.user_name(&next.user_id).await?;

                info!(
                    target: "moderator.engine",
                    meeting_id,
                    from = %presenter_id,
                    to = %next.user_id,
                    present_order = next.presenter_order,
                    "Presenter rotated"
                );
                metrics::record_moderator_outcome("rotation");

                progress.phase = ModeratorPhase::Presenting {
                    presenter_id: next.user_id.clone(),
                };
                ModeratorMsg {
                    meeting_id,
                    moderator_msg_body: texts::rotation(&presenter_name, &next_name),
                    is_start_presen: true,
                    question_id: -1,
                    question_user_id: String::new(),
                    present_order: next.presenter_order,
                }
            }
            None => {
                self.storage.mark_meeting_ended(meeting_id).await?;
                info!(target: "moderator.engine", meeting_id, "Meeting ended");
                metrics::record_moderator_outcome("ended");

                progress.phase = ModeratorPhase::Ended;
                ModeratorMsg {
                    meeting_id,
                    moderator_msg_body: texts::MEETING_ENDED.to_string(),
                    is_start_presen: false,
                    question_id: -1,
                    question_user_id: String::new(),
                    present_order: -1,
                }
            }
        };

        progress.answered = 0;
        progress.last_questioner = None;
        progress.document = None;
        Ok(message)
    }

    async fn current_document(
        &self,
        progress: &mut MeetingProgress,
        meeting_id: MeetingId,
        presenter_id: &str,
    ) -> Result<Document, ModeratorError> {
        if let Some(document) = &progress.document {
            if document.presenter_id == presenter_id {
                return Ok(document.clone());
            }
        }

        let document = self
            .storage
            .presenter_document(meeting_id, presenter_id)
            .await?;
        progress.document = Some(document.clone());
        Ok(document)
    }

    async fn select(
        &self,
        meeting_id: MeetingId,
        document: &Document,
        presenter_id: &str,
        last_questioner: Option<&str>,
    ) -> Result<Selection, ModeratorError> {
        let questions = self.storage.document_questions(document.id).await?;

        // Speak counts go first: if the asker cannot be credited, the
        // question stays pending.
        if let Some(question) = selection::oldest_pending(&questions, true) {
            self.storage
                .increment_speak_count(meeting_id, &question.user_id)
                .await?;
            self.storage.mark_question_answered(question.id).await?;
            let user_name = self.storage.user_name(&question.user_id).await?;
            return Ok(Selection::Voice {
                question_id: question.id,
                user_id: question.user_id.clone(),
                user_name,
            });
        }

        if let Some(question) = selection::oldest_pending(&questions, false) {
            if question.user_id != MODERATOR_USER_ID {
                self.storage
                    .increment_speak_count(meeting_id, &question.user_id)
                    .await?;
            }
            self.storage.mark_question_answered(question.id).await?;
            return Ok(Selection::Written {
                question_id: question.id,
                user_id: question.user_id.clone(),
                page: question.page,
                body: question.body.clone(),
            });
        }

        let joined = self.storage.joined_participants(meeting_id).await?;
        let eligible = selection::eligible_participants(&joined, presenter_id, last_questioner);

        let reactions = self.storage.document_reactions(document.id).await?;
        if let Some(reaction) = selection::escalation_candidate(&reactions, eligible.len()) {
            self.storage
                .mark_reaction_suggested(document.id, reaction.page)
                .await?;
            let question = self
                .storage
                .create_question(NewQuestion {
                    document_id: document.id,
                    user_id: MODERATOR_USER_ID.to_string(),
                    body: String::new(),
                    page: reaction.page,
                    submitted_at: Utc::now(),
                    is_voice: false,
                    answered: true,
                })
                .await?;
            return Ok(Selection::Escalation {
                question_id: question.id,
                page: reaction.page,
            });
        }

        let Some(pick) = selection::fairness_pick(&eligible) else {
            return Err(ModeratorError::NoCandidates(meeting_id));
        };
        let question = self
            .storage
            .create_question(NewQuestion {
                document_id: document.id,
                user_id: pick.user_id.clone(),
                body: String::new(),
                page: FAIRNESS_QUESTION_PAGE,
                submitted_at: Utc::now(),
                is_voice: true,
                answered: true,
            })
            .await?;
        self.storage
            .increment_speak_count(meeting_id, &pick.user_id)
            .await?;
        let user_name = self.storage.user_name(&pick.user_id).await?;

        Ok(Selection::Fairness {
            question_id: question.id,
            user_id: pick.user_id.clone(),
            user_name,
        })
    }

    /// Build the "meeting is starting" announcement for the presenter with
    /// order 0, and put the meeting in the `Presenting` phase.
    #[instrument(skip_all, name = "moderator.engine.start", fields(meeting_id = meeting_id))]
    pub async fn start_announcement(
        &self,
        meeting_id: MeetingId,
    ) -> Result<ModeratorMsg, ModeratorError> {
        let first = self
            .storage
            .participant_by_order(meeting_id, 0)
            .await?
            .ok_or_else(|| ModeratorError::NotFound(format!("first presenter of meeting {meeting_id}")))?;
        let first_name = self.storage.user_name(&first.user_id).await?;

        let progress = self.progress(meeting_id, &first.user_id);
        let mut progress = progress.lock().await;
        if progress.phase != ModeratorPhase::Ended {
            progress.phase = ModeratorPhase::Presenting {
                presenter_id: first.user_id.clone(),
            };
        }

        Ok(ModeratorMsg {
            meeting_id,
            moderator_msg_body: texts::meeting_start(&first_name),
            is_start_presen: true,
            question_id: -1,
            question_user_id: String::new(),
            present_order: first.presenter_order,
        })
    }
}

fn announce_selection(meeting_id: MeetingId, prefix: &str, selection: Selection) -> ModeratorMsg {
    let (body, question_id, question_user_id) = match selection {
        Selection::Voice {
            question_id,
            user_id,
            user_name,
        }
        | Selection::Fairness {
            question_id,
            user_id,
            user_name,
        } => (texts::next_questioner(&user_name), question_id, user_id),
        Selection::Written {
            question_id,
            page,
            body,
            ..
        } => (texts::written_question(page, &body), question_id, String::new()),
        Selection::Escalation { question_id, page } => {
            (texts::escalation(page), question_id, String::new())
        }
    };

    ModeratorMsg {
        meeting_id,
        moderator_msg_body: format!("{prefix}{body}"),
        is_start_presen: false,
        question_id,
        question_user_id,
        present_order: -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_selection_names_the_speaker() {
        let msg = announce_selection(
            3,
            texts::ANSWER_FINISHED,
            Selection::Voice {
                question_id: 11,
                user_id: "bob".to_string(),
                user_name: "Bob".to_string(),
            },
        );

        assert_eq!(
            msg.moderator_msg_body,
            "Thank you for your answer.\nNext, Bob, please go ahead with your question.\n"
        );
        assert_eq!(msg.question_id, 11);
        assert_eq!(msg.question_user_id, "bob");
        assert_eq!(msg.present_order, -1);
        assert!(!msg.is_start_presen);
    }

    #[test]
    fn test_written_selection_is_anonymous() {
        let msg = announce_selection(
            3,
            texts::PRESENTATION_FINISHED,
            Selection::Written {
                question_id: 4,
                user_id: "carol".to_string(),
                page: 7,
                body: "Why a hash map?".to_string(),
            },
        );

        assert_eq!(
            msg.moderator_msg_body,
            "Thank you for your presentation.\nHere is an anonymous question about page 7: Why a hash map?\n"
        );
        assert!(msg.question_user_id.is_empty());
    }

    #[test]
    fn test_escalation_selection_mentions_page() {
        let msg = announce_selection(
            3,
            texts::ANSWER_FINISHED,
            Selection::Escalation {
                question_id: 9,
                page: 2,
            },
        );

        assert!(msg.moderator_msg_body.contains("puzzled by page 2"));
        assert_eq!(msg.question_id, 9);
        assert!(msg.question_user_id.is_empty());
    }
}
