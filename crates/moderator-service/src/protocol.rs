//! Realtime envelope schema.
//!
//! Every frame is a UTF-8 JSON object with a `messageType` discriminator.
//! Decoding checks the discriminator first: unknown types are ignored, known
//! types must then decode into their typed variant or the frame is rejected.
//! Field names are camelCase on the wire.

use crate::errors::ModeratorError;
use crate::storage::{DocumentId, MeetingId, QuestionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `finishType` of a finished presentation.
pub const FINISH_PRESENT: &str = "present";

/// `finishType` of a finished answer.
pub const FINISH_QUESTION: &str = "question";

/// Inbound types handled by the dispatcher.
pub const INBOUND_TYPES: [&str; 6] = [
    "message",
    "question",
    "question_vote",
    "handsup",
    "reaction",
    "finishword",
];

#[derive(Debug, Deserialize)]
struct Discriminator {
    #[serde(rename = "messageType")]
    message_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "messageType")]
pub enum InboundEnvelope {
    #[serde(rename = "message")]
    Message(ChatFrame),
    #[serde(rename = "question")]
    Question(QuestionFrame),
    #[serde(rename = "question_vote")]
    QuestionVote(QuestionVoteFrame),
    #[serde(rename = "handsup")]
    HandsUp(HandsUpFrame),
    #[serde(rename = "reaction")]
    Reaction(ReactionFrame),
    #[serde(rename = "finishword")]
    FinishWord(FinishWordFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatFrame {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionFrame {
    pub user_id: String,
    pub meeting_id: MeetingId,
    pub question_body: String,
    pub document_id: DocumentId,
    pub document_page: i32,
    /// `YYYY/MM/DD hh:mm:ss` in the meeting's local time.
    pub question_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionVoteFrame {
    pub question_id: QuestionId,
    pub is_vote: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandsUpFrame {
    pub user_id: String,
    pub document_id: DocumentId,
    pub document_page: i32,
    pub is_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionFrame {
    pub document_id: DocumentId,
    pub document_page: i32,
    pub is_reaction: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishWordFrame {
    pub meeting_id: MeetingId,
    pub presenter_id: String,
    /// Validated by the moderator, after the rotation check.
    pub finish_type: String,
    #[serde(default)]
    pub question_user_id: Option<String>,
}

impl InboundEnvelope {
    /// Decode a text frame.
    ///
    /// Returns `Ok(None)` for a well-formed object whose `messageType` is not
    /// handled, and [`ModeratorError::MalformedFrame`] for anything that is
    /// not JSON, lacks the discriminator, or lacks a required field.
    pub fn decode(text: &str) -> Result<Option<Self>, ModeratorError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ModeratorError::MalformedFrame(format!("invalid JSON: {e}")))?;

        let discriminator = Discriminator::deserialize(&value)
            .map_err(|e| ModeratorError::MalformedFrame(format!("messageType: {e}")))?;

        if !INBOUND_TYPES.contains(&discriminator.message_type.as_str()) {
            return Ok(None);
        }

        Self::deserialize(value).map(Some).map_err(|e| {
            ModeratorError::MalformedFrame(format!("{}: {e}", discriminator.message_type))
        })
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            InboundEnvelope::Message(_) => "message",
            InboundEnvelope::Question(_) => "question",
            InboundEnvelope::QuestionVote(_) => "question_vote",
            InboundEnvelope::HandsUp(_) => "handsup",
            InboundEnvelope::Reaction(_) => "reaction",
            InboundEnvelope::FinishWord(_) => "finishword",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "messageType")]
pub enum OutboundEnvelope {
    #[serde(rename = "message")]
    Message(ChatMessage),
    #[serde(rename = "question")]
    Question(QuestionResult),
    #[serde(rename = "question_vote")]
    QuestionVote(QuestionVoteResult),
    #[serde(rename = "handsup")]
    HandsUp(HandsUpResult),
    #[serde(rename = "reaction")]
    Reaction(ReactionResult),
    #[serde(rename = "moderator_msg")]
    ModeratorMsg(ModeratorMsg),
    #[serde(rename = "document_update")]
    DocumentUpdate(DocumentUpdateResult),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: QuestionId,
    pub meeting_id: MeetingId,
    pub question_body: String,
    pub document_id: DocumentId,
    pub document_page: i32,
    /// Echoed as received.
    pub question_time: String,
    pub presenter_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionVoteResult {
    pub meeting_id: MeetingId,
    pub question_id: QuestionId,
    pub vote_num: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandsUpResult {
    pub meeting_id: MeetingId,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionResult {
    pub meeting_id: MeetingId,
    pub document_id: DocumentId,
    pub document_page: i32,
    pub reaction_num: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratorMsg {
    pub meeting_id: MeetingId,
    pub moderator_msg_body: String,
    pub is_start_presen: bool,
    /// -1 when no question is involved.
    pub question_id: QuestionId,
    /// Empty unless a participant is asked to speak.
    pub question_user_id: String,
    /// -1 unless a presentation starts.
    pub present_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdateResult {
    pub meeting_id: MeetingId,
    pub document_id: DocumentId,
}

impl OutboundEnvelope {
    /// Serialize into the payload handed to the hub.
    pub fn encode(&self) -> Result<Arc<str>, ModeratorError> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(|e| ModeratorError::Internal(format!("encode failed: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_decode_finishword_with_optional_field() {
        let frame = r#"{"messageType":"finishword","meetingId":7,"presenterId":"alice","finishType":"question","questionUserId":"bob"}"#;

        let envelope = InboundEnvelope::decode(frame).unwrap().unwrap();
        assert_eq!(
            envelope,
            InboundEnvelope::FinishWord(FinishWordFrame {
                meeting_id: 7,
                presenter_id: "alice".to_string(),
                finish_type: "question".to_string(),
                question_user_id: Some("bob".to_string()),
            })
        );

        let frame = r#"{"messageType":"finishword","meetingId":7,"presenterId":"alice","finishType":"present"}"#;
        let envelope = InboundEnvelope::decode(frame).unwrap().unwrap();
        assert!(matches!(
            envelope,
            InboundEnvelope::FinishWord(FinishWordFrame {
                question_user_id: None,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let result = InboundEnvelope::decode(r#"{"messageType":"typing","userId":"a"}"#);
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let result = InboundEnvelope::decode("{not json");
        assert!(matches!(result, Err(ModeratorError::MalformedFrame(_))));
    }

    #[test]
    fn test_missing_discriminator_is_malformed() {
        let result = InboundEnvelope::decode(r#"{"message":"hi"}"#);
        assert!(matches!(result, Err(ModeratorError::MalformedFrame(_))));

        let result = InboundEnvelope::decode(r#"{"messageType":5}"#);
        assert!(matches!(result, Err(ModeratorError::MalformedFrame(_))));
    }

    #[test]
    fn test_mistyped_field_is_malformed() {
        // isVote must be a boolean
        let result =
            InboundEnvelope::decode(r#"{"messageType":"question_vote","questionId":3,"isVote":1}"#);
        assert!(matches!(result, Err(ModeratorError::MalformedFrame(msg)) if msg.starts_with("question_vote")));

        // documentPage missing
        let result = InboundEnvelope::decode(
            r#"{"messageType":"reaction","documentId":3,"isReaction":true}"#,
        );
        assert!(matches!(result, Err(ModeratorError::MalformedFrame(_))));
    }

    #[test]
    fn test_moderator_msg_wire_shape() {
        let payload = OutboundEnvelope::ModeratorMsg(ModeratorMsg {
            meeting_id: 4,
            moderator_msg_body: "Thank you for your answer.\n".to_string(),
            is_start_presen: false,
            question_id: 12,
            question_user_id: "carol".to_string(),
            present_order: -1,
        })
        .encode()
        .unwrap();

        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "messageType": "moderator_msg",
                "meetingId": 4,
                "moderatorMsgBody": "Thank you for your answer.\n",
                "isStartPresen": false,
                "questionId": 12,
                "questionUserId": "carol",
                "presentOrder": -1
            })
        );
    }

    #[test]
    fn test_result_envelopes_carry_trigger_type() {
        let payload = OutboundEnvelope::HandsUp(HandsUpResult {
            meeting_id: 2,
            user_id: "dave".to_string(),
        })
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["messageType"], "handsup");
        assert_eq!(value["userId"], "dave");

        let payload = OutboundEnvelope::DocumentUpdate(DocumentUpdateResult {
            meeting_id: 2,
            document_id: 9,
        })
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["messageType"], "document_update");
        assert_eq!(value["documentId"], 9);
    }
}
