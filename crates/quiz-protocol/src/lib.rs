// quiz-protocol: WebSocket wire types and serialization.
//
// Every message on the wire is a `{"type": "...", "data": {...}}` envelope.
// The enums below use serde's adjacent tagging so the envelope shape is
// enforced by construction on both directions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// One answer option as shown to clients.
///
/// `id` is the 1-based option index used everywhere: storage, scoring
/// comparison and client submissions all speak the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i32,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Client -> Server messages
// ---------------------------------------------------------------------------

/// Declares the user present in the waiting room for a quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReadyData {
    pub quiz_id: i64,
}

/// An answer submission for the current question.
///
/// `timestamp` is the client-reported answer instant in milliseconds since
/// epoch.  The server computes response time against its own recorded
/// question start; the client value is never trusted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnswerData {
    pub question_id: i64,
    pub selected_option: i32,
    pub timestamp: i64,
}

/// Keep-alive from the client; resets the server's idle timer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserHeartbeatData {}

/// All client -> server message kinds.
///
/// ```json
/// { "type": "user:answer", "data": { "question_id": 7, ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "user:ready")]
    UserReady(UserReadyData),
    #[serde(rename = "user:answer")]
    UserAnswer(UserAnswerData),
    #[serde(rename = "user:heartbeat")]
    UserHeartbeat(UserHeartbeatData),
}

// ---------------------------------------------------------------------------
// Server -> Client messages
// ---------------------------------------------------------------------------

/// Early announcement, broadcast well before the start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnnouncementData {
    pub quiz_id: i64,
    pub title: String,
    pub description: String,
    pub scheduled_time: DateTime<Utc>,
    pub question_count: i32,
    pub minutes_to_start: i64,
}

/// Waiting-room opening, broadcast shortly before the start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizWaitingRoomData {
    pub quiz_id: i64,
    pub title: String,
    pub description: String,
    pub scheduled_time: DateTime<Utc>,
    pub question_count: i32,
    pub starts_in_seconds: i64,
}

/// Per-second countdown tick during the final minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizCountdownData {
    pub quiz_id: i64,
    pub seconds_left: i64,
}

/// The quiz has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizStartData {
    pub quiz_id: i64,
    pub title: String,
    pub question_count: i32,
}

/// A question, broadcast to every participant at the same moment.
///
/// Never carries the correct option.  `start_time` is the server-recorded
/// question start in milliseconds since epoch and is authoritative for
/// response-time measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestionData {
    pub question_id: i64,
    pub quiz_id: i64,
    /// 1-based position of this question within the quiz.
    pub number: i32,
    pub text: String,
    pub options: Vec<QuestionOption>,
    /// Answer window in seconds.
    pub time_limit: i32,
    pub total_questions: i32,
    pub start_time: i64,
    pub server_timestamp: i64,
}

/// Remaining-time tick for the current question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizTimerData {
    pub question_id: i64,
    pub remaining_seconds: i32,
    pub server_timestamp: i64,
}

/// Reveal of the correct option after the answer window closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswerRevealData {
    pub question_id: i64,
    pub correct_option: i32,
}

/// Per-user scoring outcome, sent only to the answering user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswerResultData {
    pub question_id: i64,
    pub correct_option: i32,
    pub your_answer: i32,
    pub is_correct: bool,
    pub points_earned: i32,
    pub time_taken_ms: i64,
    pub is_eliminated: bool,
    pub time_limit_exceeded: bool,
}

/// Broadcast acknowledgement of a `user:ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizUserReadyData {
    pub user_id: i64,
    pub quiz_id: i64,
    pub status: String,
}

/// Direct notification that the user has been eliminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizEliminationData {
    pub message: String,
    pub reason: String,
}

/// Direct reminder sent when an eliminated user keeps submitting answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizEliminationReminderData {
    pub message: String,
    pub question_id: i64,
}

/// Broadcast when a scheduled quiz is cancelled before starting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizCancelledData {
    pub quiz_id: i64,
    pub message: String,
}

/// Broadcast once after the last reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizFinishData {
    pub quiz_id: i64,
    pub title: String,
    pub message: String,
    pub status: String,
    pub ended_at: DateTime<Utc>,
}

/// Broadcast once the final leaderboard has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResultsAvailableData {
    pub quiz_id: i64,
}

/// Server keep-alive, sent directly to each connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHeartbeatData {
    pub timestamp: i64,
}

fn is_false(v: &bool) -> bool {
    !v
}

/// Error sent to a client over the WebSocket.
///
/// `critical` is true only when the client should stop (for example a
/// rejected ticket); otherwise the client displays the message and keeps
/// its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// One of the frozen codes in [`error_codes`].
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub critical: bool,
}

/// All server -> client message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "quiz:announcement")]
    QuizAnnouncement(QuizAnnouncementData),
    #[serde(rename = "quiz:waiting_room")]
    QuizWaitingRoom(QuizWaitingRoomData),
    #[serde(rename = "quiz:countdown")]
    QuizCountdown(QuizCountdownData),
    #[serde(rename = "quiz:start")]
    QuizStart(QuizStartData),
    #[serde(rename = "quiz:question")]
    QuizQuestion(QuizQuestionData),
    #[serde(rename = "quiz:timer")]
    QuizTimer(QuizTimerData),
    #[serde(rename = "quiz:answer_reveal")]
    QuizAnswerReveal(QuizAnswerRevealData),
    #[serde(rename = "quiz:answer_result")]
    QuizAnswerResult(QuizAnswerResultData),
    #[serde(rename = "quiz:user_ready")]
    QuizUserReady(QuizUserReadyData),
    #[serde(rename = "quiz:elimination")]
    QuizElimination(QuizEliminationData),
    #[serde(rename = "quiz:elimination_reminder")]
    QuizEliminationReminder(QuizEliminationReminderData),
    #[serde(rename = "quiz:cancelled")]
    QuizCancelled(QuizCancelledData),
    #[serde(rename = "quiz:finish")]
    QuizFinish(QuizFinishData),
    #[serde(rename = "quiz:results_available")]
    QuizResultsAvailable(QuizResultsAvailableData),
    #[serde(rename = "server:heartbeat")]
    ServerHeartbeat(ServerHeartbeatData),
    #[serde(rename = "error")]
    Error(ErrorData),
}

/// Frozen error codes.
pub mod error_codes {
    pub const NO_ACTIVE_QUIZ: &str = "NO_ACTIVE_QUIZ";
    pub const NOT_CURRENT_QUESTION: &str = "NOT_CURRENT_QUESTION";
    pub const ALREADY_ELIMINATED: &str = "ALREADY_ELIMINATED";
    pub const START_TIME_MISSING: &str = "START_TIME_MISSING";
    pub const ALREADY_ANSWERED: &str = "ALREADY_ANSWERED";
    pub const INVALID_TICKET: &str = "INVALID_TICKET";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const PRECONDITION_FAILED: &str = "PRECONDITION_FAILED";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

// ---------------------------------------------------------------------------
// HTTP API response types (frozen schema definitions)
// ---------------------------------------------------------------------------

/// Frozen HTTP error envelope used by all non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn client_answer_round_trips_through_the_envelope() {
        let json = r#"{"type":"user:answer","data":{"question_id":7,"selected_option":2,"timestamp":1700000000123}}"#;
        let msg: ClientMessage = serde_json::from_str(json).expect("answer should parse");
        assert_eq!(
            msg,
            ClientMessage::UserAnswer(UserAnswerData {
                question_id: 7,
                selected_option: 2,
                timestamp: 1_700_000_000_123,
            })
        );
        let back = serde_json::to_string(&msg).expect("answer should serialize");
        assert_eq!(back, json);
    }

    #[test]
    fn heartbeat_accepts_empty_data_object() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"user:heartbeat","data":{}}"#).expect("should parse");
        assert_eq!(msg, ClientMessage::UserHeartbeat(UserHeartbeatData {}));
    }

    #[test]
    fn question_payload_uses_type_data_envelope_and_hides_nothing_extra() {
        let msg = ServerMessage::QuizQuestion(QuizQuestionData {
            question_id: 3,
            quiz_id: 1,
            number: 2,
            text: "Which planet is largest?".to_owned(),
            options: vec![
                QuestionOption {
                    id: 1,
                    text: "Mars".to_owned(),
                },
                QuestionOption {
                    id: 2,
                    text: "Jupiter".to_owned(),
                },
            ],
            time_limit: 10,
            total_questions: 5,
            start_time: 1_700_000_000_000,
            server_timestamp: 1_700_000_000_001,
        });
        let value = serde_json::to_value(&msg).expect("should serialize");
        assert_eq!(value["type"], "quiz:question");
        assert_eq!(value["data"]["options"][1]["id"], 2);
        assert!(
            value["data"].get("correct_option").is_none(),
            "question payload must never leak the correct option"
        );
    }

    #[test]
    fn error_omits_critical_when_false_and_keeps_it_when_true() {
        let soft = ServerMessage::Error(ErrorData {
            code: error_codes::ALREADY_ANSWERED.to_owned(),
            message: "already answered".to_owned(),
            critical: false,
        });
        let value = serde_json::to_value(&soft).expect("should serialize");
        assert!(value["data"].get("critical").is_none());

        let hard = ServerMessage::Error(ErrorData {
            code: error_codes::INVALID_TICKET.to_owned(),
            message: "bad ticket".to_owned(),
            critical: true,
        });
        let value = serde_json::to_value(&hard).expect("should serialize");
        assert_eq!(value["data"]["critical"], true);
    }

    #[test]
    fn announcement_scheduled_time_serializes_as_rfc3339() {
        let msg = ServerMessage::QuizAnnouncement(QuizAnnouncementData {
            quiz_id: 1,
            title: "Evening quiz".to_owned(),
            description: String::new(),
            scheduled_time: Utc.with_ymd_and_hms(2026, 3, 1, 19, 0, 0).unwrap(),
            question_count: 10,
            minutes_to_start: 30,
        });
        let value = serde_json::to_value(&msg).expect("should serialize");
        let text = value["data"]["scheduled_time"]
            .as_str()
            .expect("scheduled_time should be a string");
        assert!(text.starts_with("2026-03-01T19:00:00"));
    }

    #[test]
    fn unknown_client_type_is_rejected() {
        let parsed = serde_json::from_str::<ClientMessage>(
            r#"{"type":"user:cheat","data":{"question_id":1}}"#,
        );
        assert!(parsed.is_err());
    }
}
