use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a quiz.
///
/// Legal transitions: `Scheduled -> InProgress -> Completed` and
/// `Scheduled -> Cancelled`.  Questions may only be attached while
/// `Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl QuizStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuizStatus::Scheduled => "scheduled",
            QuizStatus::InProgress => "in_progress",
            QuizStatus::Completed => "completed",
            QuizStatus::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(QuizStatus::Scheduled),
            "in_progress" => Some(QuizStatus::InProgress),
            "completed" => Some(QuizStatus::Completed),
            "cancelled" => Some(QuizStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for QuizStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_id: i64,
    pub title: String,
    pub description: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: QuizStatus,
    /// Declared count; equals the number of attached questions at start.
    pub question_count: i32,
}

/// A single multiple-choice question.
///
/// Option identity is 1-based everywhere: `correct_option` indexes into
/// `options` as `options[correct_option - 1]`, and clients submit the same
/// 1-based ids they were shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: i64,
    /// None for questions in the reusable auto-fill pool.
    pub quiz_id: Option<i64>,
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: i32,
    /// Answer window in seconds (5-60).
    pub time_limit_sec: i32,
    /// Points awarded for an instant correct answer (1-100).
    pub point_value: i32,
}

impl Question {
    /// Checks the structural invariants.  Returns the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.options.len() < 2 || self.options.len() > 5 {
            return Err(format!("question must have 2-5 options, has {}", self.options.len()));
        }
        if self.options.iter().any(|o| o.trim().is_empty()) {
            return Err("options must be non-empty".to_owned());
        }
        let max = i32::try_from(self.options.len()).unwrap_or(i32::MAX);
        if self.correct_option < 1 || self.correct_option > max {
            return Err(format!("correct_option {} out of range 1-{max}", self.correct_option));
        }
        if !(5..=60).contains(&self.time_limit_sec) {
            return Err(format!("time_limit {}s out of range 5-60", self.time_limit_sec));
        }
        if !(1..=100).contains(&self.point_value) {
            return Err(format!("point_value {} out of range 1-100", self.point_value));
        }
        Ok(())
    }

    /// Answer window in milliseconds.
    #[must_use]
    pub fn time_limit_ms(&self) -> i64 {
        i64::from(self.time_limit_sec) * 1000
    }
}

/// The single authoritative record of a user's answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnswer {
    pub answer_id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub question_id: i64,
    pub selected_option: i32,
    pub is_correct: bool,
    pub response_time_ms: i64,
    pub score: i32,
    pub created_at: DateTime<Utc>,
}

/// A user's final standing in a completed quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResult {
    pub result_id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub score: i64,
    pub correct_answers: i32,
    pub total_questions: i32,
    /// 1-based; equal (score, correct_answers) tuples share a rank.
    pub rank: i32,
    pub is_winner: bool,
    pub prize_fund: i64,
    pub is_eliminated: bool,
    pub completed_at: DateTime<Utc>,
}
