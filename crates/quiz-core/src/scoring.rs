//! Answer scoring.
//!
//! Points decay linearly with response time inside the answer window:
//! a correct answer at 0 ms earns the full point value, a correct answer at
//! exactly the time limit earns 0, and anything past the limit scores 0 and
//! is flagged as exceeded.  The curve is monotone non-increasing in
//! response time.

use crate::models::Question;

/// Everything the processor needs to persist and report for one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub time_limit_exceeded: bool,
    /// Response time past the elimination threshold (strictly greater).
    pub critically_slow: bool,
    pub points: i32,
    /// Normalized response time; never negative.
    pub response_ms: i64,
}

impl AnswerOutcome {
    /// Wrong answers and critically slow answers both eliminate.
    #[must_use]
    pub fn is_eliminating(&self) -> bool {
        !self.is_correct || self.critically_slow
    }
}

/// Scores one submission against the question.
///
/// `raw_response_ms` is the client timestamp minus the server-recorded
/// question start.  A negative value means the client's clock ran ahead of
/// the recorded start; it is treated as a time-limit violation rather than
/// a fast answer.
#[must_use]
pub fn evaluate_answer(
    question: &Question,
    selected_option: i32,
    raw_response_ms: i64,
    elimination_time_ms: i64,
) -> AnswerOutcome {
    let limit_ms = question.time_limit_ms();
    let response_ms = if raw_response_ms < 0 {
        limit_ms + 1
    } else {
        raw_response_ms
    };

    let is_correct = selected_option == question.correct_option;
    let time_limit_exceeded = response_ms > limit_ms;
    let critically_slow = response_ms > elimination_time_ms;

    let points = if is_correct && !time_limit_exceeded {
        decayed_points(question.point_value, response_ms, limit_ms)
    } else {
        0
    };

    AnswerOutcome {
        is_correct,
        time_limit_exceeded,
        critically_slow,
        points,
        response_ms,
    }
}

/// Integer linear decay over the answer window.
///
/// `point_value` at 0 ms, 0 at `limit_ms`, floor division in between.
fn decayed_points(point_value: i32, response_ms: i64, limit_ms: i64) -> i32 {
    debug_assert!(limit_ms > 0);
    debug_assert!((0..=limit_ms).contains(&response_ms));
    let scaled = i64::from(point_value) * (limit_ms - response_ms) / limit_ms;
    i32::try_from(scaled).unwrap_or(0)
}
