use crate::http::response::{bad_request, internal_error, not_found, precondition_failed};
use crate::repo;
use crate::scheduler::ScheduleError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ActiveQuizResponse {
    pub quiz_id: i64,
    pub title: String,
    pub question_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question_number: Option<i32>,
}

/// Snapshot of the quiz currently in progress on this instance.
pub async fn get_active_quiz(State(state): State<AppState>) -> impl IntoResponse {
    let Some(info) = state.active.snapshot() else {
        return not_found("no quiz is currently active");
    };
    let current_question_number = state.active.current_question().map(|c| c.number);
    Json(ActiveQuizResponse {
        quiz_id: info.quiz_id,
        title: info.title,
        question_count: info.question_count,
        current_question_number,
    })
    .into_response()
}

/// Final leaderboard for a completed quiz, in rank order.
pub async fn get_quiz_results(
    State(state): State<AppState>,
    Path(quiz_id): Path<i64>,
) -> impl IntoResponse {
    match repo::results::get_quiz_results(&state.pool, quiz_id).await {
        Ok(results) => Json(results).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_time: DateTime<Utc>,
}

fn schedule_error_response(err: ScheduleError) -> axum::response::Response {
    match err {
        ScheduleError::Validation(message) => bad_request(message),
        ScheduleError::Precondition(message) => precondition_failed(message),
        ScheduleError::NotFound(quiz_id) => not_found(format!("quiz {quiz_id} not found")),
        ScheduleError::Repo(err) => internal_error(err),
    }
}

/// Installs the timed start sequence for a quiz.
pub async fn schedule_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<i64>,
    Json(body): Json<ScheduleRequest>,
) -> impl IntoResponse {
    match state.scheduler.schedule(quiz_id, body.scheduled_time).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "quiz_id": quiz_id,
                "status": "scheduled",
                "scheduled_time": body.scheduled_time,
            })),
        )
            .into_response(),
        Err(err) => schedule_error_response(err),
    }
}

/// Cancels a quiz that has not started yet.
pub async fn cancel_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<i64>,
) -> impl IntoResponse {
    match state.scheduler.cancel(quiz_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "quiz_id": quiz_id,
                "status": "cancelled",
            })),
        )
            .into_response(),
        Err(err) => schedule_error_response(err),
    }
}
