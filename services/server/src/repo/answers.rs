use chrono::{DateTime, Utc};
use quiz_core::UserAnswer;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Fields of an answer row as computed by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnswer {
    pub user_id: i64,
    pub quiz_id: i64,
    pub question_id: i64,
    pub selected_option: i32,
    pub is_correct: bool,
    pub response_time_ms: i64,
    pub score: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// A row for this (user, question) already existed; nothing changed.
    Duplicate,
}

fn answer_from_row(row: &PgRow) -> UserAnswer {
    UserAnswer {
        answer_id: row.get("answer_id"),
        user_id: row.get("user_id"),
        quiz_id: row.get("quiz_id"),
        question_id: row.get("question_id"),
        selected_option: row.get("selected_option"),
        is_correct: row.get("is_correct"),
        response_time_ms: row.get("response_time_ms"),
        score: row.get("score"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

/// At-most-once per (user, question): the unique index arbitrates racing
/// submissions, so the caller learns about duplicates atomically.
pub async fn save(pool: &PgPool, answer: &NewAnswer) -> Result<SaveOutcome, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO user_answers
             (user_id, quiz_id, question_id, selected_option, is_correct, response_time_ms, score)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (user_id, question_id) DO NOTHING",
    )
    .bind(answer.user_id)
    .bind(answer.quiz_id)
    .bind(answer.question_id)
    .bind(answer.selected_option)
    .bind(answer.is_correct)
    .bind(answer.response_time_ms)
    .bind(answer.score)
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        Ok(SaveOutcome::Inserted)
    } else {
        Ok(SaveOutcome::Duplicate)
    }
}

pub async fn get_quiz_answers(pool: &PgPool, quiz_id: i64) -> Result<Vec<UserAnswer>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT answer_id, user_id, quiz_id, question_id, selected_option, is_correct,
                response_time_ms, score, created_at
         FROM user_answers WHERE quiz_id = $1 ORDER BY answer_id",
    )
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(answer_from_row).collect())
}

pub async fn get_user_quiz_answers(
    pool: &PgPool,
    user_id: i64,
    quiz_id: i64,
) -> Result<Vec<UserAnswer>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT answer_id, user_id, quiz_id, question_id, selected_option, is_correct,
                response_time_ms, score, created_at
         FROM user_answers WHERE user_id = $1 AND quiz_id = $2 ORDER BY answer_id",
    )
    .bind(user_id)
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(answer_from_row).collect())
}
