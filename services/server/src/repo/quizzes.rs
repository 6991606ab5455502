use super::decode_error;
use chrono::{DateTime, Utc};
use quiz_core::{Question, Quiz, QuizStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

fn quiz_from_row(row: &PgRow) -> Result<Quiz, sqlx::Error> {
    let status_text: String = row.get("status");
    let status = QuizStatus::parse(&status_text)
        .ok_or_else(|| decode_error(format!("unknown quiz status {status_text:?}")))?;
    Ok(Quiz {
        quiz_id: row.get("quiz_id"),
        title: row.get("title"),
        description: row.get("description"),
        scheduled_time: row.get("scheduled_time"),
        status,
        question_count: row.get("question_count"),
    })
}

pub(crate) fn question_from_row(row: &PgRow) -> Question {
    Question {
        question_id: row.get("question_id"),
        quiz_id: row.get("quiz_id"),
        text: row.get("text"),
        options: row.get("options"),
        correct_option: row.get("correct_option"),
        time_limit_sec: row.get("time_limit_sec"),
        point_value: row.get("point_value"),
    }
}

pub async fn get(pool: &PgPool, quiz_id: i64) -> Result<Option<Quiz>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT quiz_id, title, description, scheduled_time, status, question_count
         FROM quizzes WHERE quiz_id = $1",
    )
    .bind(quiz_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(quiz_from_row).transpose()
}

pub async fn get_with_questions(
    pool: &PgPool,
    quiz_id: i64,
) -> Result<Option<(Quiz, Vec<Question>)>, sqlx::Error> {
    let Some(quiz) = get(pool, quiz_id).await? else {
        return Ok(None);
    };
    let rows = sqlx::query(
        "SELECT question_id, quiz_id, text, options, correct_option, time_limit_sec, point_value
         FROM questions WHERE quiz_id = $1 ORDER BY question_id",
    )
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;
    let questions = rows.iter().map(question_from_row).collect();
    Ok(Some((quiz, questions)))
}

/// Returns false if the quiz does not exist.
pub async fn update_status(
    pool: &PgPool,
    quiz_id: i64,
    status: QuizStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE quizzes SET status = $2, updated_at = now() WHERE quiz_id = $1")
        .bind(quiz_id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_scheduled_time(
    pool: &PgPool,
    quiz_id: i64,
    scheduled_time: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE quizzes SET scheduled_time = $2, updated_at = now() WHERE quiz_id = $1",
    )
    .bind(quiz_id)
    .bind(scheduled_time)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_question_count(
    pool: &PgPool,
    quiz_id: i64,
    question_count: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE quizzes SET question_count = $2, updated_at = now() WHERE quiz_id = $1")
        .bind(quiz_id)
        .bind(question_count)
        .execute(pool)
        .await?;
    Ok(())
}

/// Scheduled quizzes with a start time still ahead, soonest first.
pub async fn get_scheduled(pool: &PgPool) -> Result<Vec<Quiz>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT quiz_id, title, description, scheduled_time, status, question_count
         FROM quizzes WHERE status = 'scheduled' ORDER BY scheduled_time ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(quiz_from_row).collect()
}

pub async fn get_active(pool: &PgPool) -> Result<Option<Quiz>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT quiz_id, title, description, scheduled_time, status, question_count
         FROM quizzes WHERE status = 'in_progress' ORDER BY scheduled_time DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(quiz_from_row).transpose()
}

/// Startup recovery: a quiz interrupted mid-run cannot be resumed, so any
/// stale `in_progress` rows from an unclean shutdown become `cancelled`.
pub async fn cancel_stale_in_progress(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE quizzes SET status = 'cancelled', updated_at = now() WHERE status = 'in_progress'",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
