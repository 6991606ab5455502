use chrono::{DateTime, Utc};
use quiz_core::ranking::RankedStanding;
use quiz_core::QuizResult;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

fn result_from_row(row: &PgRow) -> QuizResult {
    QuizResult {
        result_id: row.get("result_id"),
        user_id: row.get("user_id"),
        quiz_id: row.get("quiz_id"),
        score: row.get("score"),
        correct_answers: row.get("correct_answers"),
        total_questions: row.get("total_questions"),
        rank: row.get("rank"),
        is_winner: row.get("is_winner"),
        prize_fund: row.get("prize_fund"),
        is_eliminated: row.get("is_eliminated"),
        completed_at: row.get::<DateTime<Utc>, _>("completed_at"),
    }
}

/// Persists the full leaderboard in one transaction: totals, ranks,
/// winner flags and prize shares land together or not at all.
pub async fn persist_rankings(
    pool: &PgPool,
    quiz_id: i64,
    total_questions: i32,
    rankings: &[RankedStanding],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for standing in rankings {
        sqlx::query(
            "INSERT INTO quiz_results
                 (user_id, quiz_id, score, correct_answers, total_questions,
                  rank, is_winner, prize_fund, is_eliminated, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
             ON CONFLICT (user_id, quiz_id) DO UPDATE SET
                 score = EXCLUDED.score,
                 correct_answers = EXCLUDED.correct_answers,
                 total_questions = EXCLUDED.total_questions,
                 rank = EXCLUDED.rank,
                 is_winner = EXCLUDED.is_winner,
                 prize_fund = EXCLUDED.prize_fund,
                 is_eliminated = EXCLUDED.is_eliminated,
                 completed_at = EXCLUDED.completed_at",
        )
        .bind(standing.user_id)
        .bind(quiz_id)
        .bind(standing.score)
        .bind(standing.correct_answers)
        .bind(total_questions)
        .bind(standing.rank)
        .bind(standing.is_winner)
        .bind(standing.prize_fund)
        .bind(standing.is_eliminated)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Results in leaderboard order.
pub async fn get_quiz_results(pool: &PgPool, quiz_id: i64) -> Result<Vec<QuizResult>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT result_id, user_id, quiz_id, score, correct_answers, total_questions,
                rank, is_winner, prize_fund, is_eliminated, completed_at
         FROM quiz_results WHERE quiz_id = $1 ORDER BY rank ASC, user_id ASC",
    )
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(result_from_row).collect())
}
