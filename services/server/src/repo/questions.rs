use super::quizzes::question_from_row;
use quiz_core::Question;
use sqlx::{PgPool, Row};

#[derive(Debug, thiserror::Error)]
pub enum CreateBatchError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Repo(#[from] sqlx::Error),
}

pub async fn get_by_quiz(pool: &PgPool, quiz_id: i64) -> Result<Vec<Question>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT question_id, quiz_id, text, options, correct_option, time_limit_sec, point_value
         FROM questions WHERE quiz_id = $1 ORDER BY question_id",
    )
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(question_from_row).collect())
}

pub async fn count_for_quiz(pool: &PgPool, quiz_id: i64) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM questions WHERE quiz_id = $1")
        .bind(quiz_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

/// Random sample from the reusable pool (`quiz_id IS NULL`), skipping
/// texts already attached to the target quiz.
pub async fn get_random_pool_questions(
    pool: &PgPool,
    n: i64,
    exclude_quiz_id: i64,
) -> Result<Vec<Question>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT question_id, quiz_id, text, options, correct_option, time_limit_sec, point_value
         FROM questions p
         WHERE p.quiz_id IS NULL
           AND NOT EXISTS (
               SELECT 1 FROM questions q WHERE q.quiz_id = $2 AND q.text = p.text
           )
         ORDER BY random()
         LIMIT $1",
    )
    .bind(n)
    .bind(exclude_quiz_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(question_from_row).collect())
}

/// Attaches copies of the given questions to the quiz in one transaction.
/// Every question must pass the domain invariants; one bad row rejects
/// the whole batch before anything is written. Returns the number of
/// rows inserted.
pub async fn create_batch(
    pool: &PgPool,
    quiz_id: i64,
    questions: &[Question],
) -> Result<u64, CreateBatchError> {
    for question in questions {
        if let Err(reason) = question.validate() {
            return Err(CreateBatchError::Validation(format!(
                "question {} rejected: {reason}",
                question.question_id
            )));
        }
    }
    let mut tx = pool.begin().await?;
    let mut count = 0u64;
    for question in questions {
        sqlx::query(
            "INSERT INTO questions (quiz_id, text, options, correct_option, time_limit_sec, point_value)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(quiz_id)
        .bind(&question.text)
        .bind(&question.options)
        .bind(question.correct_option)
        .bind(question.time_limit_sec)
        .bind(question.point_value)
        .execute(&mut *tx)
        .await?;
        count += 1;
    }
    tx.commit().await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::make_lazy_pool;

    #[tokio::test]
    async fn create_batch_rejects_an_invalid_question_before_touching_the_database() {
        // The lazy pool never connects: validation fails first.
        let pool = make_lazy_pool();
        let bad = Question {
            question_id: 9,
            quiz_id: None,
            text: "only one way out?".to_owned(),
            options: vec!["yes".to_owned()],
            correct_option: 1,
            time_limit_sec: 10,
            point_value: 10,
        };

        let result = create_batch(&pool, 1, &[bad]).await;
        match result {
            Err(CreateBatchError::Validation(reason)) => {
                assert!(reason.contains("question 9"));
            }
            other => panic!("expected a validation rejection, got {other:?}"),
        }
    }
}
