//! Quiz finalization: aggregate, rank, allocate prizes, announce.
//!
//! Runs once after the last answer reveal. A persistence failure never
//! blocks the `quiz:finish` broadcast; `quiz:results_available` is
//! deferred until a background retry lands the leaderboard.

use crate::cache;
use crate::repo;
use crate::runner::{broadcast_with_retry, RunnerDeps};
use chrono::Utc;
use quiz_core::ranking::{rank_standings, Standing};
use quiz_core::{Quiz, QuizStatus, UserAnswer};
use quiz_protocol::{QuizFinishData, QuizResultsAvailableData, ServerMessage};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

pub async fn finalize_quiz(deps: &RunnerDeps, quiz: &Quiz, total_questions: i32) {
    let quiz_id = quiz.quiz_id;

    let persisted = compute_and_persist(deps, quiz_id, total_questions).await;
    match &persisted {
        Ok(participants) => info!(quiz_id, participants, "leaderboard persisted"),
        Err(err) => error!(quiz_id, error = %err, "ranking failed; will retry in background"),
    }

    if persisted.is_ok() {
        broadcast_with_retry(
            &deps.events,
            &ServerMessage::QuizResultsAvailable(QuizResultsAvailableData { quiz_id }),
            deps.config.max_retries,
            deps.config.retry_interval,
        )
        .await;
    } else {
        spawn_ranking_retry(deps.clone(), quiz_id, total_questions);
    }

    if let Err(err) =
        repo::quizzes::update_status(&deps.pool, quiz_id, QuizStatus::Completed).await
    {
        error!(quiz_id, error = %err, "failed to mark quiz completed");
    }

    broadcast_with_retry(
        &deps.events,
        &ServerMessage::QuizFinish(QuizFinishData {
            quiz_id,
            title: quiz.title.clone(),
            message: "The quiz has ended. Thanks for playing!".to_owned(),
            status: QuizStatus::Completed.as_str().to_owned(),
            ended_at: Utc::now(),
        }),
        deps.config.max_retries,
        deps.config.retry_interval,
    )
    .await;
}

/// Aggregates every persisted answer into final standings and writes the
/// ranked leaderboard in one transaction. Returns the participant count.
async fn compute_and_persist(
    deps: &RunnerDeps,
    quiz_id: i64,
    total_questions: i32,
) -> Result<usize, sqlx::Error> {
    let answers = repo::answers::get_quiz_answers(&deps.pool, quiz_id).await?;
    let standings = build_standings(&answers, |user_id| {
        deps.cache
            .exists(&cache::keys::elimination(quiz_id, user_id))
    });
    let ranked = rank_standings(standings, total_questions, deps.config.total_prize_fund);
    repo::results::persist_rankings(&deps.pool, quiz_id, total_questions, &ranked).await?;
    Ok(ranked.len())
}

fn spawn_ranking_retry(deps: RunnerDeps, quiz_id: i64, total_questions: i32) {
    tokio::spawn(async move {
        let mut delay = deps.config.retry_interval;
        for attempt in 1..=deps.config.max_retries {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
            match compute_and_persist(&deps, quiz_id, total_questions).await {
                Ok(participants) => {
                    info!(quiz_id, participants, attempt, "leaderboard persisted on retry");
                    broadcast_with_retry(
                        &deps.events,
                        &ServerMessage::QuizResultsAvailable(QuizResultsAvailableData { quiz_id }),
                        deps.config.max_retries,
                        deps.config.retry_interval,
                    )
                    .await;
                    return;
                }
                Err(err) => {
                    warn!(quiz_id, attempt, error = %err, "ranking retry failed");
                }
            }
        }
        error!(quiz_id, "ranking abandoned; results stay unavailable");
    });
}

/// Folds per-answer rows into one standing per participant.
fn build_standings(
    answers: &[UserAnswer],
    is_eliminated: impl Fn(i64) -> bool,
) -> Vec<Standing> {
    let mut totals: BTreeMap<i64, (i64, i32)> = BTreeMap::new();
    for answer in answers {
        let entry = totals.entry(answer.user_id).or_insert((0, 0));
        entry.0 += i64::from(answer.score);
        if answer.is_correct {
            entry.1 += 1;
        }
    }
    totals
        .into_iter()
        .map(|(user_id, (score, correct_answers))| Standing {
            user_id,
            score,
            correct_answers,
            is_eliminated: is_eliminated(user_id),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn answer(user_id: i64, question_id: i64, is_correct: bool, score: i32) -> UserAnswer {
        UserAnswer {
            answer_id: question_id * 100 + user_id,
            user_id,
            quiz_id: 1,
            question_id,
            selected_option: 1,
            is_correct,
            response_time_ms: 1_000,
            score,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 19, 0, 0).unwrap(),
        }
    }

    #[test]
    fn standings_aggregate_scores_and_correct_counts_per_user() {
        let answers = vec![
            answer(1, 10, true, 9),
            answer(1, 11, true, 8),
            answer(2, 10, false, 0),
        ];
        let standings = build_standings(&answers, |user_id| user_id == 2);

        assert_eq!(standings.len(), 2);
        let a = standings.iter().find(|s| s.user_id == 1).unwrap();
        assert_eq!(a.score, 17);
        assert_eq!(a.correct_answers, 2);
        assert!(!a.is_eliminated);
        let b = standings.iter().find(|s| s.user_id == 2).unwrap();
        assert_eq!(b.score, 0);
        assert_eq!(b.correct_answers, 0);
        assert!(b.is_eliminated);
    }

    #[test]
    fn two_user_quiz_produces_the_expected_leaderboard() {
        // User 1 answers both questions correctly (9 + 8 points); user 2
        // answers the first wrong and is eliminated.
        let answers = vec![
            answer(1, 10, true, 9),
            answer(2, 10, false, 0),
            answer(1, 11, true, 8),
        ];
        let standings = build_standings(&answers, |user_id| user_id == 2);
        let ranked = rank_standings(standings, 2, 1_000_000);

        let winner = ranked.iter().find(|r| r.user_id == 1).unwrap();
        assert_eq!(winner.rank, 1);
        assert!(winner.is_winner);
        assert_eq!(winner.prize_fund, 1_000_000);
        assert!(winner.score > 10 && winner.score <= 20);

        let eliminated = ranked.iter().find(|r| r.user_id == 2).unwrap();
        assert_eq!(eliminated.rank, 2);
        assert!(!eliminated.is_winner);
        assert_eq!(eliminated.prize_fund, 0);
        assert!(eliminated.is_eliminated);
    }

    #[test]
    fn users_with_identical_totals_share_the_top_rank() {
        let answers = vec![
            answer(1, 10, true, 9),
            answer(2, 10, true, 9),
            answer(3, 10, true, 9),
        ];
        let ranked = rank_standings(build_standings(&answers, |_| false), 1, 1_000_000);
        assert!(ranked.iter().all(|r| r.rank == 1));
        assert!(ranked.iter().all(|r| r.is_winner));
        assert!(ranked.iter().all(|r| r.prize_fund == 333_333));
    }
}
