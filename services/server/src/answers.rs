//! Answer processing: validate, score, persist, eliminate, notify.
//!
//! Invoked synchronously from each connection's inbound read loop. The
//! server's cached question start time is authoritative for response
//! times; the client timestamp only positions the answer inside the
//! window the server opened.

use crate::cache::{self, CoordinationCache};
use crate::config::QuizConfig;
use crate::events::EventSink;
use crate::repo::answers::{self as answer_repo, NewAnswer, SaveOutcome};
use crate::state::ActiveQuizState;
use quiz_core::scoring;
use quiz_protocol::{
    error_codes, QuizAnswerResultData, QuizEliminationData, QuizEliminationReminderData,
    QuizUserReadyData, ServerMessage, UserAnswerData,
};
use sqlx::PgPool;
#[cfg(test)]
use std::collections::HashSet;
use std::sync::Arc;
#[cfg(test)]
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    #[error("no quiz is currently active")]
    NoActiveQuiz,
    #[error("question {0} is not the current question")]
    NotCurrentQuestion(i64),
    #[error("you are eliminated from this quiz")]
    AlreadyEliminated,
    #[error("no start time recorded for this question")]
    StartTimeMissing,
    #[error("answer already submitted for this question")]
    AlreadyAnswered,
    #[error("failed to store the answer")]
    Repo(#[from] sqlx::Error),
}

impl AnswerError {
    /// The frozen wire code for the direct error event.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            AnswerError::NoActiveQuiz => error_codes::NO_ACTIVE_QUIZ,
            AnswerError::NotCurrentQuestion(_) => error_codes::NOT_CURRENT_QUESTION,
            AnswerError::AlreadyEliminated => error_codes::ALREADY_ELIMINATED,
            AnswerError::StartTimeMissing => error_codes::START_TIME_MISSING,
            AnswerError::AlreadyAnswered => error_codes::ALREADY_ANSWERED,
            AnswerError::Repo(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

/// Persistence seam for answers; the database's unique index is the
/// arbiter of duplicates in production.
pub enum AnswerStore {
    Pg(PgPool),
    #[cfg(test)]
    Memory(Mutex<HashSet<(i64, i64)>>),
}

impl AnswerStore {
    async fn save(&self, answer: &NewAnswer) -> Result<SaveOutcome, sqlx::Error> {
        match self {
            AnswerStore::Pg(pool) => answer_repo::save(pool, answer).await,
            #[cfg(test)]
            AnswerStore::Memory(seen) => {
                let inserted = seen
                    .lock()
                    .expect("store lock poisoned")
                    .insert((answer.user_id, answer.question_id));
                Ok(if inserted {
                    SaveOutcome::Inserted
                } else {
                    SaveOutcome::Duplicate
                })
            }
        }
    }
}

pub struct AnswerProcessor {
    store: AnswerStore,
    cache: Arc<CoordinationCache>,
    events: Arc<dyn EventSink>,
    active: ActiveQuizState,
    config: Arc<QuizConfig>,
}

impl AnswerProcessor {
    #[must_use]
    pub fn new(
        pool: PgPool,
        cache: Arc<CoordinationCache>,
        events: Arc<dyn EventSink>,
        active: ActiveQuizState,
        config: Arc<QuizConfig>,
    ) -> Self {
        Self {
            store: AnswerStore::Pg(pool),
            cache,
            events,
            active,
            config,
        }
    }

    /// Validates, scores and persists one submission, then notifies the
    /// user. Nothing changes on any error path.
    pub async fn process_answer(
        &self,
        user_id: i64,
        submit: &UserAnswerData,
    ) -> Result<(), AnswerError> {
        let active = self.active.snapshot().ok_or(AnswerError::NoActiveQuiz)?;
        let current = self
            .active
            .current_question()
            .ok_or(AnswerError::NotCurrentQuestion(submit.question_id))?;
        if current.question.question_id != submit.question_id {
            return Err(AnswerError::NotCurrentQuestion(submit.question_id));
        }

        let quiz_id = active.quiz_id;
        if self
            .cache
            .exists(&cache::keys::elimination(quiz_id, user_id))
        {
            self.send_logged(
                user_id,
                &ServerMessage::QuizEliminationReminder(QuizEliminationReminderData {
                    message: "You are eliminated from this quiz; answers are no longer accepted."
                        .to_owned(),
                    question_id: submit.question_id,
                }),
            );
            return Err(AnswerError::AlreadyEliminated);
        }

        let start_ms = self
            .cache
            .get_i64(&cache::keys::question_start_time(submit.question_id))
            .ok_or(AnswerError::StartTimeMissing)?;

        let outcome = scoring::evaluate_answer(
            &current.question,
            submit.selected_option,
            submit.timestamp - start_ms,
            self.config.elimination_time_ms,
        );

        let row = NewAnswer {
            user_id,
            quiz_id,
            question_id: submit.question_id,
            selected_option: submit.selected_option,
            is_correct: outcome.is_correct,
            response_time_ms: outcome.response_ms,
            score: outcome.points,
        };
        let saved = match self.store.save(&row).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!(user_id, question_id = row.question_id, error = %err, "answer save failed; retrying once");
                self.store.save(&row).await?
            }
        };
        if saved == SaveOutcome::Duplicate {
            return Err(AnswerError::AlreadyAnswered);
        }

        if outcome.is_eliminating() {
            self.cache.set(
                &cache::keys::elimination(quiz_id, user_id),
                "eliminated",
                cache::ELIMINATION_TTL,
            );
            let reason = if outcome.is_correct {
                "too_slow"
            } else {
                "wrong_answer"
            };
            info!(user_id, quiz_id, reason, "user eliminated");
            self.send_logged(
                user_id,
                &ServerMessage::QuizElimination(QuizEliminationData {
                    message: "You have been eliminated from this quiz.".to_owned(),
                    reason: reason.to_owned(),
                }),
            );
        }

        self.send_logged(
            user_id,
            &ServerMessage::QuizAnswerResult(QuizAnswerResultData {
                question_id: submit.question_id,
                correct_option: current.question.correct_option,
                your_answer: submit.selected_option,
                is_correct: outcome.is_correct,
                points_earned: outcome.points,
                time_taken_ms: outcome.response_ms,
                is_eliminated: outcome.is_eliminating(),
                time_limit_exceeded: outcome.time_limit_exceeded,
            }),
        );
        Ok(())
    }

    /// Records the ready mark and announces it to the room.
    pub fn process_ready(&self, user_id: i64, quiz_id: i64) {
        self.cache.set(
            &cache::keys::ready(quiz_id, user_id),
            "1",
            cache::READY_TTL,
        );
        if let Err(err) = self
            .events
            .broadcast(&ServerMessage::QuizUserReady(QuizUserReadyData {
                user_id,
                quiz_id,
                status: "ready".to_owned(),
            }))
        {
            warn!(user_id, quiz_id, error = %err, "user_ready broadcast failed");
        }
    }

    fn send_logged(&self, user_id: i64, msg: &ServerMessage) {
        if let Err(err) = self.events.send_to_user(user_id, msg) {
            warn!(user_id, error = %err, "direct event delivery failed");
        }
    }
}
