//! Question runner: walks an active quiz's questions in order.
//!
//! Consumes start signals from the scheduler, emits each question with a
//! per-question 1 Hz timer, reveals the correct option after the answer
//! window, and hands the quiz to finalization after the last reveal.
//!
//! The shutdown signal aborts between phases only, never mid-phase;
//! partially-emitted state is tolerated (clients resync on the next
//! `quiz:question`).

use crate::cache::{self, CoordinationCache};
use crate::config::QuizConfig;
use crate::events::EventSink;
use crate::finalize;
use crate::repo;
use crate::state::{ActiveQuizInfo, ActiveQuizState, CurrentQuestion};
use chrono::Utc;
use quiz_core::{Question, QuizStatus};
use quiz_protocol::{
    QuestionOption, QuizAnswerRevealData, QuizQuestionData, QuizStartData, QuizTimerData,
    ServerMessage,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Everything the runner and finalization need, bundled for cloning into
/// tasks.
#[derive(Clone)]
pub struct RunnerDeps {
    pub pool: PgPool,
    pub cache: Arc<CoordinationCache>,
    pub events: Arc<dyn EventSink>,
    pub config: Arc<QuizConfig>,
    pub active: ActiveQuizState,
}

#[derive(Debug, thiserror::Error)]
pub enum AutoFillError {
    #[error("quiz {0} not found")]
    NotFound(i64),
    #[error("quiz {0} is not scheduled")]
    NotScheduled(i64),
    #[error(transparent)]
    Batch(#[from] repo::questions::CreateBatchError),
    #[error(transparent)]
    Repo(#[from] sqlx::Error),
}

/// Spawns the long-lived loop that turns start signals into quiz runs.
pub fn spawn_runner_loop(
    deps: RunnerDeps,
    mut start_rx: mpsc::Receiver<i64>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                quiz_id = start_rx.recv() => match quiz_id {
                    Some(quiz_id) => run_quiz(&deps, quiz_id, shutdown.clone()).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Runs one quiz end to end: start broadcast, every question, finalize.
pub async fn run_quiz(deps: &RunnerDeps, quiz_id: i64, shutdown: watch::Receiver<bool>) {
    let loaded = match repo::quizzes::get_with_questions(&deps.pool, quiz_id).await {
        Ok(Some(loaded)) => loaded,
        Ok(None) => {
            error!(quiz_id, "start signal for unknown quiz");
            return;
        }
        Err(err) => {
            error!(quiz_id, error = %err, "failed to load quiz for run");
            return;
        }
    };
    let (quiz, questions) = loaded;
    if questions.is_empty() {
        error!(quiz_id, "quiz started with no questions");
        return;
    }
    if quiz.status != QuizStatus::InProgress {
        // The scheduler's status write may have failed; the run proceeds
        // against the in-memory timeline regardless.
        warn!(quiz_id, status = %quiz.status, "quiz status is inconsistent at start");
    }

    let total_questions = i32::try_from(questions.len()).unwrap_or(i32::MAX);
    deps.active.start(ActiveQuizInfo {
        quiz_id,
        title: quiz.title.clone(),
        question_count: total_questions,
    });
    info!(quiz_id, total_questions, "quiz run starting");

    broadcast_with_retry(
        &deps.events,
        &ServerMessage::QuizStart(QuizStartData {
            quiz_id,
            title: quiz.title.clone(),
            question_count: total_questions,
        }),
        deps.config.max_retries,
        deps.config.retry_interval,
    )
    .await;

    let mut cancel = shutdown.clone();
    for (idx, question) in questions.iter().enumerate() {
        let number = i32::try_from(idx).unwrap_or(0) + 1;
        if run_question(deps, quiz_id, question, number, total_questions, &mut cancel).await {
            info!(quiz_id, number, "quiz run aborted");
            deps.active.clear();
            return;
        }
    }

    deps.active.clear_current_question();
    finalize::finalize_quiz(deps, &quiz, total_questions).await;
    deps.active.clear();
    info!(quiz_id, "quiz run finished");
}

/// Runs a single question phase sequence. Returns true when aborted by
/// the cancellation signal.
pub(crate) async fn run_question(
    deps: &RunnerDeps,
    quiz_id: i64,
    question: &Question,
    number: i32,
    total_questions: i32,
    cancel: &mut watch::Receiver<bool>,
) -> bool {
    deps.active.set_current_question(CurrentQuestion {
        question: question.clone(),
        number,
        start_ms: 0,
    });

    // Give clients a beat to render the transition.
    if sleep_or_cancel(Duration::from_millis(deps.config.question_delay_ms), cancel).await {
        return true;
    }

    let start_ms = Utc::now().timestamp_millis();
    deps.active.set_current_question(CurrentQuestion {
        question: question.clone(),
        number,
        start_ms,
    });
    deps.cache.set(
        &cache::keys::question_start_time(question.question_id),
        start_ms.to_string(),
        cache::QUESTION_START_TTL,
    );

    let options = question
        .options
        .iter()
        .enumerate()
        .map(|(i, text)| QuestionOption {
            id: i32::try_from(i).unwrap_or(0) + 1,
            text: text.clone(),
        })
        .collect();
    broadcast_with_retry(
        &deps.events,
        &ServerMessage::QuizQuestion(QuizQuestionData {
            question_id: question.question_id,
            quiz_id,
            number,
            text: question.text.clone(),
            options,
            time_limit: question.time_limit_sec,
            total_questions,
            start_time: start_ms,
            server_timestamp: Utc::now().timestamp_millis(),
        }),
        deps.config.max_retries,
        deps.config.retry_interval,
    )
    .await;

    let window_start = Instant::now();
    let timer = spawn_question_timer(
        Arc::clone(&deps.events),
        question.question_id,
        question.time_limit_sec,
        window_start,
        cancel.clone(),
    );

    // The answer window.
    let window = Duration::from_secs(u64::try_from(question.time_limit_sec).unwrap_or(0));
    if sleep_until_or_cancel(window_start + window, cancel).await {
        timer.abort();
        return true;
    }

    if sleep_or_cancel(
        Duration::from_millis(deps.config.answer_reveal_delay_ms),
        cancel,
    )
    .await
    {
        return true;
    }
    broadcast_with_retry(
        &deps.events,
        &ServerMessage::QuizAnswerReveal(QuizAnswerRevealData {
            question_id: question.question_id,
            correct_option: question.correct_option,
        }),
        deps.config.max_retries,
        deps.config.retry_interval,
    )
    .await;

    if number < total_questions
        && sleep_or_cancel(
            Duration::from_millis(deps.config.inter_question_delay_ms),
            cancel,
        )
        .await
    {
        return true;
    }
    false
}

/// Emits `quiz:timer` ticks at 1 Hz while the answer window is open.
///
/// To bound broadcast volume only ticks with `remaining <= 5` or
/// `remaining % 5 == 0` go out. Tick failures are logged, not retried;
/// the next tick resynchronizes clients.
fn spawn_question_timer(
    events: Arc<dyn EventSink>,
    question_id: i64,
    time_limit_sec: i32,
    window_start: Instant,
    mut cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let limit = u64::try_from(time_limit_sec).unwrap_or(0);
        for elapsed in 1..limit {
            tokio::select! {
                () = tokio::time::sleep_until(window_start + Duration::from_secs(elapsed)) => {}
                _ = cancel.changed() => return,
            }
            let remaining = i32::try_from(limit - elapsed).unwrap_or(0);
            if remaining <= 5 || remaining % 5 == 0 {
                let tick = ServerMessage::QuizTimer(QuizTimerData {
                    question_id,
                    remaining_seconds: remaining,
                    server_timestamp: Utc::now().timestamp_millis(),
                });
                if let Err(err) = events.broadcast(&tick) {
                    warn!(question_id, error = %err, "timer tick broadcast failed");
                }
            }
        }
    })
}

/// Tops the quiz up to the configured question count by sampling the
/// reusable pool. Valid only while the quiz is still `scheduled`.
pub async fn auto_fill(
    pool: &PgPool,
    config: &QuizConfig,
    quiz_id: i64,
) -> Result<u64, AutoFillError> {
    let quiz = repo::quizzes::get(pool, quiz_id)
        .await?
        .ok_or(AutoFillError::NotFound(quiz_id))?;
    if quiz.status != QuizStatus::Scheduled {
        return Err(AutoFillError::NotScheduled(quiz_id));
    }

    let existing = repo::questions::count_for_quiz(pool, quiz_id).await?;
    let target = i64::try_from(config.max_questions_per_quiz).unwrap_or(0);
    let missing = target - existing;
    if missing <= 0 {
        return Ok(0);
    }

    let sampled = repo::questions::get_random_pool_questions(pool, missing, quiz_id).await?;
    let mut picks = Vec::with_capacity(sampled.len());
    for question in sampled {
        match question.validate() {
            Ok(()) => picks.push(question),
            Err(reason) => {
                warn!(quiz_id, question_id = question.question_id, %reason, "pool question failed validation; skipped");
            }
        }
    }
    if picks.is_empty() {
        warn!(quiz_id, missing, "no usable pool questions; quiz stays under-filled");
        return Ok(0);
    }
    let added = repo::questions::create_batch(pool, quiz_id, &picks).await?;
    let new_count = i32::try_from(existing + i64::try_from(added).unwrap_or(0)).unwrap_or(0);
    repo::quizzes::set_question_count(pool, quiz_id, new_count).await?;
    Ok(added)
}

/// Retries a broadcast on transient sink errors, then gives up and lets
/// the timeline advance.
pub(crate) async fn broadcast_with_retry(
    events: &Arc<dyn EventSink>,
    msg: &ServerMessage,
    max_retries: u32,
    retry_interval: Duration,
) -> bool {
    for attempt in 0..=max_retries {
        match events.broadcast(msg) {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "broadcast failed");
                if attempt < max_retries {
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }
    error!("broadcast abandoned after retries; advancing");
    false
}

async fn sleep_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => *cancel.borrow(),
        _ = cancel.changed() => true,
    }
}

async fn sleep_until_or_cancel(deadline: Instant, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep_until(deadline) => *cancel.borrow(),
        _ = cancel.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::state::tests::make_lazy_pool;

    fn deps_with_sink() -> (RunnerDeps, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let deps = RunnerDeps {
            pool: make_lazy_pool(),
            cache: Arc::new(CoordinationCache::new()),
            events: Arc::clone(&sink) as Arc<dyn EventSink>,
            config: Arc::new(QuizConfig::default()),
            active: ActiveQuizState::new(),
        };
        (deps, sink)
    }

    fn question(question_id: i64, time_limit_sec: i32) -> Question {
        Question {
            question_id,
            quiz_id: Some(1),
            text: "pick one".to_owned(),
            options: vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
            correct_option: 2,
            time_limit_sec,
            point_value: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn question_phase_emits_question_ticks_then_reveal_in_order() {
        let (deps, sink) = deps_with_sink();
        let (_cancel_tx, mut cancel) = watch::channel(false);
        let q = question(7, 10);

        let aborted = run_question(&deps, 1, &q, 1, 2, &mut cancel).await;
        assert!(!aborted);

        let types = sink.broadcast_types();
        assert_eq!(types.first().map(String::as_str), Some("quiz:question"));
        assert_eq!(types.last().map(String::as_str), Some("quiz:answer_reveal"));
        let reveal_pos = types.iter().position(|t| t == "quiz:answer_reveal").unwrap();
        let question_pos = types.iter().position(|t| t == "quiz:question").unwrap();
        assert!(question_pos < reveal_pos, "reveal must follow the question");
        assert_eq!(
            types.iter().filter(|t| *t == "quiz:answer_reveal").count(),
            1,
            "exactly one reveal per question"
        );

        // 10 s window: ticks at remaining 5, 4, 3, 2, 1.
        let broadcasts = sink.broadcasts.lock().unwrap();
        let ticks: Vec<i32> = broadcasts
            .iter()
            .filter_map(|m| match m {
                ServerMessage::QuizTimer(data) => Some(data.remaining_seconds),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![5, 4, 3, 2, 1]);

        // The start time landed in the cache and in the payload.
        let cached = deps.cache.get_i64("question:7:start_time").unwrap();
        match broadcasts.iter().find(|m| matches!(m, ServerMessage::QuizQuestion(_))) {
            Some(ServerMessage::QuizQuestion(data)) => {
                assert_eq!(data.start_time, cached);
                assert_eq!(data.options.len(), 3);
                assert_eq!(data.options[2].id, 3);
                assert_eq!(data.time_limit, 10);
            }
            _ => panic!("question payload missing"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_filter_to_multiples_of_five_and_the_final_five() {
        let (deps, sink) = deps_with_sink();
        let (_cancel_tx, mut cancel) = watch::channel(false);
        let q = question(9, 13);

        run_question(&deps, 1, &q, 2, 2, &mut cancel).await;

        let broadcasts = sink.broadcasts.lock().unwrap();
        let ticks: Vec<i32> = broadcasts
            .iter()
            .filter_map(|m| match m {
                ServerMessage::QuizTimer(data) => Some(data.remaining_seconds),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![10, 5, 4, 3, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_the_question_broadcast_emits_nothing() {
        let (deps, sink) = deps_with_sink();
        let (cancel_tx, mut cancel) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let aborted = run_question(&deps, 1, &question(3, 10), 1, 1, &mut cancel).await;
        assert!(aborted);
        assert!(sink.broadcast_types().is_empty());
        assert!(!deps.cache.exists("question:3:start_time"));
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_retry_recovers_from_transient_failures() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_next_broadcasts(2);
        let events = Arc::clone(&sink) as Arc<dyn EventSink>;

        let delivered = broadcast_with_retry(
            &events,
            &ServerMessage::QuizStart(QuizStartData {
                quiz_id: 1,
                title: "q".to_owned(),
                question_count: 1,
            }),
            3,
            Duration::from_millis(500),
        )
        .await;
        assert!(delivered);
        assert_eq!(sink.broadcast_types(), vec!["quiz:start".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_retry_gives_up_after_the_cap() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_next_broadcasts(10);
        let events = Arc::clone(&sink) as Arc<dyn EventSink>;

        let delivered = broadcast_with_retry(
            &events,
            &ServerMessage::QuizStart(QuizStartData {
                quiz_id: 1,
                title: "q".to_owned(),
                question_count: 1,
            }),
            3,
            Duration::from_millis(500),
        )
        .await;
        assert!(!delivered);
        assert!(sink.broadcast_types().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn current_question_is_tracked_while_the_window_is_open() {
        let (deps, _sink) = deps_with_sink();
        let (_cancel_tx, cancel) = watch::channel(false);
        let q = question(11, 10);
        let deps_clone = deps.clone();

        let run = tokio::spawn(async move {
            let mut cancel = cancel;
            run_question(&deps_clone, 1, &q, 1, 1, &mut cancel).await
        });

        // After the prepare delay the question must be current with a
        // recorded start.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let current = deps.active.current_question().expect("question should be current");
        assert_eq!(current.question.question_id, 11);
        assert_eq!(current.number, 1);
        assert!(current.start_ms > 0);

        assert!(!run.await.unwrap());
    }

    #[test]
    fn tick_filter_matches_the_contract() {
        // Standalone check of the documented filter.
        let emitted: Vec<i32> = (1..30)
            .rev()
            .filter(|r| *r <= 5 || *r % 5 == 0)
            .collect();
        assert_eq!(emitted, vec![25, 20, 15, 10, 5, 4, 3, 2, 1]);
    }
}
