//! Quiz lifecycle scheduler.
//!
//! One timeline task per scheduled quiz walks the pre-start sequence
//! (announcement, waiting room, auto-fill, countdown) and hands the quiz
//! to the question runner through the start channel. Every wait derives a
//! fresh deadline from the wall clock, so a delayed tick can never shift
//! the start time.
//!
//! Re-scheduling a quiz replaces its timeline; cancellation tears it down
//! and broadcasts `quiz:cancelled` exactly once. Pre-start broadcast and
//! repository failures are logged and never abort the sequence.

use crate::config::QuizConfig;
use crate::events::EventSink;
use crate::repo;
use crate::runner;
use chrono::{DateTime, Utc};
use quiz_core::{Quiz, QuizStatus};
use quiz_protocol::{
    QuizAnnouncementData, QuizCancelledData, QuizCountdownData, QuizWaitingRoomData, ServerMessage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Precondition(String),
    #[error("quiz {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Repo(#[from] sqlx::Error),
}

struct TimelineHandle {
    generation: u64,
    cancel: watch::Sender<bool>,
}

struct SchedulerInner {
    pool: sqlx::PgPool,
    events: Arc<dyn EventSink>,
    config: Arc<QuizConfig>,
    start_tx: mpsc::Sender<i64>,
    timelines: Mutex<HashMap<i64, TimelineHandle>>,
    next_generation: AtomicU64,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Returns the scheduler and the receiving end of the start channel
    /// the question runner consumes.
    #[must_use]
    pub fn new(
        pool: sqlx::PgPool,
        events: Arc<dyn EventSink>,
        config: Arc<QuizConfig>,
    ) -> (Self, mpsc::Receiver<i64>) {
        let (start_tx, start_rx) = mpsc::channel(8);
        (
            Self {
                inner: Arc::new(SchedulerInner {
                    pool,
                    events,
                    config,
                    start_tx,
                    timelines: Mutex::new(HashMap::new()),
                    next_generation: AtomicU64::new(1),
                }),
            },
            start_rx,
        )
    }

    /// Installs (or replaces) the timed start sequence for a quiz.
    ///
    /// Fails `Validation` on a non-future start time or a quiz without
    /// questions, `Precondition` unless the quiz is `scheduled`.
    /// Idempotent per quiz: a repeat call cancels the previous timeline.
    pub async fn schedule(
        &self,
        quiz_id: i64,
        start_time: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        if start_time <= Utc::now() {
            return Err(ScheduleError::Validation(format!(
                "start time {start_time} is not in the future"
            )));
        }
        let mut quiz = repo::quizzes::get(&self.inner.pool, quiz_id)
            .await?
            .ok_or(ScheduleError::NotFound(quiz_id))?;
        if quiz.status != QuizStatus::Scheduled {
            return Err(ScheduleError::Precondition(format!(
                "quiz {quiz_id} is {}, not scheduled",
                quiz.status
            )));
        }
        let question_count = repo::questions::count_for_quiz(&self.inner.pool, quiz_id).await?;
        if question_count == 0 {
            return Err(ScheduleError::Validation(format!(
                "quiz {quiz_id} has no questions"
            )));
        }

        if quiz.scheduled_time != start_time {
            repo::quizzes::set_scheduled_time(&self.inner.pool, quiz_id, start_time).await?;
            quiz.scheduled_time = start_time;
        }

        self.install_timeline(quiz, start_time);
        Ok(())
    }

    /// Cancels a scheduled quiz: tears down its timeline, transitions the
    /// status and broadcasts `quiz:cancelled` exactly once.
    pub async fn cancel(&self, quiz_id: i64) -> Result<(), ScheduleError> {
        let handle = self
            .inner
            .timelines
            .lock()
            .expect("timeline lock poisoned")
            .remove(&quiz_id);

        if let Some(handle) = handle {
            let _ = handle.cancel.send(true);
        } else {
            // No local timeline: only quizzes still `scheduled` in the
            // repository may be cancelled.
            let quiz = repo::quizzes::get(&self.inner.pool, quiz_id)
                .await?
                .ok_or(ScheduleError::NotFound(quiz_id))?;
            if quiz.status != QuizStatus::Scheduled {
                return Err(ScheduleError::Precondition(format!(
                    "quiz {quiz_id} is {}, not scheduled",
                    quiz.status
                )));
            }
        }

        if let Err(err) =
            repo::quizzes::update_status(&self.inner.pool, quiz_id, QuizStatus::Cancelled).await
        {
            error!(quiz_id, error = %err, "failed to persist cancelled status");
        }
        let message = ServerMessage::QuizCancelled(QuizCancelledData {
            quiz_id,
            message: "The quiz has been cancelled.".to_owned(),
        });
        if let Err(err) = self.inner.events.broadcast(&message) {
            warn!(quiz_id, error = %err, "failed to broadcast cancellation");
        }
        info!(quiz_id, "quiz cancelled");
        Ok(())
    }

    /// Spawns the timeline, replacing (and thereby cancelling) any
    /// previous one for the same quiz.
    fn install_timeline(&self, quiz: Quiz, start_time: DateTime<Utc>) {
        let quiz_id = quiz.quiz_id;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let replaced = self
            .inner
            .timelines
            .lock()
            .expect("timeline lock poisoned")
            .insert(
                quiz_id,
                TimelineHandle {
                    generation,
                    cancel: cancel_tx,
                },
            );
        if replaced.is_some() {
            info!(quiz_id, "replacing existing timeline");
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_timeline(inner, quiz, start_time, generation, cancel_rx).await;
        });
    }

    #[cfg(test)]
    fn install_for_test(&self, quiz: Quiz, start_time: DateTime<Utc>) {
        self.install_timeline(quiz, start_time);
    }
}

impl SchedulerInner {
    /// Removes the timeline entry if it still belongs to this run.
    fn forget_timeline(&self, quiz_id: i64, generation: u64) {
        let mut timelines = self.timelines.lock().expect("timeline lock poisoned");
        if timelines
            .get(&quiz_id)
            .is_some_and(|h| h.generation == generation)
        {
            timelines.remove(&quiz_id);
        }
    }

    fn broadcast_logged(&self, quiz_id: i64, msg: &ServerMessage) {
        if let Err(err) = self.events.broadcast(msg) {
            warn!(quiz_id, error = %err, "pre-start broadcast failed");
        }
    }
}

/// Sleeps until `deadline` (wall clock) or cancellation.
/// Returns true when cancelled.
async fn wait_until_wall(deadline: DateTime<Utc>, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    let Ok(remaining) = (deadline - Utc::now()).to_std() else {
        return false;
    };
    tokio::select! {
        // A cancellation racing the deadline still wins.
        () = tokio::time::sleep(remaining) => *cancel.borrow(),
        _ = cancel.changed() => true,
    }
}

fn lead(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

async fn run_timeline(
    inner: Arc<SchedulerInner>,
    quiz: Quiz,
    start_time: DateTime<Utc>,
    generation: u64,
    mut cancel: watch::Receiver<bool>,
) {
    let quiz_id = quiz.quiz_id;
    let config = Arc::clone(&inner.config);
    info!(quiz_id, %start_time, "timeline installed");

    // T - 30 min: announcement.
    if wait_until_wall(start_time - lead(config.announcement_lead), &mut cancel).await {
        return;
    }
    let minutes_to_start = (start_time - Utc::now()).num_minutes().max(0);
    inner.broadcast_logged(
        quiz_id,
        &ServerMessage::QuizAnnouncement(QuizAnnouncementData {
            quiz_id,
            title: quiz.title.clone(),
            description: quiz.description.clone(),
            scheduled_time: start_time,
            question_count: quiz.question_count,
            minutes_to_start,
        }),
    );

    // T - 5 min: waiting room.
    if wait_until_wall(start_time - lead(config.waiting_room_lead), &mut cancel).await {
        return;
    }
    let starts_in_seconds = (start_time - Utc::now()).num_seconds().max(0);
    inner.broadcast_logged(
        quiz_id,
        &ServerMessage::QuizWaitingRoom(QuizWaitingRoomData {
            quiz_id,
            title: quiz.title.clone(),
            description: quiz.description.clone(),
            scheduled_time: start_time,
            question_count: quiz.question_count,
            starts_in_seconds,
        }),
    );

    // T - 2 min: one-shot auto-fill of an under-filled question set.
    if wait_until_wall(start_time - lead(config.autofill_lead), &mut cancel).await {
        return;
    }
    match runner::auto_fill(&inner.pool, &config, quiz_id).await {
        Ok(0) => {}
        Ok(added) => info!(quiz_id, added, "auto-filled questions"),
        Err(err) => warn!(quiz_id, error = %err, "auto-fill failed"),
    }

    // T - 60 s: per-second countdown, each tick on its own deadline.
    let countdown_from = config
        .countdown_seconds
        .min((start_time - Utc::now()).num_seconds())
        .max(0);
    for seconds_left in (1..=countdown_from).rev() {
        if wait_until_wall(start_time - chrono::Duration::seconds(seconds_left), &mut cancel).await
        {
            return;
        }
        inner.broadcast_logged(
            quiz_id,
            &ServerMessage::QuizCountdown(QuizCountdownData {
                quiz_id,
                seconds_left,
            }),
        );
    }

    // T: start.
    if wait_until_wall(start_time, &mut cancel).await {
        return;
    }
    inner.forget_timeline(quiz_id, generation);
    match repo::quizzes::update_status(&inner.pool, quiz_id, QuizStatus::InProgress).await {
        Ok(true) => {}
        Ok(false) => warn!(quiz_id, "status transition found no quiz row"),
        // The runner will observe the stale status and report it, but the
        // run proceeds: participants are already waiting.
        Err(err) => error!(quiz_id, error = %err, "failed to mark quiz in_progress"),
    }
    if inner.start_tx.send(quiz_id).await.is_err() {
        error!(quiz_id, "start channel closed; no runner is listening");
    } else {
        info!(quiz_id, "start signal emitted");
    }
}
