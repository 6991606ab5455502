//! Runtime configuration.
//!
//! Environment variables are the sole config source; every knob has a
//! default so a bare `DATABASE_URL` is enough to run.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Timing and sizing knobs for the quiz engine.
#[derive(Debug, Clone)]
pub struct QuizConfig {
    /// Lead time for the `quiz:announcement` broadcast.
    pub announcement_lead: Duration,
    /// Lead time for the `quiz:waiting_room` broadcast.
    pub waiting_room_lead: Duration,
    /// Lead time for the one-shot question auto-fill.
    pub autofill_lead: Duration,
    /// Length of the per-second countdown before start.
    pub countdown_seconds: i64,
    /// Pause before each question broadcast so clients can prepare.
    pub question_delay_ms: u64,
    /// Pause between the answer window closing and the reveal.
    pub answer_reveal_delay_ms: u64,
    /// Pause between a reveal and the next question.
    pub inter_question_delay_ms: u64,
    /// Response times strictly above this eliminate regardless of limit.
    pub elimination_time_ms: i64,
    /// Broadcast retry cap for the question runner.
    pub max_retries: u32,
    /// Delay between broadcast retries.
    pub retry_interval: Duration,
    /// Auto-fill tops quizzes up to this many questions.
    pub max_questions_per_quiz: usize,
    /// Fixed fund split between winners by floor division.
    pub total_prize_fund: i64,
    /// Per-connection outbound queue capacity.
    pub outbound_queue_size: usize,
    /// Hub shard count; 1 disables sharding.
    pub hub_shards: usize,
    /// Server heartbeat cadence; two missed client heartbeats disconnect.
    pub heartbeat_interval: Duration,
    /// Single-use WebSocket ticket lifetime.
    pub ticket_ttl: Duration,
    /// Enables the cross-instance pub/sub fan-out.
    pub cluster_enabled: bool,
    /// Cadence of the cluster metrics envelope.
    pub metrics_interval: Duration,
    /// Connection cap for the shared Postgres pool.
    pub db_max_connections: u32,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            announcement_lead: Duration::from_secs(30 * 60),
            waiting_room_lead: Duration::from_secs(5 * 60),
            autofill_lead: Duration::from_secs(2 * 60),
            countdown_seconds: 60,
            question_delay_ms: 500,
            answer_reveal_delay_ms: 200,
            inter_question_delay_ms: 500,
            elimination_time_ms: 10_000,
            max_retries: 3,
            retry_interval: Duration::from_millis(500),
            max_questions_per_quiz: 10,
            total_prize_fund: 1_000_000,
            outbound_queue_size: 128,
            hub_shards: 1,
            heartbeat_interval: Duration::from_secs(30),
            ticket_ttl: Duration::from_secs(300),
            cluster_enabled: false,
            metrics_interval: Duration::from_secs(15),
            db_max_connections: 10,
        }
    }
}

impl QuizConfig {
    /// Loads the config from environment variables, falling back to the
    /// defaults above for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            announcement_lead: env_secs("QUIZ_ANNOUNCEMENT_LEAD_SECS", defaults.announcement_lead),
            waiting_room_lead: env_secs("QUIZ_WAITING_ROOM_LEAD_SECS", defaults.waiting_room_lead),
            autofill_lead: env_secs("QUIZ_AUTOFILL_LEAD_SECS", defaults.autofill_lead),
            countdown_seconds: env_parse("QUIZ_COUNTDOWN_SECS", defaults.countdown_seconds),
            question_delay_ms: env_parse("QUIZ_QUESTION_DELAY_MS", defaults.question_delay_ms),
            answer_reveal_delay_ms: env_parse(
                "QUIZ_ANSWER_REVEAL_DELAY_MS",
                defaults.answer_reveal_delay_ms,
            ),
            inter_question_delay_ms: env_parse(
                "QUIZ_INTER_QUESTION_DELAY_MS",
                defaults.inter_question_delay_ms,
            ),
            elimination_time_ms: env_parse("QUIZ_ELIMINATION_TIME_MS", defaults.elimination_time_ms),
            max_retries: env_parse("QUIZ_BROADCAST_MAX_RETRIES", defaults.max_retries),
            retry_interval: env_millis("QUIZ_BROADCAST_RETRY_MS", defaults.retry_interval),
            max_questions_per_quiz: env_parse(
                "QUIZ_MAX_QUESTIONS_PER_QUIZ",
                defaults.max_questions_per_quiz,
            ),
            total_prize_fund: env_parse("QUIZ_TOTAL_PRIZE_FUND", defaults.total_prize_fund),
            outbound_queue_size: env_parse("QUIZ_OUTBOUND_QUEUE_SIZE", defaults.outbound_queue_size)
                .max(1),
            hub_shards: env_parse("QUIZ_HUB_SHARDS", defaults.hub_shards).max(1),
            heartbeat_interval: env_secs("QUIZ_HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval),
            ticket_ttl: env_secs("QUIZ_TICKET_TTL_SECS", defaults.ticket_ttl),
            cluster_enabled: env_parse("QUIZ_CLUSTER_ENABLED", defaults.cluster_enabled),
            metrics_interval: env_secs("QUIZ_METRICS_INTERVAL_SECS", defaults.metrics_interval),
            db_max_connections: env_parse("QUIZ_DB_MAX_CONNECTIONS", defaults.db_max_connections)
                .max(1),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_secs)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_timeline() {
        let cfg = QuizConfig::default();
        assert_eq!(cfg.announcement_lead, Duration::from_secs(1800));
        assert_eq!(cfg.waiting_room_lead, Duration::from_secs(300));
        assert_eq!(cfg.autofill_lead, Duration::from_secs(120));
        assert_eq!(cfg.countdown_seconds, 60);
        assert_eq!(cfg.elimination_time_ms, 10_000);
        assert_eq!(cfg.total_prize_fund, 1_000_000);
        assert_eq!(cfg.max_questions_per_quiz, 10);
        assert_eq!(cfg.db_max_connections, 10);
        assert!(!cfg.cluster_enabled);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        // Not set at all.
        assert_eq!(env_parse("QUIZ_TEST_UNSET_KNOB", 7u32), 7);
    }
}
