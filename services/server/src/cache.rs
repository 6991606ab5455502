//! Short-lived coordination state.
//!
//! A process-local TTL key-value store for question start times,
//! elimination marks and ready marks.  One active quiz per instance keeps
//! this state local; the string key schema below is what a shared backend
//! would adopt unchanged.
//!
//! Last-writer-wins; every key has exactly one writer.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

pub const QUESTION_START_TTL: Duration = Duration::from_secs(60 * 60);
pub const ELIMINATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const READY_TTL: Duration = Duration::from_secs(60 * 60);

/// Coordination key schema.
pub mod keys {
    /// Server-recorded question start, milliseconds since epoch.
    #[must_use]
    pub fn question_start_time(question_id: i64) -> String {
        format!("question:{question_id}:start_time")
    }

    /// Present (value `"eliminated"`) while the user is out of the quiz.
    #[must_use]
    pub fn elimination(quiz_id: i64, user_id: i64) -> String {
        format!("quiz:{quiz_id}:user:{user_id}:status")
    }

    /// Present (value `"1"`) once the user reported ready.
    #[must_use]
    pub fn ready(quiz_id: i64, user_id: i64) -> String {
        format!("quiz:{quiz_id}:ready_users:{user_id}")
    }
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL cache for coordination keys.
#[derive(Default)]
pub struct CoordinationCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CoordinationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key` for `ttl`.  Expired entries are swept
    /// while the write lock is held.
    pub fn set(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_owned(),
            CacheEntry {
                value: value.into(),
                expires_at: now + ttl,
            },
        );
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().expect("cache lock poisoned");
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Parses a stored integer value (used for start-time keys).
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_get_exists_round_trip() {
        let cache = CoordinationCache::new();
        cache.set(&keys::question_start_time(5), "1700000000123", QUESTION_START_TTL);

        assert!(cache.exists("question:5:start_time"));
        assert_eq!(cache.get_i64("question:5:start_time"), Some(1_700_000_000_123));
        assert_eq!(cache.get("question:6:start_time"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let cache = CoordinationCache::new();
        cache.set("quiz:1:user:9:status", "eliminated", Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.exists("quiz:1:user:9:status"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.exists("quiz:1:user:9:status"));
        assert_eq!(cache.get("quiz:1:user:9:status"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites_and_sweeps_expired_entries() {
        let cache = CoordinationCache::new();
        cache.set("a", "1", Duration::from_secs(1));
        cache.set("b", "2", Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(5)).await;
        cache.set("b", "3", Duration::from_secs(100));

        assert_eq!(cache.len(), 1, "expired 'a' should be swept on write");
        assert_eq!(cache.get("b"), Some("3".to_owned()));
    }

    #[test]
    fn key_schema_is_stable() {
        assert_eq!(keys::question_start_time(7), "question:7:start_time");
        assert_eq!(keys::elimination(3, 42), "quiz:3:user:42:status");
        assert_eq!(keys::ready(3, 42), "quiz:3:ready_users:42");
    }
}
