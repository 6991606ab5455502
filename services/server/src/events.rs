//! The broadcast capability.
//!
//! The scheduler, question runner and answer processor depend on this
//! narrow seam instead of the Hub itself, so neither side holds a
//! back-pointer to the other and tests can substitute a recording sink.
//!
//! Enqueueing is non-blocking: implementations drop slow consumers rather
//! than block the caller.

use quiz_protocol::ServerMessage;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("event sink unavailable")]
    Unavailable,
}

/// Delivery of server events to participants.
pub trait EventSink: Send + Sync {
    /// Enqueues the message to every connected client.
    fn broadcast(&self, msg: &ServerMessage) -> Result<(), SinkError>;

    /// Enqueues the message to one user's current direct connection, if
    /// any.  Delivering to an absent user is not an error.
    fn send_to_user(&self, user_id: i64, msg: &ServerMessage) -> Result<(), SinkError>;
}

#[cfg(test)]
pub mod testing {
    use super::{EventSink, SinkError};
    use quiz_protocol::ServerMessage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records every event and optionally fails the first N broadcasts.
    #[derive(Default)]
    pub struct RecordingSink {
        pub broadcasts: Mutex<Vec<ServerMessage>>,
        pub directs: Mutex<Vec<(i64, ServerMessage)>>,
        fail_next_broadcasts: AtomicU32,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// The next `n` broadcast attempts will return `Unavailable`.
        pub fn fail_next_broadcasts(&self, n: u32) {
            self.fail_next_broadcasts.store(n, Ordering::SeqCst);
        }

        pub fn broadcast_types(&self) -> Vec<String> {
            self.broadcasts
                .lock()
                .unwrap()
                .iter()
                .map(type_name)
                .collect()
        }

        pub fn direct_types(&self) -> Vec<(i64, String)> {
            self.directs
                .lock()
                .unwrap()
                .iter()
                .map(|(uid, msg)| (*uid, type_name(msg)))
                .collect()
        }
    }

    /// The wire `type` tag of a message, for compact assertions.
    pub fn type_name(msg: &ServerMessage) -> String {
        serde_json::to_value(msg).expect("serializable")["type"]
            .as_str()
            .expect("tagged")
            .to_owned()
    }

    impl EventSink for RecordingSink {
        fn broadcast(&self, msg: &ServerMessage) -> Result<(), SinkError> {
            let remaining = self.fail_next_broadcasts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next_broadcasts.store(remaining - 1, Ordering::SeqCst);
                return Err(SinkError::Unavailable);
            }
            self.broadcasts.lock().unwrap().push(msg.clone());
            Ok(())
        }

        fn send_to_user(&self, user_id: i64, msg: &ServerMessage) -> Result<(), SinkError> {
            self.directs.lock().unwrap().push((user_id, msg.clone()));
            Ok(())
        }
    }
}
