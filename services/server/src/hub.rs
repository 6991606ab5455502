//! WebSocket fan-out hub.
//!
//! Owns the connection registry and delivery. Every connection gets a
//! bounded outbound queue drained by its writer task; enqueueing never
//! blocks. A connection whose queue is full at enqueue time is considered
//! slow and is dropped from the registry, closing its queue.
//!
//! The registry is sharded by `hash(user_id) % shards` (default 1 shard).
//! Broadcast fans out to all shards; direct delivery routes to one. Each
//! shard's lock guards only synchronous map access and is never held
//! across an await or while sending.

use crate::events::{EventSink, SinkError};
use quiz_protocol::ServerMessage;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifies one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    shard: u32,
    seq: u64,
}

struct ConnHandle {
    user_id: i64,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
struct ShardRegistry {
    conns: HashMap<u64, ConnHandle>,
    /// The current direct-delivery connection per user. A newer
    /// registration supersedes the older one here; the older connection
    /// keeps receiving broadcasts until it closes.
    direct: HashMap<i64, u64>,
}

struct Shard {
    registry: RwLock<ShardRegistry>,
}

pub struct Hub {
    shards: Vec<Shard>,
    queue_size: usize,
    next_seq: AtomicU64,
}

impl Hub {
    #[must_use]
    pub fn new(shards: usize, queue_size: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards)
                .map(|_| Shard {
                    registry: RwLock::new(ShardRegistry::default()),
                })
                .collect(),
            queue_size: queue_size.max(1),
            next_seq: AtomicU64::new(1),
        }
    }

    fn shard_index(&self, user_id: i64) -> u32 {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        u32::try_from(hasher.finish() as usize % self.shards.len()).unwrap_or(0)
    }

    /// Adds a connection for `user_id` and makes it the user's
    /// direct-delivery target. Returns the connection id and the receiving
    /// end of its outbound queue.
    pub fn register(&self, user_id: i64) -> (ConnId, mpsc::Receiver<String>) {
        let shard_idx = self.shard_index(user_id);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_size);

        let mut registry = self.shards[shard_idx as usize]
            .registry
            .write()
            .expect("hub lock poisoned");
        registry.conns.insert(seq, ConnHandle { user_id, tx });
        registry.direct.insert(user_id, seq);
        debug!(user_id, conn = seq, "connection registered");

        (ConnId { shard: shard_idx, seq }, rx)
    }

    /// Removes the connection and closes its outbound queue. The direct
    /// mapping is cleared only if it still points at this connection.
    pub fn unregister(&self, conn_id: ConnId) {
        let mut registry = self.shards[conn_id.shard as usize]
            .registry
            .write()
            .expect("hub lock poisoned");
        if let Some(handle) = registry.conns.remove(&conn_id.seq) {
            if registry.direct.get(&handle.user_id) == Some(&conn_id.seq) {
                registry.direct.remove(&handle.user_id);
            }
            debug!(user_id = handle.user_id, conn = conn_id.seq, "connection unregistered");
        }
    }

    /// Enqueues a serialized frame to every connection. Slow connections
    /// (full queue) and closed connections are dropped afterwards; the
    /// enqueue loop itself runs under the shard read lock and never
    /// blocks.
    pub fn broadcast_frame(&self, frame: &str) {
        for (shard_idx, shard) in self.shards.iter().enumerate() {
            let dead: Vec<u64> = {
                let registry = shard.registry.read().expect("hub lock poisoned");
                registry
                    .conns
                    .iter()
                    .filter_map(|(&seq, handle)| {
                        handle.tx.try_send(frame.to_owned()).err().map(|_| seq)
                    })
                    .collect()
            };
            for seq in dead {
                warn!(conn = seq, "dropping slow or closed connection");
                self.unregister(ConnId {
                    shard: u32::try_from(shard_idx).unwrap_or(0),
                    seq,
                });
            }
        }
    }

    /// Enqueues a serialized frame to the user's current direct
    /// connection, if any. A full queue drops that connection too.
    pub fn send_frame_to_user(&self, user_id: i64, frame: String) {
        let shard_idx = self.shard_index(user_id);
        let dead: Option<u64> = {
            let registry = self.shards[shard_idx as usize]
                .registry
                .read()
                .expect("hub lock poisoned");
            let Some(&seq) = registry.direct.get(&user_id) else {
                return;
            };
            match registry.conns.get(&seq) {
                Some(handle) => handle.tx.try_send(frame).err().map(|_| seq),
                None => Some(seq),
            }
        };
        if let Some(seq) = dead {
            warn!(user_id, conn = seq, "dropping slow or closed direct connection");
            self.unregister(ConnId {
                shard: shard_idx,
                seq,
            });
        }
    }

    /// Total registered connections across shards.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.registry.read().expect("hub lock poisoned").conns.len())
            .sum()
    }

    /// Whether `user_id` currently has a direct-delivery connection.
    #[must_use]
    pub fn is_connected(&self, user_id: i64) -> bool {
        let shard_idx = self.shard_index(user_id);
        self.shards[shard_idx as usize]
            .registry
            .read()
            .expect("hub lock poisoned")
            .direct
            .contains_key(&user_id)
    }
}

impl EventSink for Hub {
    fn broadcast(&self, msg: &ServerMessage) -> Result<(), SinkError> {
        let frame = serde_json::to_string(msg)?;
        self.broadcast_frame(&frame);
        Ok(())
    }

    fn send_to_user(&self, user_id: i64, msg: &ServerMessage) -> Result<(), SinkError> {
        let frame = serde_json::to_string(msg)?;
        self.send_frame_to_user(user_id, frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_protocol::{QuizCountdownData, ServerMessage};

    fn countdown(seconds_left: i64) -> ServerMessage {
        ServerMessage::QuizCountdown(QuizCountdownData {
            quiz_id: 1,
            seconds_left,
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_in_enqueue_order() {
        let hub = Hub::new(1, 8);
        let (_a, mut rx_a) = hub.register(1);
        let (_b, mut rx_b) = hub.register(2);

        hub.broadcast(&countdown(3)).unwrap();
        hub.broadcast(&countdown(2)).unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(first.contains("\"seconds_left\":3"));
            assert!(second.contains("\"seconds_left\":2"));
        }
    }

    #[tokio::test]
    async fn direct_delivery_routes_to_the_current_connection() {
        let hub = Hub::new(1, 8);
        let (_a, mut rx_a) = hub.register(1);
        let (_b, mut rx_b) = hub.register(2);

        hub.send_to_user(2, &countdown(9)).unwrap();

        assert!(rx_b.recv().await.unwrap().contains("\"seconds_left\":9"));
        assert!(rx_a.try_recv().is_err(), "user 1 must not see user 2's direct message");
    }

    #[tokio::test]
    async fn newer_registration_supersedes_direct_delivery_but_both_get_broadcasts() {
        let hub = Hub::new(1, 8);
        let (_old, mut rx_old) = hub.register(7);
        let (_new, mut rx_new) = hub.register(7);

        hub.send_to_user(7, &countdown(5)).unwrap();
        assert!(rx_new.recv().await.is_some());
        assert!(rx_old.try_recv().is_err(), "direct goes to the newest connection only");

        hub.broadcast(&countdown(4)).unwrap();
        assert!(rx_old.recv().await.is_some(), "older connection still receives broadcasts");
        assert!(rx_new.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_outbound_queue_drops_the_connection() {
        let hub = Hub::new(1, 2);
        let (_slow, _rx_kept_full) = hub.register(1);
        let (_fast, mut rx_fast) = hub.register(2);

        // Fill the slow client's queue, then overflow it.
        hub.broadcast(&countdown(3)).unwrap();
        hub.broadcast(&countdown(2)).unwrap();
        assert_eq!(hub.connection_count(), 2);

        // Drain the fast client so only the slow one overflows.
        rx_fast.recv().await.unwrap();
        rx_fast.recv().await.unwrap();

        hub.broadcast(&countdown(1)).unwrap();
        assert_eq!(hub.connection_count(), 1, "slow connection must be dropped");
        assert!(!hub.is_connected(1));

        // The surviving client still gets the full sequence.
        assert!(rx_fast.recv().await.unwrap().contains("\"seconds_left\":1"));
    }

    #[tokio::test]
    async fn unregister_clears_direct_mapping_and_closes_the_queue() {
        let hub = Hub::new(1, 8);
        let (conn, mut rx) = hub.register(3);

        hub.unregister(conn);
        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.is_connected(3));
        assert!(rx.recv().await.is_none(), "queue must be closed");

        // Direct delivery to a departed user is a no-op.
        hub.send_to_user(3, &countdown(1)).unwrap();
    }

    #[tokio::test]
    async fn unregistering_a_superseded_connection_keeps_the_newer_direct_mapping() {
        let hub = Hub::new(1, 8);
        let (old, _rx_old) = hub.register(7);
        let (_new, mut rx_new) = hub.register(7);

        hub.unregister(old);
        assert!(hub.is_connected(7));
        hub.send_to_user(7, &countdown(6)).unwrap();
        assert!(rx_new.recv().await.is_some());
    }

    #[tokio::test]
    async fn sharded_hub_spreads_users_and_still_broadcasts_to_all() {
        let hub = Hub::new(4, 8);
        let mut receivers = Vec::new();
        for user_id in 0..16 {
            let (_, rx) = hub.register(user_id);
            receivers.push(rx);
        }
        assert_eq!(hub.connection_count(), 16);

        hub.broadcast(&countdown(8)).unwrap();
        for rx in &mut receivers {
            assert!(rx.recv().await.is_some());
        }

        for user_id in 0..16 {
            hub.send_to_user(user_id, &countdown(1)).unwrap();
        }
        for rx in &mut receivers {
            assert!(rx.recv().await.unwrap().contains("\"seconds_left\":1"));
        }
    }
}
