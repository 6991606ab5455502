//! Cross-instance fan-out.
//!
//! A pub/sub provider seam plus the envelope relay that mirrors local
//! broadcast and direct delivery to the other instances. Disabled
//! deployments use the no-op provider; the in-process provider backs
//! tests and single-host setups. A networked backend implements the same
//! two-method trait.
//!
//! Publishing never blocks local delivery: the local enqueue happens
//! first and the publish runs in its own task with bounded retries.

use crate::events::{EventSink, SinkError};
use crate::hub::Hub;
use chrono::Utc;
use quiz_protocol::ServerMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const BROADCAST_CHANNEL: &str = "quiz:events";
pub const DIRECT_CHANNEL: &str = "quiz:direct";
pub const METRICS_CHANNEL: &str = "quiz:metrics";

#[derive(Debug, thiserror::Error)]
#[error("publish to {channel} failed")]
pub struct PublishError {
    pub channel: String,
}

/// Minimal pub/sub capability the relay needs.
pub trait PubSub: Send + Sync {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), PublishError>;
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>>;
}

/// Provider used when cross-instance mode is disabled. Publishes are
/// accepted and discarded; subscriptions never yield.
pub struct NoopPubSub {
    // Kept alive so subscribers block instead of seeing a closed channel.
    keepalive: broadcast::Sender<Vec<u8>>,
}

impl NoopPubSub {
    #[must_use]
    pub fn new() -> Self {
        let (keepalive, _) = broadcast::channel(1);
        Self { keepalive }
    }
}

impl Default for NoopPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub for NoopPubSub {
    fn publish(&self, _channel: &str, _payload: Vec<u8>) -> Result<(), PublishError> {
        Ok(())
    }

    fn subscribe(&self, _channel: &str) -> broadcast::Receiver<Vec<u8>> {
        self.keepalive.subscribe()
    }
}

/// In-process provider: one broadcast channel per topic.
pub struct LocalPubSub {
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl LocalPubSub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        {
            let channels = self.channels.read().expect("pubsub lock poisoned");
            if let Some(tx) = channels.get(channel) {
                return tx.clone();
            }
        }
        let mut channels = self.channels.write().expect("pubsub lock poisoned");
        channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

impl Default for LocalPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub for LocalPubSub {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        // A send with no subscribers is fine; the topic just has no
        // other instances attached yet.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender(channel).subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Broadcast,
    Direct,
}

/// What travels between instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Target user for direct envelopes.
    pub recipient: Option<i64>,
    /// Origin instance, for loopback suppression.
    pub instance_id: String,
    /// The serialized `{type, data}` frame, delivered verbatim.
    pub payload: String,
    pub ts: i64,
}

/// Periodic per-instance stats on the metrics channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsEnvelope {
    pub instance_id: String,
    pub connections: usize,
    pub ts: i64,
}

/// An [`EventSink`] that delivers locally and mirrors each event to the
/// cluster.
pub struct ClusterSink {
    hub: Arc<Hub>,
    pubsub: Arc<dyn PubSub>,
    instance_id: String,
    max_retries: u32,
    retry_base: Duration,
}

impl ClusterSink {
    #[must_use]
    pub fn new(
        hub: Arc<Hub>,
        pubsub: Arc<dyn PubSub>,
        instance_id: String,
        max_retries: u32,
        retry_base: Duration,
    ) -> Self {
        Self {
            hub,
            pubsub,
            instance_id,
            max_retries,
            retry_base,
        }
    }

    fn mirror(&self, kind: EnvelopeKind, recipient: Option<i64>, payload: String, channel: &'static str) {
        let envelope = Envelope {
            kind,
            recipient,
            instance_id: self.instance_id.clone(),
            payload,
            ts: Utc::now().timestamp_millis(),
        };
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to serialize cluster envelope");
                return;
            }
        };
        let pubsub = Arc::clone(&self.pubsub);
        let max_retries = self.max_retries;
        let retry_base = self.retry_base;
        tokio::spawn(async move {
            publish_with_retry(&*pubsub, channel, bytes, max_retries, retry_base).await;
        });
    }
}

impl EventSink for ClusterSink {
    fn broadcast(&self, msg: &ServerMessage) -> Result<(), SinkError> {
        let frame = serde_json::to_string(msg)?;
        self.hub.broadcast_frame(&frame);
        self.mirror(EnvelopeKind::Broadcast, None, frame, BROADCAST_CHANNEL);
        Ok(())
    }

    fn send_to_user(&self, user_id: i64, msg: &ServerMessage) -> Result<(), SinkError> {
        let frame = serde_json::to_string(msg)?;
        self.hub.send_frame_to_user(user_id, frame.clone());
        self.mirror(EnvelopeKind::Direct, Some(user_id), frame, DIRECT_CHANNEL);
        Ok(())
    }
}

/// Publishes with exponential backoff, giving up after the cap.
/// Failure here never affects local delivery.
pub async fn publish_with_retry(
    pubsub: &dyn PubSub,
    channel: &str,
    payload: Vec<u8>,
    max_retries: u32,
    retry_base: Duration,
) -> bool {
    let mut delay = retry_base;
    for attempt in 0..=max_retries {
        match pubsub.publish(channel, payload.clone()) {
            Ok(()) => return true,
            Err(err) => {
                warn!(channel, attempt, error = %err, "cluster publish failed");
                if attempt < max_retries {
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
    false
}

/// Spawns the two relay loops delivering remote envelopes into the local
/// hub, skipping our own (loopback suppression).
pub fn spawn_subscribers(
    hub: Arc<Hub>,
    pubsub: &Arc<dyn PubSub>,
    instance_id: String,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(2);
    for channel in [BROADCAST_CHANNEL, DIRECT_CHANNEL] {
        let mut rx = pubsub.subscribe(channel);
        let hub = Arc::clone(&hub);
        let instance_id = instance_id.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let bytes = match rx.recv().await {
                    Ok(bytes) => bytes,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(channel, missed, "cluster subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let envelope: Envelope = match serde_json::from_slice(&bytes) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!(channel, error = %err, "malformed cluster envelope");
                        continue;
                    }
                };
                if envelope.instance_id == instance_id {
                    continue;
                }
                debug!(channel, origin = %envelope.instance_id, "delivering remote envelope");
                match (envelope.kind, envelope.recipient) {
                    (EnvelopeKind::Broadcast, _) => hub.broadcast_frame(&envelope.payload),
                    (EnvelopeKind::Direct, Some(user_id)) => {
                        hub.send_frame_to_user(user_id, envelope.payload);
                    }
                    (EnvelopeKind::Direct, None) => {
                        warn!(channel, "direct envelope without a recipient");
                    }
                }
            }
        }));
    }
    handles
}

/// Spawns the periodic metrics publisher.
pub fn spawn_metrics_publisher(
    hub: Arc<Hub>,
    pubsub: Arc<dyn PubSub>,
    instance_id: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let metrics = MetricsEnvelope {
                instance_id: instance_id.clone(),
                connections: hub.connection_count(),
                ts: Utc::now().timestamp_millis(),
            };
            match serde_json::to_vec(&metrics) {
                Ok(bytes) => {
                    if let Err(err) = pubsub.publish(METRICS_CHANNEL, bytes) {
                        warn!(error = %err, "metrics publish failed");
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize metrics"),
            }
        }
    })
}
