//! # Broadcast Channel
//!
//! Fire-and-forget fan-out of telemetry and alerts to front-end consumers.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Topic carrying live and fallback snapshots
pub const TOPIC_TELEMETRY: &str = "telemetry";

/// Topic carrying fire alerts
pub const TOPIC_FIRE_ALERT: &str = "fire_alert";

/// Default channel depth
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// One published message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastEvent {
    pub topic: String,
    pub payload: Value,
}

/// Sink the pipeline publishes to; delivery is at most once
#[cfg_attr(test, mockall::automock)]
pub trait Broadcaster: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// Broadcaster backed by a tokio broadcast channel
///
/// Slow subscribers lag and lose events instead of holding up publishers.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, topic: &str, payload: Value) {
        let event = BroadcastEvent {
            topic: topic.to_string(),
            payload,
        };
        // An error only means nobody is listening right now
        if self.tx.send(event).is_err() {
            trace!("No subscribers for '{}'", topic);
        }
    }
}
