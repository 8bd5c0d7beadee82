//! In-process, topic-based publish/subscribe bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber of a topic receives every message without any single
//! subscriber blocking the others.  Topics are created lazily the first time
//! they are published to or subscribed to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use ackmux_types::{AckermannDrive, MuxError};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered messages before old ones
/// are dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Payloads carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusMessage {
    /// A drive command, published by velocity producers and on the output
    /// topic.
    Drive(AckermannDrive),
    /// A lock flag, published by lock producers.
    Lock(bool),
}

/// Shared topic bus.  Clone it cheaply – all clones share the same
/// underlying channels.
#[derive(Clone, Debug)]
pub struct TopicBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<BusMessage>>>>,
    capacity: usize,
}

impl TopicBus {
    /// Create a new bus.  `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Publish `message` on `topic`.
    ///
    /// Returns the number of subscribers that were handed the message.
    ///
    /// # Errors
    ///
    /// [`MuxError::Channel`] when nobody is subscribed to `topic`.
    pub fn publish(&self, topic: &str, message: BusMessage) -> Result<usize, MuxError> {
        self.sender(topic)
            .send(message)
            .map_err(|_| MuxError::Channel(format!("no subscribers for topic '{topic}'")))
    }

    /// Subscribe to `topic`.  Only messages published after this call are
    /// delivered.
    pub fn subscribe(&self, topic: &str) -> TopicReceiver {
        TopicReceiver {
            topic: topic.to_string(),
            receiver: self.sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.sender(topic).receiver_count()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single topic.
///
/// Obtained via [`TopicBus::subscribe`].
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl TopicReceiver {
    /// Wait for the next message on this topic.
    ///
    /// A receiver that fell behind logs how many messages it lost and keeps
    /// going.  Returns `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "topic receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = TopicBus::default();
        let mut rx = bus.subscribe("nav_vel");

        let message = BusMessage::Drive(AckermannDrive::new(1.0, 0.1));
        assert_eq!(bus.publish("nav_vel", message.clone())?, 1);

        assert_eq!(rx.recv().await, Some(message));
        assert_eq!(rx.topic(), "nav_vel");
        Ok(())
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_message() -> Result<(), Box<dyn std::error::Error>> {
        let bus = TopicBus::default();
        let mut rx1 = bus.subscribe("e_stop");
        let mut rx2 = bus.clone().subscribe("e_stop");

        bus.publish("e_stop", BusMessage::Lock(true))?;

        assert_eq!(rx1.recv().await, Some(BusMessage::Lock(true)));
        assert_eq!(rx2.recv().await, Some(BusMessage::Lock(true)));
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = TopicBus::default();
        let result = bus.publish("nobody", BusMessage::Lock(false));
        assert!(matches!(result, Err(MuxError::Channel(_))));
    }

    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = TopicBus::default();
        let mut joy = bus.subscribe("joy_vel");
        let _nav = bus.subscribe("nav_vel");

        bus.publish("nav_vel", BusMessage::Drive(AckermannDrive::default()))?;

        let result = tokio::time::timeout(Duration::from_millis(50), joy.recv()).await;
        assert!(result.is_err(), "joy_vel must not see nav_vel traffic");
        Ok(())
    }

    #[tokio::test]
    async fn slow_receiver_skips_lagged_messages() {
        let bus = TopicBus::new(4);
        let mut slow = bus.subscribe("flood");

        for i in 0..100 {
            let _ = bus.publish("flood", BusMessage::Drive(AckermannDrive::new(i as f32, 0.0)));
        }

        // Lag is logged and swallowed; the oldest retained message comes next.
        let next = slow.recv().await;
        assert_eq!(next, Some(BusMessage::Drive(AckermannDrive::new(96.0, 0.0))));
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = TopicBus::default();
        assert_eq!(bus.subscriber_count("cmd_vel_out"), 0);
        let rx = bus.subscribe("cmd_vel_out");
        assert_eq!(bus.subscriber_count("cmd_vel_out"), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count("cmd_vel_out"), 0);
    }

    #[test]
    fn messages_serialize_as_tagged_json() {
        let json = serde_json::to_string(&BusMessage::Lock(true)).unwrap();
        assert_eq!(json, r#"{"lock":true}"#);

        let back: BusMessage = serde_json::from_str(r#"{"drive":{"speed":2.0}}"#).unwrap();
        assert_eq!(back, BusMessage::Drive(AckermannDrive::new(2.0, 0.0)));
    }
}
