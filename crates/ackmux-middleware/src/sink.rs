//! [`BusSink`] – publishes forwarded commands on the output topic.

use ackmux_core::OutputSink;
use ackmux_types::{AckermannDrive, MuxError};
use tracing::trace;

use crate::bus::{BusMessage, TopicBus};

/// [`OutputSink`] that re-emits every authorized command on one bus topic.
///
/// Nobody listening on the output topic is not a failure of arbitration;
/// the command is dropped and logged at `trace` level.
#[derive(Debug, Clone)]
pub struct BusSink {
    bus: TopicBus,
    topic: String,
}

impl BusSink {
    pub fn new(bus: TopicBus, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl OutputSink for BusSink {
    fn forward(&mut self, command: &AckermannDrive) -> Result<(), MuxError> {
        match self.bus.publish(&self.topic, BusMessage::Drive(*command)) {
            Ok(_) => Ok(()),
            Err(MuxError::Channel(reason)) => {
                trace!(topic = %self.topic, %reason, "output dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
