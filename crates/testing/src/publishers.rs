//! Publisher doubles for relay and pipeline tests.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use los_workflow_core::bus::{EventPublisher, PublishError};
use los_workflow_core::event::EventEnvelope;

/// One message as a publisher saw it.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub envelope: EventEnvelope,
}

/// Publisher that accepts everything and remembers it in arrival order.
#[derive(Debug, Default)]
pub struct CapturingPublisher {
    messages: RwLock<Vec<PublishedMessage>>,
}

impl CapturingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.read().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages.read().iter().map(|m| m.topic.clone()).collect()
    }

    /// Partition keys in publish order, one per message.
    pub fn keys(&self) -> Vec<String> {
        self.messages.read().iter().map(|m| m.key.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.messages.read().len()
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        self.messages.write().push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            envelope: envelope.clone(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FlakyInner {
    failures_remaining: u32,
    attempts: u32,
    delivered: Vec<PublishedMessage>,
}

/// Publisher that fails its first N attempts with a transport error, then
/// delivers everything. Models a broker outage that heals.
#[derive(Debug, Default)]
pub struct FlakyPublisher {
    inner: Mutex<FlakyInner>,
}

impl FlakyPublisher {
    /// Fail the first `failures` publish attempts.
    pub fn failing(failures: u32) -> Self {
        Self {
            inner: Mutex::new(FlakyInner {
                failures_remaining: failures,
                ..Default::default()
            }),
        }
    }

    /// Total attempts seen, failed and delivered.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Messages that made it through, in delivery order.
    pub fn delivered(&self) -> Vec<PublishedMessage> {
        self.inner.lock().delivered.clone()
    }

    pub fn delivered_topics(&self) -> Vec<String> {
        self.inner
            .lock()
            .delivered
            .iter()
            .map(|m| m.topic.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for FlakyPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        let mut inner = self.inner.lock();
        inner.attempts += 1;
        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            return Err(PublishError::Transport(
                "injected transport failure".to_string(),
            ));
        }
        inner.delivered.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            envelope: envelope.clone(),
        });
        Ok(())
    }
}
