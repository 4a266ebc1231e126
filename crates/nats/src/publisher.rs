//! JetStream-backed [`EventPublisher`]
//!
//! Publishes the JSON envelope to its topic subject and waits for the
//! JetStream ack, so `Ok` really means the broker stored the message. The
//! relay drains rows one at a time, which together with the stream's
//! arrival order preserves per-aggregate FIFO on the wire.

use async_nats::jetstream::Context as JetStreamContext;
use async_trait::async_trait;
use tracing::debug;

use los_workflow_core::bus::{EventPublisher, PublishError};
use los_workflow_core::event::EventEnvelope;

#[derive(Clone)]
pub struct NatsEventPublisher {
    jetstream: JetStreamContext,
}

impl NatsEventPublisher {
    pub fn new(jetstream: JetStreamContext) -> Self {
        Self { jetstream }
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(envelope)?;

        let ack = self
            .jetstream
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        // The ack confirms the stream persisted the message
        ack.await
            .map_err(|e| PublishError::NotAcknowledged(e.to_string()))?;

        debug!(
            topic = topic,
            key = key,
            event_id = %envelope.event_id,
            "event published"
        );
        Ok(())
    }
}
