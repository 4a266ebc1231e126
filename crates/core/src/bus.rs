//! Message bus abstraction
//!
//! The relay hands every outbox row to an [`EventPublisher`]; a broker
//! adapter or the local log sink plugs in behind the trait, chosen by
//! configuration at composition time and invisible to everything else.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::event::EventEnvelope;

/// Producer side of the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver `envelope` on `topic`, keyed by `key` so the bus preserves
    /// per-aggregate ordering. Must return `Ok` only once the bus has
    /// accepted the message.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError>;
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("bus transport error: {0}")]
    Transport(String),

    #[error("bus did not acknowledge the message: {0}")]
    NotAcknowledged(String),
}

/// Development sink used when no broker is configured.
///
/// Logs the event and reports success, so rows still get stamped delivered
/// and the production code path stays exercised without a bus.
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        info!(
            topic = topic,
            key = key,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            "outbox event (log sink)"
        );
        Ok(())
    }
}
