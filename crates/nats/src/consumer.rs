//! Orchestrator event intake
//!
//! A durable pull consumer over the `LOS_EVENTS` stream feeding every
//! message to the saga orchestrator. Ack discipline carries the delivery
//! semantics:
//!
//! - Every decided outcome is acked, including replays, anomalies and
//!   unrecognized subjects. Redelivering those could never change the
//!   answer; the orchestrator already wrote whatever audit trail applies.
//! - A store error leaves the message unacked. The server redelivers it
//!   after `ack_wait`, up to `max_deliver` times, which is the retry path
//!   for transient database trouble.
//! - Undecodable payloads are acked and dropped with a warning; they would
//!   poison the queue forever otherwise.

use std::sync::Arc;

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use los_workflow_core::config::ConsumerTuning;
use los_workflow_core::event::EventEnvelope;
use los_workflow_core::saga::{SagaOrchestrator, SagaStore};

use crate::bus::{NatsBus, NatsError};

fn consumer_config(tuning: &ConsumerTuning) -> PullConfig {
    PullConfig {
        durable_name: Some(tuning.durable_name.clone()),
        deliver_policy: DeliverPolicy::All,
        ack_policy: AckPolicy::Explicit,
        ack_wait: tuning.ack_wait(),
        max_deliver: tuning.max_deliver,
        max_ack_pending: 1000,
        ..Default::default()
    }
}

/// Create the durable consumer and spawn the intake loop. The task runs
/// until the shutdown channel fires or the message stream ends.
pub async fn spawn_orchestrator_consumer<S>(
    bus: &NatsBus,
    tuning: &ConsumerTuning,
    orchestrator: Arc<SagaOrchestrator<S>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>, NatsError>
where
    S: SagaStore + 'static,
{
    let stream = bus.ensure_event_stream().await?;

    let consumer = stream
        .get_or_create_consumer(&tuning.durable_name, consumer_config(tuning))
        .await
        .map_err(|e| NatsError::Consumer(e.to_string()))?;

    let mut messages = consumer
        .messages()
        .await
        .map_err(|e| NatsError::Consumer(e.to_string()))?;

    let durable = tuning.durable_name.clone();
    let handle = tokio::spawn(async move {
        info!(consumer = %durable, "orchestrator consumer started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(consumer = %durable, "orchestrator consumer stopping");
                    break;
                }
                next = messages.next() => {
                    let Some(result) = next else {
                        warn!(consumer = %durable, "message stream ended");
                        break;
                    };
                    match result {
                        Ok(message) => handle_message(&orchestrator, message).await,
                        Err(e) => {
                            warn!(consumer = %durable, error = %e, "error receiving message");
                        }
                    }
                }
            }
        }
    });

    Ok(handle)
}

async fn handle_message<S: SagaStore>(
    orchestrator: &SagaOrchestrator<S>,
    message: jetstream::Message,
) {
    let envelope: EventEnvelope = match serde_json::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(
                subject = %message.subject,
                error = %e,
                "dropping undecodable message"
            );
            ack(&message).await;
            return;
        }
    };

    match orchestrator.handle_envelope(&envelope).await {
        Ok(outcome) => {
            debug!(
                event_id = %envelope.event_id,
                outcome = ?outcome,
                "envelope processed"
            );
            ack(&message).await;
        }
        Err(e) => {
            // Unacked on purpose: ack_wait expiry redelivers the message
            error!(
                event_id = %envelope.event_id,
                error = %e,
                "envelope handling failed, leaving for redelivery"
            );
        }
    }
}

async fn ack(message: &jetstream::Message) {
    if let Err(e) = message.ack().await {
        warn!(error = %e, "failed to ack message");
    }
}
