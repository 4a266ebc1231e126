//! NATS connection and stream bootstrap
//!
//! One [`NatsBus`] per process. It owns the client connection and the
//! JetStream context, and knows how to materialize the `LOS_EVENTS` stream
//! that carries every loan-origination subject. Publisher and consumer are
//! built from it.

use std::time::Duration;

use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::stream::{Config as StreamConfig, Stream as StreamHandle};
use async_nats::{Client, ConnectOptions};
use tracing::{debug, info};

use los_workflow_core::config::NatsConfig;
use los_workflow_core::topics::{ALL_TOPICS, EVENTS_STREAM_NAME};

use crate::publisher::NatsEventPublisher;

#[derive(Debug, thiserror::Error)]
pub enum NatsError {
    #[error("failed to connect to NATS: {0}")]
    Connect(String),

    #[error("stream setup failed: {0}")]
    Stream(String),

    #[error("consumer setup failed: {0}")]
    Consumer(String),
}

/// Connected NATS client plus its JetStream context.
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: JetStreamContext,
}

impl NatsBus {
    /// Connect using the process configuration. Multiple URLs are passed to
    /// the client as a fallback list.
    pub async fn connect(config: &NatsConfig) -> Result<Self, NatsError> {
        let options = ConnectOptions::default()
            .connection_timeout(config.timeout())
            .request_timeout(Some(config.timeout()))
            .name("los-workflow");

        let client = async_nats::connect_with_options(config.urls.join(","), options)
            .await
            .map_err(|e| NatsError::Connect(e.to_string()))?;
        let jetstream = async_nats::jetstream::new(client.clone());

        info!(urls = ?config.urls, "connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Get or create the `LOS_EVENTS` stream over the `los.>` subject space.
    ///
    /// Retention stays on limits so the orchestrator intake and any number
    /// of downstream command consumers can read the same stream.
    pub async fn ensure_event_stream(&self) -> Result<StreamHandle, NatsError> {
        if let Ok(stream) = self.jetstream.get_stream(EVENTS_STREAM_NAME).await {
            debug!(stream = EVENTS_STREAM_NAME, "stream already exists");
            return Ok(stream);
        }

        info!(
            stream = EVENTS_STREAM_NAME,
            subjects = ALL_TOPICS,
            "creating stream"
        );
        let config = StreamConfig {
            name: EVENTS_STREAM_NAME.to_string(),
            subjects: vec![ALL_TOPICS.to_string()],
            description: Some("Loan-origination events and commands".to_string()),
            max_messages: 1_000_000,
            max_bytes: 1024 * 1024 * 1024,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            storage: async_nats::jetstream::stream::StorageType::File,
            num_replicas: 1,
            ..Default::default()
        };

        self.jetstream
            .create_stream(config)
            .await
            .map_err(|e| NatsError::Stream(e.to_string()))
    }

    /// Publisher handle sharing this connection.
    pub fn publisher(&self) -> NatsEventPublisher {
        NatsEventPublisher::new(self.jetstream.clone())
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}
