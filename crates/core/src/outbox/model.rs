//! Outbox event model
//!
//! Two shapes: [`NewOutboxEvent`] is what a writer hands to the store inside
//! its own transaction; [`OutboxEvent`] is the persisted row the relay works
//! with. A row exists if and only if the accompanying domain mutation
//! committed, and only the relay mutates it afterwards (to stamp delivery or
//! record a failed attempt).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::event::{EventEnvelope, HEADER_AGGREGATE_ID, HEADER_CORRELATION_ID, HEADER_EVENT_ID};

/// Event descriptor a writer enqueues in the same transaction as its domain
/// write.
///
/// All fields are caller-supplied; only `id` is generated when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    /// Business entity the event concerns; ordering/partitioning key
    pub aggregate_id: Uuid,
    /// Bus subject the row is published to
    pub topic: String,
    /// Schema identifier carried alongside the payload
    pub event_type: String,
    pub payload: Value,
    pub headers: HashMap<String, String>,
}

impl NewOutboxEvent {
    /// New event for `aggregate_id` on `topic`, with a generated id and the
    /// event type defaulting to the topic name.
    pub fn new(aggregate_id: Uuid, topic: impl Into<String>, payload: Value) -> Self {
        let topic = topic.into();
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            event_type: topic.clone(),
            topic,
            payload,
            headers: HashMap::new(),
        }
    }

    /// Use a caller-supplied id instead of a generated one.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Override the schema identifier.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Attach the correlation id propagated across services.
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_header(HEADER_CORRELATION_ID, correlation_id)
    }
}

/// Persisted outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub headers: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// Null until the relay delivered the row
    pub published_at: Option<DateTime<Utc>>,
    /// Failed publish attempts so far
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// True when at least one publish attempt failed before.
    pub fn has_failed_attempts(&self) -> bool {
        self.last_error.is_some()
    }

    /// Time the row has spent in the table.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Wire envelope for this row, with id/aggregate/correlation metadata
    /// copied into the headers for consumers that only see headers.
    pub fn to_envelope(&self) -> EventEnvelope {
        let mut headers = self.headers.clone();
        headers.insert(HEADER_EVENT_ID.to_string(), self.id.to_string());
        headers.insert(
            HEADER_AGGREGATE_ID.to_string(),
            self.aggregate_id.to_string(),
        );

        EventEnvelope {
            event_id: self.id,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            headers,
            occurred_at: self.created_at,
        }
    }
}

impl From<NewOutboxEvent> for OutboxEvent {
    /// Freshly inserted row as the store reports it back.
    fn from(event: NewOutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            topic: event.topic,
            event_type: event.event_type,
            payload: event.payload,
            headers: event.headers,
            created_at: Utc::now(),
            published_at: None,
            attempts: 0,
            last_error: None,
        }
    }
}
