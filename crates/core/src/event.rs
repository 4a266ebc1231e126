//! Wire envelope and the typed view of inbound saga events
//!
//! The relay wraps every outbox row in an [`EventEnvelope`] before it goes to
//! the bus; the orchestrator intake decodes the same envelope back. Keeping
//! one struct for both directions prevents producer/consumer drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::topics::event_topics;

/// Header carrying the correlation id across service boundaries
pub const HEADER_CORRELATION_ID: &str = "correlationId";
/// Header carrying the originating outbox event id (consumer dedup hook)
pub const HEADER_EVENT_ID: &str = "eventId";
/// Header carrying the partition key used at the bus
pub const HEADER_AGGREGATE_ID: &str = "aggregateId";

/// JSON envelope for every message the substrate puts on the bus.
///
/// `event_id` is the outbox row id, so redelivered messages can be
/// deduplicated downstream without a wire change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    /// Business entity the event concerns; ordering/partitioning key
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Correlation id propagated by the original writer, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(HEADER_CORRELATION_ID).map(String::as_str)
    }
}

/// Inbound events the orchestrator reacts to, decoded from an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum LoanEvent {
    /// Saga trigger: creates the instance
    ApplicationSubmitted {
        application_id: Uuid,
        payload: Value,
    },
    KycCompleted {
        application_id: Uuid,
        payload: Value,
    },
    /// Carries the underwriting verdict; `APPROVED` selects the sanction path
    DecisionMade {
        application_id: Uuid,
        final_decision: Option<String>,
        payload: Value,
    },
}

impl LoanEvent {
    /// Decode an envelope into a typed event.
    ///
    /// Unrecognized event types (e.g. command subjects sharing the stream)
    /// and malformed payloads are distinct errors so the intake can skip the
    /// former quietly and log the latter loudly.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, EventParseError> {
        match envelope.event_type.as_str() {
            event_topics::APPLICATION_SUBMITTED => Ok(Self::ApplicationSubmitted {
                application_id: application_id_from(&envelope.payload, &envelope.event_type)?,
                payload: envelope.payload.clone(),
            }),
            event_topics::KYC_COMPLETED => Ok(Self::KycCompleted {
                application_id: application_id_from(&envelope.payload, &envelope.event_type)?,
                payload: envelope.payload.clone(),
            }),
            event_topics::DECISION_MADE => Ok(Self::DecisionMade {
                application_id: application_id_from(&envelope.payload, &envelope.event_type)?,
                final_decision: envelope
                    .payload
                    .get("finalDecision")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                payload: envelope.payload.clone(),
            }),
            other => Err(EventParseError::UnknownType(other.to_string())),
        }
    }

    /// Application this event belongs to.
    pub fn application_id(&self) -> Uuid {
        match self {
            Self::ApplicationSubmitted { application_id, .. }
            | Self::KycCompleted { application_id, .. }
            | Self::DecisionMade { application_id, .. } => *application_id,
        }
    }

    /// Step name recorded in the saga log for this event.
    pub fn step_name(&self) -> &'static str {
        match self {
            Self::ApplicationSubmitted { .. } => "ApplicationSubmitted",
            Self::KycCompleted { .. } => "KycCompleted",
            Self::DecisionMade { .. } => "DecisionMade",
        }
    }

    /// Raw payload snapshot, stored verbatim in the saga log.
    pub fn payload(&self) -> &Value {
        match self {
            Self::ApplicationSubmitted { payload, .. }
            | Self::KycCompleted { payload, .. }
            | Self::DecisionMade { payload, .. } => payload,
        }
    }
}

fn application_id_from(payload: &Value, event_type: &str) -> Result<Uuid, EventParseError> {
    let raw = payload
        .get("applicationId")
        .and_then(Value::as_str)
        .ok_or_else(|| EventParseError::MissingField {
            event_type: event_type.to_string(),
            field: "applicationId",
        })?;

    Uuid::parse_str(raw).map_err(|e| EventParseError::InvalidPayload {
        event_type: event_type.to_string(),
        reason: format!("applicationId is not a UUID: {}", e),
    })
}

/// Why an envelope could not be turned into a [`LoanEvent`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventParseError {
    #[error("unrecognized event type: {0}")]
    UnknownType(String),

    #[error("event {event_type} is missing required field '{field}'")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },
}

impl EventParseError {
    /// True when the type simply is not one the orchestrator handles.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}
