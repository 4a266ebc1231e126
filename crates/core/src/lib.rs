//! # los-workflow-core
//!
//! Workflow substrate for the loan-origination platform, free of any
//! database or broker dependency. Persistence and transport live behind
//! ports that the `los-workflow-pg` and `los-workflow-nats` crates
//! implement.
//!
//! ## Modules
//!
//! - [`outbox`]: transactional outbox rows and the [`outbox::OutboxStore`] port
//! - [`relay`]: the publisher loop draining the outbox to the bus
//! - [`bus`]: the [`bus::EventPublisher`] port and the log-sink fallback
//! - [`event`]: wire envelope and the typed loan events the saga consumes
//! - [`saga`]: the origination saga, its store port, queries and timeline
//! - [`resilience`]: retry with backoff, circuit breaker, breaker registry
//! - [`topics`]: subject names shared by producers and consumers
//! - [`config`]: `LOS_`-prefixed environment configuration
//! - [`telemetry`]: tracing subscriber setup
//!
//! ## Usage
//!
//! ```rust
//! use los_workflow_core::outbox::NewOutboxEvent;
//! use los_workflow_core::topics::event_topics;
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! let application_id = Uuid::new_v4();
//! let event = NewOutboxEvent::new(
//!     application_id,
//!     event_topics::APPLICATION_SUBMITTED,
//!     json!({"applicationId": application_id.to_string(), "amount": 25_000}),
//! )
//! .with_correlation_id("req-42");
//!
//! assert_eq!(event.aggregate_id, application_id);
//! ```

pub mod bus;
pub mod config;
pub mod event;
pub mod outbox;
pub mod relay;
pub mod resilience;
pub mod saga;
pub mod telemetry;
pub mod topics;

pub use bus::{EventPublisher, LogPublisher, PublishError};
pub use config::{
    ConfigError, ConsumerTuning, DatabaseConfig, NatsConfig, RelayTuning, WorkflowConfig,
};
pub use event::{
    EventEnvelope, EventParseError, HEADER_AGGREGATE_ID, HEADER_CORRELATION_ID, HEADER_EVENT_ID,
    LoanEvent,
};
pub use outbox::{NewOutboxEvent, OutboxEvent, OutboxStore};
pub use relay::{
    BatchOutcome, OutboxRelay, RelayConfig, RelayError, RelayMetrics, RelayMetricsSnapshot,
};
pub use resilience::{
    Backoff, BreakerConfig, BreakerConfigError, BreakerError, BreakerRegistry, BreakerStats,
    CircuitBreaker, CircuitState, RetryError, RetryPolicy, is_transient, retry, retry_if,
};
pub use saga::{
    Decision, HandleOutcome, LoanSagaState, Page, SagaError, SagaFilter, SagaId, SagaInstance,
    SagaLogEntry, SagaOrchestrator, SagaPage, SagaStatus, SagaStore, SagaTimeline, SagaType,
    SkipKind, StepStatus, TimelineStatus, TimelineStep, TransitionApplied, TransitionRecord,
    build_timeline, decide, saga_id_for_application,
};
