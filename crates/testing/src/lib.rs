//! # los-workflow-testing
//!
//! Test doubles for the workflow substrate: in-memory [`OutboxStore`] and
//! [`SagaStore`] implementations plus publisher fakes, so relay and
//! orchestrator behavior can be exercised without Postgres or NATS.
//!
//! [`OutboxStore`]: los_workflow_core::outbox::OutboxStore
//! [`SagaStore`]: los_workflow_core::saga::SagaStore

pub mod memory_outbox;
pub mod memory_saga;
pub mod publishers;

pub use memory_outbox::MemoryOutboxStore;
pub use memory_saga::MemorySagaStore;
pub use publishers::{CapturingPublisher, FlakyPublisher, PublishedMessage};
