//! # los-workflow-nats
//!
//! NATS JetStream adapter for the workflow substrate. Provides the
//! connected handle ([`NatsBus`]), the [`EventPublisher`] implementation
//! the outbox relay drains into, and the durable pull consumer that feeds
//! stream messages to the saga orchestrator.
//!
//! All traffic goes through a single `LOS_EVENTS` stream bound to the
//! `los.>` subject space, so events and commands share one durable log.
//!
//! [`EventPublisher`]: los_workflow_core::bus::EventPublisher

pub mod bus;
pub mod consumer;
pub mod publisher;

pub use bus::{NatsBus, NatsError};
pub use consumer::spawn_orchestrator_consumer;
pub use publisher::NatsEventPublisher;
