//! Transactional outbox: event model and store port
//!
//! A domain write and the event it must eventually publish are recorded in
//! one database transaction; the relay (see [`crate::relay`]) drains the
//! table afterwards. This module holds the event model and the store trait
//! the adapters implement.

pub mod model;
pub mod store;

pub use model::{NewOutboxEvent, OutboxEvent};
pub use store::OutboxStore;
