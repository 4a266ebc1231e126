//! # los-workflow-pg
//!
//! PostgreSQL persistence for the workflow core: the transactional outbox
//! table and the saga instance/log tables, implementing the `OutboxStore`
//! and `SagaStore` ports from `los-workflow-core`.
//!
//! Schema management is code-first: each store exposes a `migrate` method
//! that creates its tables and indexes idempotently. Both stores share one
//! database so saga transitions can enqueue outbox rows in the same
//! transaction.

pub mod outbox_store;
pub mod saga_store;

#[cfg(test)]
mod testing;

pub use outbox_store::{PgOutboxError, PgOutboxStore};
pub use saga_store::{PgSagaError, PgSagaStore};
