//! Store port for the outbox table
//!
//! The write side (enqueueing rows inside the caller's transaction) is
//! adapter-specific and lives on the concrete store types; this trait covers
//! the relay side, which is infrastructure-agnostic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::OutboxEvent;

/// Relay-facing operations over the outbox table.
///
/// Implementations must make [`claim_batch`](OutboxStore::claim_batch) safe
/// under concurrent relays: two instances may never claim the same row in
/// the same tick (Postgres uses `FOR UPDATE SKIP LOCKED`).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Claim up to `batch_size` unpublished rows, oldest first by
    /// `created_at` so per-aggregate FIFO order is preserved downstream.
    async fn claim_batch(&self, batch_size: usize) -> Result<Vec<OutboxEvent>, Self::Error>;

    /// Stamp rows delivered. Already-stamped rows are left alone. Returns
    /// how many rows were updated.
    async fn mark_published(&self, ids: &[Uuid]) -> Result<u64, Self::Error>;

    /// Count a failed publish attempt and record the error; the row stays
    /// unpublished and is picked up again on a later tick.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), Self::Error>;

    /// Rows still awaiting delivery.
    async fn pending_count(&self) -> Result<u64, Self::Error>;

    /// Purge delivered rows older than `cutoff`, for the external retention
    /// job. Must never touch unpublished rows. Returns rows removed.
    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Self::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, Self::Error>;
}
