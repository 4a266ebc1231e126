//! In-memory outbox store for tests.
//!
//! Thread-safe and dependency-free; rows live in a `Vec` so claim order is
//! insertion order, which stands in for the `created_at, seq` ordering the
//! PostgreSQL store provides.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use los_workflow_core::outbox::{NewOutboxEvent, OutboxEvent, OutboxStore};

/// Error type for [`MemoryOutboxStore`] operations.
///
/// The store itself never fails; the type exists to satisfy the trait and to
/// let tests inject failures through wrappers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("memory outbox error: {0}")]
pub struct MemoryOutboxError(pub String);

/// In-memory [`OutboxStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryOutboxStore {
    rows: RwLock<Vec<OutboxEvent>>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one row, the way a committed writer transaction would.
    /// Returns the stored row.
    pub fn insert(&self, event: NewOutboxEvent) -> OutboxEvent {
        let row = OutboxEvent::from(event);
        self.rows.write().push(row.clone());
        row
    }

    /// Append several rows preserving their order.
    pub fn insert_all(&self, events: impl IntoIterator<Item = NewOutboxEvent>) -> Vec<OutboxEvent> {
        events.into_iter().map(|e| self.insert(e)).collect()
    }

    /// Snapshot of every row, published or not, in insertion order.
    pub fn rows(&self) -> Vec<OutboxEvent> {
        self.rows.read().clone()
    }

    /// Rows already stamped delivered, in insertion order.
    pub fn published_rows(&self) -> Vec<OutboxEvent> {
        self.rows
            .read()
            .iter()
            .filter(|r| r.is_published())
            .cloned()
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Clear all data (useful for testing).
    pub fn clear(&self) {
        self.rows.write().clear();
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    type Error = MemoryOutboxError;

    async fn claim_batch(&self, batch_size: usize) -> Result<Vec<OutboxEvent>, Self::Error> {
        let rows = self.rows.read();
        Ok(rows
            .iter()
            .filter(|r| !r.is_published())
            .take(batch_size)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, ids: &[Uuid]) -> Result<u64, Self::Error> {
        let mut rows = self.rows.write();
        let mut updated = 0;
        for row in rows.iter_mut() {
            if ids.contains(&row.id) && !row.is_published() {
                row.published_at = Some(Utc::now());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), Self::Error> {
        let mut rows = self.rows.write();
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            row.attempts += 1;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, Self::Error> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| !r.is_published())
            .count() as u64)
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Self::Error> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|r| match r.published_at {
            Some(at) => at >= cutoff,
            None => true,
        });
        Ok((before - rows.len()) as u64)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, Self::Error> {
        Ok(self.rows.read().iter().find(|r| r.id == id).cloned())
    }
}
