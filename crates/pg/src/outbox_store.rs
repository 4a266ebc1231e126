//! PostgreSQL outbox store
//!
//! One table, `outbox_events`. A row is pending while `published_at` is
//! null. Writers insert through the caller's open transaction so the row
//! commits or rolls back together with the domain write. The relay claims
//! pending rows oldest-first with `FOR UPDATE SKIP LOCKED`, so overlapping
//! claimers never pick the same row.
//!
//! `seq` breaks `created_at` ties: rows inserted in one transaction share
//! the transaction timestamp, and per-aggregate ordering must survive that.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{FromRow, PgTransaction};
use tracing::debug;
use uuid::Uuid;

use los_workflow_core::outbox::{NewOutboxEvent, OutboxEvent, OutboxStore};

#[derive(Debug, thiserror::Error)]
pub enum PgOutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(FromRow)]
struct OutboxRow {
    id: Uuid,
    aggregate_id: Uuid,
    topic: String,
    event_type: String,
    payload: Json<Value>,
    headers: Json<HashMap<String, String>>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    attempts: i32,
    last_error: Option<String>,
}

impl From<OutboxRow> for OutboxEvent {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            topic: row.topic,
            event_type: row.event_type,
            payload: row.payload.0,
            headers: row.headers.0,
            created_at: row.created_at,
            published_at: row.published_at,
            attempts: row.attempts,
            last_error: row.last_error,
        }
    }
}

const SELECT_COLUMNS: &str = "id, aggregate_id, topic, event_type, payload, headers, \
     created_at, published_at, attempts, last_error";

// ============================================================================
// Store
// ============================================================================

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the outbox table and its pending-rows index.
    pub async fn migrate(&self) -> Result<(), PgOutboxError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id UUID PRIMARY KEY,
                seq BIGSERIAL,
                aggregate_id UUID NOT NULL,
                topic VARCHAR(200) NOT NULL,
                event_type VARCHAR(200) NOT NULL,
                payload JSONB NOT NULL,
                headers JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                published_at TIMESTAMPTZ,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON outbox_events (created_at, seq)
            WHERE published_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Enqueue events inside the caller's transaction. This is the outbox
    /// writer entry point: the rows become visible if and only if the
    /// caller's domain write commits.
    pub async fn insert_with_tx(
        tx: &mut PgTransaction<'_>,
        events: &[NewOutboxEvent],
    ) -> Result<(), PgOutboxError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO outbox_events (id, aggregate_id, topic, event_type, payload, headers) ",
        );
        query_builder.push_values(events, |mut b, event| {
            b.push_bind(event.id);
            b.push_bind(event.aggregate_id);
            b.push_bind(&event.topic);
            b.push_bind(&event.event_type);
            b.push_bind(Json(&event.payload));
            b.push_bind(Json(&event.headers));
        });
        query_builder.build().execute(&mut **tx).await?;

        debug!(count = events.len(), "enqueued outbox events");
        Ok(())
    }

    /// One-shot enqueue in its own transaction, for callers without a
    /// surrounding domain write.
    pub async fn enqueue(&self, events: &[NewOutboxEvent]) -> Result<(), PgOutboxError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_with_tx(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    type Error = PgOutboxError;

    async fn claim_batch(&self, batch_size: usize) -> Result<Vec<OutboxEvent>, Self::Error> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM outbox_events
            WHERE published_at IS NULL
            ORDER BY created_at ASC, seq ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_published(&self, ids: &[Uuid]) -> Result<u64, Self::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET published_at = NOW()
            WHERE id = ANY($1) AND published_at IS NULL
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, Self::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Self::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE published_at IS NOT NULL AND published_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, Self::Error> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OutboxEvent::from))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fresh_test_pool;
    use los_workflow_core::topics::event_topics;
    use serde_json::json;

    async fn store() -> PgOutboxStore {
        let pool = fresh_test_pool("los_outbox_test").await;
        let store = PgOutboxStore::new(pool);
        store.migrate().await.expect("migrate outbox");
        store
    }

    fn submitted(aggregate_id: Uuid) -> NewOutboxEvent {
        NewOutboxEvent::new(
            aggregate_id,
            event_topics::APPLICATION_SUBMITTED,
            json!({"applicationId": aggregate_id.to_string()}),
        )
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_insert_and_claim_oldest_first() {
        let store = store().await;
        let aggregate = Uuid::new_v4();

        let first = submitted(aggregate);
        let second = submitted(aggregate);
        let mut tx = store.pool.begin().await.unwrap();
        PgOutboxStore::insert_with_tx(&mut tx, &[first.clone(), second.clone()])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let claimed = store.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        // Same created_at inside one transaction; seq must keep insert order
        assert_eq!(claimed[0].id, first.id);
        assert_eq!(claimed[1].id, second.id);
        assert_eq!(store.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_rolled_back_insert_leaves_no_row() {
        let store = store().await;

        let event = submitted(Uuid::new_v4());
        let mut tx = store.pool.begin().await.unwrap();
        PgOutboxStore::insert_with_tx(&mut tx, &[event.clone()])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.find_by_id(event.id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_mark_published_removes_from_pending() {
        let store = store().await;
        let event = submitted(Uuid::new_v4());
        store.enqueue(&[event.clone()]).await.unwrap();

        let updated = store.mark_published(&[event.id]).await.unwrap();
        assert_eq!(updated, 1);

        assert!(store.claim_batch(10).await.unwrap().is_empty());
        let row = store.find_by_id(event.id).await.unwrap().unwrap();
        assert!(row.is_published());

        // Marking again is a no-op
        assert_eq!(store.mark_published(&[event.id]).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_mark_failed_keeps_row_queued() {
        let store = store().await;
        let event = submitted(Uuid::new_v4());
        store.enqueue(&[event.clone()]).await.unwrap();

        store.mark_failed(event.id, "connection refused").await.unwrap();
        store.mark_failed(event.id, "connection refused").await.unwrap();

        let claimed = store.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 2);
        assert_eq!(claimed[0].last_error.as_deref(), Some("connection refused"));
        assert!(!claimed[0].is_published());
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_cleanup_only_touches_published_rows() {
        let store = store().await;
        let published = submitted(Uuid::new_v4());
        let pending = submitted(Uuid::new_v4());
        store
            .enqueue(&[published.clone(), pending.clone()])
            .await
            .unwrap();
        store.mark_published(&[published.id]).await.unwrap();

        let deleted = store
            .delete_published_before(Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        assert!(store.find_by_id(published.id).await.unwrap().is_none());
        assert!(store.find_by_id(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_headers_and_payload_round_trip() {
        let store = store().await;
        let event = submitted(Uuid::new_v4()).with_correlation_id("corr-3");
        store.enqueue(&[event.clone()]).await.unwrap();

        let row = store.find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(row.payload, event.payload);
        assert_eq!(row.headers, event.headers);
        assert_eq!(row.topic, event.topic);
    }
}
