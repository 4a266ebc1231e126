//! PostgreSQL saga store
//!
//! Two tables. `saga_instances` holds the current position of every
//! application, one row each, keyed by the deterministic saga id.
//! `saga_log` is the append-only history. [`record_transition`] is the
//! heart of it: instance write, log entry and outbox command rows go
//! through one transaction, with the instance update guarded by a
//! compare-and-set on the expected state. A guard miss rolls the whole
//! transaction back and reports a conflict, so a racing handler can never
//! double-apply a step or re-emit its commands.
//!
//! [`record_transition`]: SagaStore::record_transition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use los_workflow_core::saga::{
    LoanSagaState, Page, SagaFilter, SagaId, SagaInstance, SagaLogEntry, SagaPage, SagaStore,
    SagaType, StepStatus, TransitionApplied, TransitionRecord,
};

use crate::outbox_store::{PgOutboxError, PgOutboxStore};

#[derive(Debug, thiserror::Error)]
pub enum PgSagaError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt {column} in saga row: {value}")]
    Corrupt {
        column: &'static str,
        value: String,
    },
}

impl From<PgOutboxError> for PgSagaError {
    fn from(err: PgOutboxError) -> Self {
        match err {
            PgOutboxError::Database(e) => Self::Database(e),
        }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(FromRow)]
struct InstanceRow {
    saga_id: Uuid,
    application_id: Uuid,
    saga_type: String,
    state: String,
    current_step: String,
    step_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl TryFrom<InstanceRow> for SagaInstance {
    type Error = PgSagaError;

    fn try_from(row: InstanceRow) -> Result<Self, PgSagaError> {
        let saga_type = SagaType::parse(&row.saga_type).ok_or_else(|| PgSagaError::Corrupt {
            column: "saga_type",
            value: row.saga_type.clone(),
        })?;
        let state = LoanSagaState::parse(&row.state).ok_or_else(|| PgSagaError::Corrupt {
            column: "state",
            value: row.state.clone(),
        })?;
        let step_status =
            StepStatus::parse(&row.step_status).ok_or_else(|| PgSagaError::Corrupt {
                column: "step_status",
                value: row.step_status.clone(),
            })?;

        Ok(Self {
            saga_id: SagaId::from_uuid(row.saga_id),
            application_id: row.application_id,
            saga_type,
            state,
            current_step: row.current_step,
            step_status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            error_message: row.error_message,
        })
    }
}

#[derive(FromRow)]
struct LogRow {
    id: Uuid,
    saga_id: Uuid,
    step: String,
    detail: Json<Value>,
    step_status: String,
    duration_ms: Option<i64>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for SagaLogEntry {
    type Error = PgSagaError;

    fn try_from(row: LogRow) -> Result<Self, PgSagaError> {
        let step_status =
            StepStatus::parse(&row.step_status).ok_or_else(|| PgSagaError::Corrupt {
                column: "step_status",
                value: row.step_status.clone(),
            })?;

        Ok(Self {
            id: row.id,
            saga_id: SagaId::from_uuid(row.saga_id),
            step: row.step,
            detail: row.detail.0,
            step_status,
            duration_ms: row.duration_ms,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

const INSTANCE_COLUMNS: &str = "saga_id, application_id, saga_type, state, current_step, \
     step_status, created_at, updated_at, completed_at, failed_at, error_message";

const LOG_COLUMNS: &str =
    "id, saga_id, step, detail, step_status, duration_ms, error_message, created_at";

async fn insert_log(
    executor: impl sqlx::PgExecutor<'_>,
    entry: &SagaLogEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO saga_log
            (id, saga_id, step, detail, step_status, duration_ms, error_message, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.saga_id.into_uuid())
    .bind(&entry.step)
    .bind(Json(&entry.detail))
    .bind(entry.step_status.as_str())
    .bind(entry.duration_ms)
    .bind(entry.error_message.as_deref())
    .bind(entry.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

// ============================================================================
// Store
// ============================================================================

pub struct PgSagaStore {
    pool: PgPool,
}

impl PgSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the saga tables and their indexes. Transitions also write to
    /// `outbox_events`, so run [`PgOutboxStore::migrate`] on the same
    /// database as well.
    pub async fn migrate(&self) -> Result<(), PgSagaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saga_instances (
                saga_id UUID PRIMARY KEY,
                application_id UUID NOT NULL,
                saga_type VARCHAR(50) NOT NULL,
                state VARCHAR(50) NOT NULL,
                current_step VARCHAR(200) NOT NULL,
                step_status VARCHAR(20) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                failed_at TIMESTAMPTZ,
                error_message TEXT,
                UNIQUE (application_id, saga_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_saga_instances_state ON saga_instances (state)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_saga_instances_created_at \
             ON saga_instances (created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saga_log (
                id UUID PRIMARY KEY,
                seq BIGSERIAL,
                saga_id UUID NOT NULL,
                step VARCHAR(200) NOT NULL,
                detail JSONB NOT NULL,
                step_status VARCHAR(20) NOT NULL,
                duration_ms BIGINT,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_saga_log_saga_id \
             ON saga_log (saga_id, created_at, seq)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SagaStore for PgSagaStore {
    type Error = PgSagaError;

    async fn find_by_application_id(
        &self,
        application_id: Uuid,
    ) -> Result<Option<SagaInstance>, Self::Error> {
        let row: Option<InstanceRow> = sqlx::query_as(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM saga_instances
            WHERE application_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SagaInstance::try_from).transpose()
    }

    async fn record_transition(
        &self,
        record: TransitionRecord,
    ) -> Result<TransitionApplied, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let stored = match record.expected_state {
            // Create: the saga id is deterministic per application, so a
            // concurrent create collides on the primary key and loses here.
            None => {
                let instance = record.to_new_instance();
                let result = sqlx::query(
                    r#"
                    INSERT INTO saga_instances
                        (saga_id, application_id, saga_type, state, current_step,
                         step_status, created_at, updated_at, completed_at, failed_at,
                         error_message)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(instance.saga_id.into_uuid())
                .bind(instance.application_id)
                .bind(instance.saga_type.as_str())
                .bind(instance.state.as_str())
                .bind(&instance.current_step)
                .bind(instance.step_status.as_str())
                .bind(instance.created_at)
                .bind(instance.updated_at)
                .bind(instance.completed_at)
                .bind(instance.failed_at)
                .bind(instance.error_message.as_deref())
                .execute(&mut *tx)
                .await?;
                result.rows_affected() == 1
            }
            // Advance: compare-and-set on the state the decision was made
            // against. Zero rows means a racer moved the instance first.
            Some(expected) => {
                let result = sqlx::query(
                    r#"
                    UPDATE saga_instances
                    SET state = $1,
                        current_step = $2,
                        step_status = $3,
                        updated_at = NOW(),
                        error_message = $4,
                        completed_at = CASE WHEN $5 THEN NOW() ELSE completed_at END
                    WHERE saga_id = $6 AND state = $7
                    "#,
                )
                .bind(record.new_state.as_str())
                .bind(&record.step)
                .bind(record.log.step_status.as_str())
                .bind(record.log.error_message.as_deref())
                .bind(record.new_state.is_terminal())
                .bind(record.saga_id.into_uuid())
                .bind(expected.as_str())
                .execute(&mut *tx)
                .await?;
                result.rows_affected() == 1
            }
        };

        if !stored {
            tx.rollback().await?;
            debug!(
                saga_id = %record.saga_id,
                step = %record.step,
                "transition lost the write race"
            );
            return Ok(TransitionApplied::Conflict);
        }

        insert_log(&mut *tx, &record.log).await?;
        PgOutboxStore::insert_with_tx(&mut tx, &record.commands).await?;
        tx.commit().await?;

        debug!(
            saga_id = %record.saga_id,
            state = %record.new_state,
            commands = record.commands.len(),
            "saga transition recorded"
        );
        Ok(TransitionApplied::Applied)
    }

    async fn append_log(&self, entry: SagaLogEntry) -> Result<(), Self::Error> {
        insert_log(&self.pool, &entry).await?;
        Ok(())
    }

    async fn fetch_log(&self, saga_id: SagaId) -> Result<Vec<SagaLogEntry>, Self::Error> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM saga_log
            WHERE saga_id = $1
            ORDER BY created_at ASC, seq ASC
            "#
        ))
        .bind(saga_id.into_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SagaLogEntry::try_from).collect()
    }

    async fn list(&self, filter: &SagaFilter, page: &Page) -> Result<SagaPage, Self::Error> {
        let mut count_qb: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT COUNT(*) as count FROM saga_instances");
        let mut select_qb: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(format!(
            "SELECT {INSTANCE_COLUMNS} FROM saga_instances"
        ));

        let mut has_where = false;

        if let Some(state) = filter.state {
            if !has_where {
                count_qb.push(" WHERE ");
                select_qb.push(" WHERE ");
                has_where = true;
            } else {
                count_qb.push(" AND ");
                select_qb.push(" AND ");
            }
            count_qb.push("state = ");
            select_qb.push("state = ");
            count_qb.push_bind(state.as_str());
            select_qb.push_bind(state.as_str());
        }

        if let Some(step_status) = filter.step_status {
            if !has_where {
                count_qb.push(" WHERE ");
                select_qb.push(" WHERE ");
                has_where = true;
            } else {
                count_qb.push(" AND ");
                select_qb.push(" AND ");
            }
            count_qb.push("step_status = ");
            select_qb.push("step_status = ");
            count_qb.push_bind(step_status.as_str());
            select_qb.push_bind(step_status.as_str());
        }

        if let Some(application_id) = filter.application_id {
            if !has_where {
                count_qb.push(" WHERE ");
                select_qb.push(" WHERE ");
                has_where = true;
                let _ = has_where; // suppress warning
            } else {
                count_qb.push(" AND ");
                select_qb.push(" AND ");
            }
            count_qb.push("application_id = ");
            select_qb.push("application_id = ");
            count_qb.push_bind(application_id);
            select_qb.push_bind(application_id);
        }

        let count_row = count_qb.build().fetch_one(&self.pool).await?;
        let total_count: i64 = count_row.get("count");

        select_qb.push(" ORDER BY created_at DESC LIMIT ");
        select_qb.push_bind(page.limit as i64);
        select_qb.push(" OFFSET ");
        select_qb.push_bind(page.offset() as i64);

        let rows: Vec<InstanceRow> = select_qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(SagaInstance::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SagaPage::new(items, total_count as u64, page))
    }
}

// ============================================================================
// Tests
// ============================================================================
