//! Durable saga records: the instance and its append-only log
//!
//! An instance is the current position of one application in the state
//! graph; the log is its full history, one entry per processed event or
//! command, never mutated after insertion. Together they reconstruct how an
//! application got where it is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::state::{LoanSagaState, SagaId, SagaType, StepStatus, saga_id_for_application};

/// One persistent state machine per application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub saga_id: SagaId,
    /// Business correlation key; one active instance per saga type
    pub application_id: Uuid,
    pub saga_type: SagaType,
    pub state: LoanSagaState,
    /// Name of the last step processed
    pub current_step: String,
    pub step_status: StepStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SagaInstance {
    /// Fresh origination instance entering the graph at `KYC_REQUESTED`.
    pub fn start_origination(application_id: Uuid, step: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            saga_id: saga_id_for_application(SagaType::Origination, application_id),
            application_id,
            saga_type: SagaType::Origination,
            state: LoanSagaState::KycRequested,
            current_step: step.into(),
            step_status: StepStatus::Completed,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            error_message: None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Append-only audit record of one processed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaLogEntry {
    pub id: Uuid,
    pub saga_id: SagaId,
    /// Name of the event/command processed
    pub step: String,
    /// Raw payload snapshot
    pub detail: Value,
    pub step_status: StepStatus,
    /// Handler processing time for this step
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SagaLogEntry {
    /// Entry for a successfully processed step.
    pub fn completed(saga_id: SagaId, step: impl Into<String>, detail: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            saga_id,
            step: step.into(),
            detail,
            step_status: StepStatus::Completed,
            duration_ms: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Entry carrying an error marker, e.g. a protocol anomaly.
    pub fn failed(
        saga_id: SagaId,
        step: impl Into<String>,
        detail: Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            saga_id,
            step: step.into(),
            detail,
            step_status: StepStatus::Failed,
            duration_ms: None,
            error_message: Some(error.into()),
            created_at: Utc::now(),
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
