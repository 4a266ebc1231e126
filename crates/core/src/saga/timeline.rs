//! Timeline projection over a saga's log
//!
//! Read-only view answering "what happened to this application, and how long
//! did each step take". Durations are the gaps between consecutive log
//! timestamps; the overall status is derived purely from the step statuses:
//! FAILED if any step recorded a failure, COMPLETED if every step succeeded,
//! IN_PROGRESS otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::instance::{SagaInstance, SagaLogEntry};
use super::state::{LoanSagaState, SagaId, StepStatus};

/// Overall status of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineStatus {
    Completed,
    Failed,
    InProgress,
}

impl TimelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::InProgress => "IN_PROGRESS",
        }
    }
}

impl std::fmt::Display for TimelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step in the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineStep {
    pub step: String,
    pub step_status: StepStatus,
    pub at: DateTime<Utc>,
    /// Gap from the previous step's timestamp; the first step has none
    pub gap_ms: Option<i64>,
    pub error_message: Option<String>,
}

/// Derived view over an instance and its ordered log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaTimeline {
    pub saga_id: SagaId,
    pub application_id: Uuid,
    pub state: LoanSagaState,
    pub status: TimelineStatus,
    pub steps: Vec<TimelineStep>,
    /// Last step timestamp minus first; 0 with fewer than two steps
    pub total_duration_ms: i64,
}

/// Project an instance and its log (ordered by `created_at` ascending) into
/// a timeline.
pub fn build_timeline(instance: &SagaInstance, log: &[SagaLogEntry]) -> SagaTimeline {
    let mut steps = Vec::with_capacity(log.len());
    let mut previous: Option<DateTime<Utc>> = None;

    for entry in log {
        let gap_ms = previous.map(|prev| (entry.created_at - prev).num_milliseconds());
        steps.push(TimelineStep {
            step: entry.step.clone(),
            step_status: entry.step_status,
            at: entry.created_at,
            gap_ms,
            error_message: entry.error_message.clone(),
        });
        previous = Some(entry.created_at);
    }

    let total_duration_ms = match (log.first(), log.last()) {
        (Some(first), Some(last)) if log.len() > 1 => {
            (last.created_at - first.created_at).num_milliseconds()
        }
        _ => 0,
    };

    SagaTimeline {
        saga_id: instance.saga_id,
        application_id: instance.application_id,
        state: instance.state,
        status: overall_status(log),
        steps,
        total_duration_ms,
    }
}

fn overall_status(log: &[SagaLogEntry]) -> TimelineStatus {
    if log.iter().any(|e| e.step_status == StepStatus::Failed) {
        return TimelineStatus::Failed;
    }
    if !log.is_empty()
        && log
            .iter()
            .all(|e| e.step_status == StepStatus::Completed)
    {
        return TimelineStatus::Completed;
    }
    TimelineStatus::InProgress
}
