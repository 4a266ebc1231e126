//! Store port for saga instances and their logs
//!
//! The one non-negotiable is [`record_transition`](SagaStore::record_transition):
//! instance change, log entry and outbound command rows commit together or
//! not at all, and the update is guarded by a compare-and-set on the expected
//! state so racing handlers cannot double-apply a transition.

use async_trait::async_trait;
use uuid::Uuid;

use super::instance::{SagaInstance, SagaLogEntry};
use super::machine::{TransitionApplied, TransitionRecord};
use super::state::{LoanSagaState, SagaId, StepStatus};

/// Filter for the saga list query. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SagaFilter {
    pub state: Option<LoanSagaState>,
    pub step_status: Option<StepStatus>,
    pub application_id: Option<Uuid>,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    /// Page request normalized to sane bounds (page and limit at least 1).
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of instances plus the totals the caller paginates by.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaPage {
    pub items: Vec<SagaInstance>,
    pub total_count: u64,
    pub total_pages: u64,
    pub page: u32,
    pub limit: u32,
}

impl SagaPage {
    /// Assemble a page, deriving `total_pages` from the count and limit.
    pub fn new(items: Vec<SagaInstance>, total_count: u64, page: &Page) -> Self {
        let limit = page.limit as u64;
        Self {
            items,
            total_count,
            total_pages: total_count.div_ceil(limit),
            page: page.page,
            limit: page.limit,
        }
    }
}

/// Persistence port for the orchestrator.
#[async_trait]
pub trait SagaStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Latest instance for an application, if one exists.
    async fn find_by_application_id(
        &self,
        application_id: Uuid,
    ) -> Result<Option<SagaInstance>, Self::Error>;

    /// Apply one transition atomically: create or CAS-update the instance,
    /// append the log entry, and enqueue the command rows in the outbox,
    /// all in a single transaction. Returns
    /// [`TransitionApplied::Conflict`] when the create found an existing
    /// instance or the CAS guard missed; nothing is persisted in that case.
    async fn record_transition(
        &self,
        record: TransitionRecord,
    ) -> Result<TransitionApplied, Self::Error>;

    /// Append an audit entry without touching instance state.
    async fn append_log(&self, entry: SagaLogEntry) -> Result<(), Self::Error>;

    /// Full log of one instance, ordered by `created_at` ascending.
    async fn fetch_log(&self, saga_id: SagaId) -> Result<Vec<SagaLogEntry>, Self::Error>;

    /// Filtered, paginated listing across all instances, newest first.
    async fn list(&self, filter: &SagaFilter, page: &Page) -> Result<SagaPage, Self::Error>;
}
