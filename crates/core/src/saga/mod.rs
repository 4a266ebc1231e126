//! Durable saga orchestration for loan origination
//!
//! The saga tracks one loan application from submission to a terminal
//! decision. Listed by responsibility:
//!
//! - [`state`]: identifiers, the state enum and the legal-transition matrix
//! - [`instance`]: persisted instance row and append-only step log entries
//! - [`machine`]: the pure decision function mapping (instance, event) to a
//!   transition record or a documented skip
//! - [`store`]: persistence port, including the atomic transition write
//! - [`orchestrator`]: event intake, per-application serialization, queries
//! - [`timeline`]: read-side projection of the step log with gap timings

pub mod instance;
pub mod machine;
pub mod orchestrator;
pub mod state;
pub mod store;
pub mod timeline;

pub use instance::{SagaInstance, SagaLogEntry};
pub use machine::{
    DECISION_APPROVED, Decision, SkipKind, TransitionApplied, TransitionRecord, decide,
};
pub use orchestrator::{HandleOutcome, SagaError, SagaOrchestrator, SagaStatus};
pub use state::{LoanSagaState, SagaId, SagaType, StepStatus, saga_id_for_application};
pub use store::{Page, SagaFilter, SagaPage, SagaStore};
pub use timeline::{SagaTimeline, TimelineStatus, TimelineStep, build_timeline};
