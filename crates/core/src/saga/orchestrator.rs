//! Saga orchestrator: event intake and read-side queries
//!
//! Glues the pure state machine to a [`SagaStore`]. Events for one
//! application are processed strictly one at a time (a keyed mutex per
//! `application_id`), so arrival order is application order even when the
//! consumer dispatches concurrently. Cross-application events run freely.
//!
//! Anomalies never escape as errors: unknown instances, re-deliveries and
//! out-of-order events are logged and reported in the outcome so the intake
//! loop can acknowledge the message and move on. Only store failures bubble
//! up, which lets the transport redeliver.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{EventEnvelope, HEADER_CORRELATION_ID, LoanEvent};

use super::instance::{SagaInstance, SagaLogEntry};
use super::machine::{Decision, SkipKind, TransitionApplied, decide};
use super::state::{LoanSagaState, SagaId};
use super::store::{Page, SagaFilter, SagaPage, SagaStore};
use super::timeline::{SagaTimeline, build_timeline};

#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga store could not be read or updated
    #[error("saga store error: {0}")]
    Store(String),
}

/// What handling one envelope did.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// Instance created (saga trigger)
    Started { saga_id: SagaId },
    /// Instance moved to a new state
    Advanced {
        saga_id: SagaId,
        state: LoanSagaState,
    },
    /// Event recognized but deliberately not applied
    Skipped { kind: SkipKind },
    /// Payload malformed; state untouched
    Rejected { reason: String },
    /// Event type is not one the orchestrator handles
    Ignored { event_type: String },
}

/// Latest instance plus its full ordered history.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaStatus {
    pub instance: SagaInstance,
    pub log: Vec<SagaLogEntry>,
}

/// The orchestrator, generic over its store.
pub struct SagaOrchestrator<S> {
    store: Arc<S>,
    /// Per-application serialization points
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<S> SagaOrchestrator<S>
where
    S: SagaStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Process one envelope from the bus.
    pub async fn handle_envelope(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<HandleOutcome, SagaError> {
        let started = Instant::now();

        let event = match LoanEvent::from_envelope(envelope) {
            Ok(event) => event,
            Err(e) if e.is_unknown_type() => {
                debug!(event_type = %envelope.event_type, "not an orchestrator event, ignoring");
                return Ok(HandleOutcome::Ignored {
                    event_type: envelope.event_type.clone(),
                });
            }
            Err(e) => {
                warn!(
                    event_type = %envelope.event_type,
                    event_id = %envelope.event_id,
                    error = %e,
                    "malformed event rejected"
                );
                return Ok(HandleOutcome::Rejected {
                    reason: e.to_string(),
                });
            }
        };

        let application_id = event.application_id();
        let lock = self
            .locks
            .entry(application_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let existing = self
            .store
            .find_by_application_id(application_id)
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;

        match decide(existing.as_ref(), &event) {
            Decision::Apply(mut record) => {
                // Commands inherit the inbound correlation id
                if let Some(correlation_id) = envelope.correlation_id() {
                    for cmd in &mut record.commands {
                        cmd.headers
                            .insert(HEADER_CORRELATION_ID.to_string(), correlation_id.to_string());
                    }
                }
                record.log = record
                    .log
                    .with_duration_ms(started.elapsed().as_millis() as i64);

                let saga_id = record.saga_id;
                let new_state = record.new_state;
                let creating = record.is_create();

                match self
                    .store
                    .record_transition(*record)
                    .await
                    .map_err(|e| SagaError::Store(e.to_string()))?
                {
                    TransitionApplied::Applied => {
                        if creating {
                            info!(
                                saga_id = %saga_id,
                                application_id = %application_id,
                                state = %new_state,
                                "saga started"
                            );
                            Ok(HandleOutcome::Started { saga_id })
                        } else {
                            info!(
                                saga_id = %saga_id,
                                application_id = %application_id,
                                state = %new_state,
                                step = event.step_name(),
                                "saga advanced"
                            );
                            Ok(HandleOutcome::Advanced {
                                saga_id,
                                state: new_state,
                            })
                        }
                    }
                    TransitionApplied::Conflict => {
                        warn!(
                            saga_id = %saga_id,
                            application_id = %application_id,
                            step = event.step_name(),
                            "transition lost a concurrent race, skipping"
                        );
                        Ok(HandleOutcome::Skipped {
                            kind: SkipKind::LostRace,
                        })
                    }
                }
            }

            Decision::Skip {
                kind,
                reason,
                audit,
            } => {
                match kind {
                    SkipKind::UnknownInstance | SkipKind::OutOfOrder => {
                        warn!(
                            application_id = %application_id,
                            step = event.step_name(),
                            skip = %kind,
                            reason = %reason,
                            "event skipped"
                        );
                    }
                    _ => {
                        info!(
                            application_id = %application_id,
                            step = event.step_name(),
                            skip = %kind,
                            reason = %reason,
                            "event skipped"
                        );
                    }
                }

                if let Some(audit) = audit {
                    let audit = audit.with_duration_ms(started.elapsed().as_millis() as i64);
                    self.store
                        .append_log(audit)
                        .await
                        .map_err(|e| SagaError::Store(e.to_string()))?;
                }

                Ok(HandleOutcome::Skipped { kind })
            }
        }
    }

    /// Latest instance and full ordered log for an application.
    pub async fn status(&self, application_id: Uuid) -> Result<Option<SagaStatus>, SagaError> {
        let Some(instance) = self
            .store
            .find_by_application_id(application_id)
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?
        else {
            return Ok(None);
        };

        let log = self
            .store
            .fetch_log(instance.saga_id)
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;

        Ok(Some(SagaStatus { instance, log }))
    }

    /// Timeline projection for an application.
    pub async fn timeline(&self, application_id: Uuid) -> Result<Option<SagaTimeline>, SagaError> {
        Ok(self
            .status(application_id)
            .await?
            .map(|status| build_timeline(&status.instance, &status.log)))
    }

    /// Filtered, paginated listing across all instances.
    pub async fn list(&self, filter: &SagaFilter, page: &Page) -> Result<SagaPage, SagaError> {
        self.store
            .list(filter, page)
            .await
            .map_err(|e| SagaError::Store(e.to_string()))
    }
}
