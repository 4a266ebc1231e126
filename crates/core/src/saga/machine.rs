//! Pure transition logic for the origination saga
//!
//! [`decide`] maps (current instance, inbound event) to what should be made
//! durable: either a [`TransitionRecord`] carrying the state change, the log
//! entry and the outbound commands as one atomic unit, or a skip with a
//! classified reason. No I/O happens here, which is what makes the state
//! machine exhaustively testable.
//!
//! Skip classification matters for the audit trail:
//! - `UnknownInstance`: non-creating event for an application we have never
//!   seen. Arrival races make this normal; nothing to attach a log entry to.
//! - `AlreadyApplied`: re-delivery of an event whose effect the instance
//!   already carries. Gets a benign audit entry; commands are NOT re-emitted.
//! - `OutOfOrder`: an event that skips ahead of the graph (a decision before
//!   verification finished). Gets a failure-marked audit entry.

use serde_json::json;

use crate::event::LoanEvent;
use crate::outbox::NewOutboxEvent;
use crate::topics::command_topics;

use super::instance::{SagaInstance, SagaLogEntry};
use super::state::{LoanSagaState, SagaId, SagaType};

/// Verdict string that selects the sanction path.
pub const DECISION_APPROVED: &str = "APPROVED";

/// What the store must persist for one applied event.
///
/// Everything in here commits in a single transaction: the instance
/// create/update, the log entry, and the command rows in the outbox. That is
/// what turns "issue StartKYC" into a durable, retryable artifact instead of
/// an implied side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    pub saga_id: SagaId,
    pub application_id: uuid::Uuid,
    pub saga_type: SagaType,
    /// `None` creates the instance; `Some` is the compare-and-set guard the
    /// store applies to the update (a miss means a concurrent racer won)
    pub expected_state: Option<LoanSagaState>,
    pub new_state: LoanSagaState,
    /// Step name mirrored onto the instance
    pub step: String,
    pub log: SagaLogEntry,
    pub commands: Vec<NewOutboxEvent>,
}

impl TransitionRecord {
    /// True when this record creates the instance instead of updating it.
    #[inline]
    pub fn is_create(&self) -> bool {
        self.expected_state.is_none()
    }

    /// Instance row a creating record inserts.
    pub fn to_new_instance(&self) -> SagaInstance {
        let now = chrono::Utc::now();
        SagaInstance {
            saga_id: self.saga_id,
            application_id: self.application_id,
            saga_type: self.saga_type,
            state: self.new_state,
            current_step: self.step.clone(),
            step_status: self.log.step_status,
            created_at: now,
            updated_at: now,
            completed_at: self.new_state.is_terminal().then_some(now),
            failed_at: None,
            error_message: self.log.error_message.clone(),
        }
    }

    /// Mutations an advancing record applies to the existing instance. The
    /// caller has already verified the CAS guard against `expected_state`.
    pub fn apply_to(&self, instance: &mut SagaInstance) {
        let now = chrono::Utc::now();
        instance.state = self.new_state;
        instance.current_step = self.step.clone();
        instance.step_status = self.log.step_status;
        instance.updated_at = now;
        instance.error_message = self.log.error_message.clone();
        if self.new_state.is_terminal() {
            instance.completed_at = Some(now);
        }
    }
}

/// Result of a [`TransitionRecord`] against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionApplied {
    Applied,
    /// The create found an existing row or the CAS guard missed
    Conflict,
}

/// Why an event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipKind {
    UnknownInstance,
    AlreadyApplied,
    OutOfOrder,
    /// A concurrent handler applied a transition between our read and write
    LostRace,
}

impl std::fmt::Display for SkipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownInstance => "unknown_instance",
            Self::AlreadyApplied => "already_applied",
            Self::OutOfOrder => "out_of_order",
            Self::LostRace => "lost_race",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of the pure decision step.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Persist this transition atomically
    Apply(Box<TransitionRecord>),
    /// Do not touch state; optionally append an audit entry
    Skip {
        kind: SkipKind,
        reason: String,
        audit: Option<SagaLogEntry>,
    },
}

/// Decide what an inbound event does to an instance.
pub fn decide(existing: Option<&SagaInstance>, event: &LoanEvent) -> Decision {
    match event {
        LoanEvent::ApplicationSubmitted {
            application_id,
            payload,
        } => match existing {
            None => {
                let instance = SagaInstance::start_origination(*application_id, event.step_name());
                let saga_id = instance.saga_id;
                let log = SagaLogEntry::completed(saga_id, event.step_name(), payload.clone());
                Decision::Apply(Box::new(TransitionRecord {
                    saga_id,
                    application_id: *application_id,
                    saga_type: SagaType::Origination,
                    expected_state: None,
                    new_state: LoanSagaState::KycRequested,
                    step: event.step_name().to_string(),
                    log,
                    commands: vec![
                        command(*application_id, saga_id, command_topics::START_KYC, None),
                        command(*application_id, saga_id, command_topics::BUREAU_PULL, None),
                    ],
                }))
            }
            // An application is submitted once; a second arrival is always a
            // re-delivery, whatever state the instance has reached since.
            Some(instance) => already_applied(instance, event, "application already submitted"),
        },

        LoanEvent::KycCompleted {
            application_id,
            payload: _,
        } => match existing {
            None => unknown_instance(*application_id, event),
            Some(instance) if instance.state == LoanSagaState::KycRequested => {
                advance(
                    instance,
                    event,
                    LoanSagaState::VerificationComplete,
                    vec![command(
                        *application_id,
                        instance.saga_id,
                        command_topics::UNDERWRITE,
                        None,
                    )],
                )
            }
            // Every later state already carries the verification effect.
            Some(instance) => already_applied(
                instance,
                event,
                format!("verification already recorded (state {})", instance.state),
            ),
        },

        LoanEvent::DecisionMade {
            application_id,
            final_decision,
            payload: _,
        } => match existing {
            None => unknown_instance(*application_id, event),
            Some(instance) if instance.state == LoanSagaState::VerificationComplete => {
                let approved = final_decision.as_deref() == Some(DECISION_APPROVED);
                let (new_state, commands) = if approved {
                    (
                        LoanSagaState::Sanction,
                        vec![command(
                            *application_id,
                            instance.saga_id,
                            command_topics::ISSUE_SANCTION,
                            final_decision.as_deref(),
                        )],
                    )
                } else {
                    (LoanSagaState::Rejected, Vec::new())
                };
                advance(instance, event, new_state, commands)
            }
            Some(instance) if instance.state.is_terminal() => already_applied(
                instance,
                event,
                format!("decision already recorded (state {})", instance.state),
            ),
            // Decision before verification finished: a real protocol anomaly.
            Some(instance) => Decision::Skip {
                kind: SkipKind::OutOfOrder,
                reason: format!(
                    "decision received before verification completed (state {})",
                    instance.state
                ),
                audit: Some(SagaLogEntry::failed(
                    instance.saga_id,
                    event.step_name(),
                    event.payload().clone(),
                    format!(
                        "decision received before verification completed (state {})",
                        instance.state
                    ),
                )),
            },
        },
    }
}

fn advance(
    instance: &SagaInstance,
    event: &LoanEvent,
    new_state: LoanSagaState,
    commands: Vec<NewOutboxEvent>,
) -> Decision {
    debug_assert!(instance.state.can_transition_to(new_state));

    let log = SagaLogEntry::completed(
        instance.saga_id,
        event.step_name(),
        event.payload().clone(),
    );
    Decision::Apply(Box::new(TransitionRecord {
        saga_id: instance.saga_id,
        application_id: instance.application_id,
        saga_type: instance.saga_type,
        expected_state: Some(instance.state),
        new_state,
        step: event.step_name().to_string(),
        log,
        commands,
    }))
}

fn already_applied(
    instance: &SagaInstance,
    event: &LoanEvent,
    reason: impl Into<String>,
) -> Decision {
    Decision::Skip {
        kind: SkipKind::AlreadyApplied,
        reason: reason.into(),
        audit: Some(SagaLogEntry::completed(
            instance.saga_id,
            event.step_name(),
            event.payload().clone(),
        )),
    }
}

fn unknown_instance(application_id: uuid::Uuid, event: &LoanEvent) -> Decision {
    Decision::Skip {
        kind: SkipKind::UnknownInstance,
        reason: format!(
            "no saga instance for application {} (event {})",
            application_id,
            event.step_name()
        ),
        audit: None,
    }
}

fn command(
    application_id: uuid::Uuid,
    saga_id: SagaId,
    topic: &str,
    final_decision: Option<&str>,
) -> NewOutboxEvent {
    let mut payload = json!({
        "applicationId": application_id.to_string(),
        "sagaId": saga_id.to_string(),
    });
    if let Some(decision) = final_decision {
        payload["finalDecision"] = json!(decision);
    }
    NewOutboxEvent::new(application_id, topic, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::state::{StepStatus, saga_id_for_application};
    use serde_json::Value;
    use uuid::Uuid;

    fn submitted(app: Uuid) -> LoanEvent {
        LoanEvent::ApplicationSubmitted {
            application_id: app,
            payload: json!({"applicationId": app.to_string(), "amount": 50000}),
        }
    }

    fn kyc_done(app: Uuid) -> LoanEvent {
        LoanEvent::KycCompleted {
            application_id: app,
            payload: json!({"applicationId": app.to_string(), "status": "VERIFIED"}),
        }
    }

    fn decision(app: Uuid, verdict: Option<&str>) -> LoanEvent {
        LoanEvent::DecisionMade {
            application_id: app,
            final_decision: verdict.map(str::to_string),
            payload: json!({"applicationId": app.to_string(), "finalDecision": verdict}),
        }
    }

    fn topics_of(commands: &[NewOutboxEvent]) -> Vec<&str> {
        commands.iter().map(|c| c.topic.as_str()).collect()
    }

    #[test]
    fn test_submission_creates_instance_and_issues_kyc_commands() {
        let app = Uuid::new_v4();

        let record = match decide(None, &submitted(app)) {
            Decision::Apply(record) => record,
            other => panic!("expected Apply, got {:?}", other),
        };

        assert_eq!(record.expected_state, None);
        assert_eq!(record.new_state, LoanSagaState::KycRequested);
        assert_eq!(record.step, "ApplicationSubmitted");
        assert_eq!(record.log.step_status, StepStatus::Completed);
        assert_eq!(
            topics_of(&record.commands),
            vec![command_topics::START_KYC, command_topics::BUREAU_PULL]
        );
        // Commands are keyed by the application so bus ordering holds
        assert!(record.commands.iter().all(|c| c.aggregate_id == app));
        assert_eq!(
            record.saga_id,
            saga_id_for_application(SagaType::Origination, app)
        );
    }

    #[test]
    fn test_kyc_completion_advances_and_requests_underwriting() {
        let app = Uuid::new_v4();
        let instance = SagaInstance::start_origination(app, "ApplicationSubmitted");

        let record = match decide(Some(&instance), &kyc_done(app)) {
            Decision::Apply(record) => record,
            other => panic!("expected Apply, got {:?}", other),
        };

        assert_eq!(record.expected_state, Some(LoanSagaState::KycRequested));
        assert_eq!(record.new_state, LoanSagaState::VerificationComplete);
        assert_eq!(topics_of(&record.commands), vec![command_topics::UNDERWRITE]);
    }

    #[test]
    fn test_approved_decision_reaches_sanction_with_command() {
        let app = Uuid::new_v4();
        let mut instance = SagaInstance::start_origination(app, "ApplicationSubmitted");
        instance.state = LoanSagaState::VerificationComplete;

        let record = match decide(Some(&instance), &decision(app, Some("APPROVED"))) {
            Decision::Apply(record) => record,
            other => panic!("expected Apply, got {:?}", other),
        };

        assert_eq!(record.new_state, LoanSagaState::Sanction);
        assert_eq!(
            topics_of(&record.commands),
            vec![command_topics::ISSUE_SANCTION]
        );
        assert_eq!(
            record.commands[0].payload.get("finalDecision"),
            Some(&Value::String("APPROVED".to_string()))
        );
    }

    #[test]
    fn test_any_other_decision_rejects_without_commands() {
        let app = Uuid::new_v4();
        let mut instance = SagaInstance::start_origination(app, "ApplicationSubmitted");
        instance.state = LoanSagaState::VerificationComplete;

        for verdict in [Some("DECLINED"), Some("REFER"), None] {
            let record = match decide(Some(&instance), &decision(app, verdict)) {
                Decision::Apply(record) => record,
                other => panic!("expected Apply for {:?}, got {:?}", verdict, other),
            };
            assert_eq!(record.new_state, LoanSagaState::Rejected);
            assert!(record.commands.is_empty());
        }
    }

    #[test]
    fn test_full_approved_path_ends_at_sanction() {
        let app = Uuid::new_v4();
        let mut instance = SagaInstance::start_origination(app, "ApplicationSubmitted");

        match decide(Some(&instance), &kyc_done(app)) {
            Decision::Apply(record) => record.apply_to(&mut instance),
            other => panic!("expected Apply, got {:?}", other),
        }
        assert!(instance.completed_at.is_none());

        match decide(Some(&instance), &decision(app, Some("APPROVED"))) {
            Decision::Apply(record) => record.apply_to(&mut instance),
            other => panic!("expected Apply, got {:?}", other),
        }

        assert_eq!(instance.state, LoanSagaState::Sanction);
        assert!(instance.is_terminal());
        assert!(instance.completed_at.is_some());
        assert_eq!(instance.current_step, "DecisionMade");
    }

    #[test]
    fn test_creating_record_builds_the_initial_instance() {
        let app = Uuid::new_v4();

        let record = match decide(None, &submitted(app)) {
            Decision::Apply(record) => record,
            other => panic!("expected Apply, got {:?}", other),
        };

        assert!(record.is_create());
        let instance = record.to_new_instance();
        assert_eq!(instance.application_id, app);
        assert_eq!(instance.state, LoanSagaState::KycRequested);
        assert_eq!(instance.step_status, StepStatus::Completed);
        assert!(instance.completed_at.is_none());
    }

    #[test]
    fn test_resubmission_is_benign_and_emits_no_commands() {
        let app = Uuid::new_v4();
        let instance = SagaInstance::start_origination(app, "ApplicationSubmitted");

        match decide(Some(&instance), &submitted(app)) {
            Decision::Skip { kind, audit, .. } => {
                assert_eq!(kind, SkipKind::AlreadyApplied);
                let audit = audit.expect("replay should leave an audit entry");
                assert_eq!(audit.step_status, StepStatus::Completed);
                assert!(audit.error_message.is_none());
            }
            other => panic!("expected Skip, got {:?}", other),
        }
    }

    #[test]
    fn test_replayed_decision_does_not_reissue_sanction() {
        let app = Uuid::new_v4();
        let mut instance = SagaInstance::start_origination(app, "ApplicationSubmitted");
        instance.state = LoanSagaState::Sanction;

        match decide(Some(&instance), &decision(app, Some("APPROVED"))) {
            Decision::Skip { kind, .. } => assert_eq!(kind, SkipKind::AlreadyApplied),
            other => panic!("expected Skip, got {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_decision_replay_never_regresses_terminal_state() {
        let app = Uuid::new_v4();
        let mut instance = SagaInstance::start_origination(app, "ApplicationSubmitted");
        instance.state = LoanSagaState::Rejected;

        // Even an APPROVED replay cannot leave REJECTED
        match decide(Some(&instance), &decision(app, Some("APPROVED"))) {
            Decision::Skip { kind, .. } => assert_eq!(kind, SkipKind::AlreadyApplied),
            other => panic!("expected Skip, got {:?}", other),
        }
    }

    #[test]
    fn test_decision_before_verification_is_out_of_order() {
        let app = Uuid::new_v4();
        let instance = SagaInstance::start_origination(app, "ApplicationSubmitted");

        match decide(Some(&instance), &decision(app, Some("APPROVED"))) {
            Decision::Skip { kind, audit, .. } => {
                assert_eq!(kind, SkipKind::OutOfOrder);
                let audit = audit.expect("anomaly should leave an error-marked entry");
                assert_eq!(audit.step_status, StepStatus::Failed);
                assert!(audit.error_message.is_some());
            }
            other => panic!("expected Skip, got {:?}", other),
        }
    }

    #[test]
    fn test_kyc_for_unknown_application_is_a_noop() {
        let app = Uuid::new_v4();

        match decide(None, &kyc_done(app)) {
            Decision::Skip { kind, audit, .. } => {
                assert_eq!(kind, SkipKind::UnknownInstance);
                assert!(audit.is_none());
            }
            other => panic!("expected Skip, got {:?}", other),
        }
    }

    #[test]
    fn test_replayed_kyc_after_terminal_state_is_benign() {
        let app = Uuid::new_v4();
        let mut instance = SagaInstance::start_origination(app, "ApplicationSubmitted");
        instance.state = LoanSagaState::Sanction;

        match decide(Some(&instance), &kyc_done(app)) {
            Decision::Skip { kind, .. } => assert_eq!(kind, SkipKind::AlreadyApplied),
            other => panic!("expected Skip, got {:?}", other),
        }
    }
}
