//! Full origination pipeline without external services: orchestrator writes
//! transitions and command rows through the in-memory saga store, the relay
//! drains the shared outbox, and a capturing publisher stands in for the bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use los_workflow_core::OutboxStore;
use los_workflow_core::event::{EventEnvelope, HEADER_CORRELATION_ID, HEADER_EVENT_ID};
use los_workflow_core::relay::{OutboxRelay, RelayConfig};
use los_workflow_core::saga::{HandleOutcome, LoanSagaState, SagaOrchestrator, SkipKind, StepStatus};
use los_workflow_core::topics::{command_topics, event_topics};
use los_workflow_testing::{CapturingPublisher, MemoryOutboxStore, MemorySagaStore};

struct Pipeline {
    orchestrator: SagaOrchestrator<MemorySagaStore>,
    relay: OutboxRelay<MemoryOutboxStore, CapturingPublisher>,
    publisher: Arc<CapturingPublisher>,
    saga_store: Arc<MemorySagaStore>,
}

fn pipeline() -> Pipeline {
    let outbox = Arc::new(MemoryOutboxStore::new());
    let saga_store = Arc::new(MemorySagaStore::with_outbox(outbox.clone()));
    let publisher = Arc::new(CapturingPublisher::new());
    let relay = OutboxRelay::new(
        outbox,
        publisher.clone(),
        RelayConfig {
            batch_size: 50,
            poll_interval: Duration::from_millis(10),
        },
    );
    Pipeline {
        orchestrator: SagaOrchestrator::new(saga_store.clone()),
        relay,
        publisher,
        saga_store,
    }
}

impl Pipeline {
    /// Tick the relay until the outbox is empty.
    async fn drain(&self) {
        loop {
            let outcome = self.relay.process_batch().await.unwrap();
            assert_eq!(outcome.failed, 0);
            if outcome.fetched == 0 {
                break;
            }
        }
    }
}

fn envelope(event_type: &str, payload: serde_json::Value) -> EventEnvelope {
    EventEnvelope {
        event_id: Uuid::new_v4(),
        aggregate_id: Uuid::new_v4(),
        event_type: event_type.to_string(),
        payload,
        headers: HashMap::new(),
        occurred_at: chrono::Utc::now(),
    }
}

fn submitted(app: Uuid) -> EventEnvelope {
    envelope(
        event_topics::APPLICATION_SUBMITTED,
        json!({"applicationId": app.to_string(), "amount": 40000}),
    )
}

fn kyc_done(app: Uuid) -> EventEnvelope {
    envelope(
        event_topics::KYC_COMPLETED,
        json!({"applicationId": app.to_string(), "status": "VERIFIED"}),
    )
}

fn decision(app: Uuid, verdict: &str) -> EventEnvelope {
    envelope(
        event_topics::DECISION_MADE,
        json!({"applicationId": app.to_string(), "finalDecision": verdict}),
    )
}

#[tokio::test]
async fn test_approved_flow_publishes_every_command_in_order() {
    let p = pipeline();
    let app = Uuid::new_v4();

    p.orchestrator.handle_envelope(&submitted(app)).await.unwrap();
    p.drain().await;
    p.orchestrator.handle_envelope(&kyc_done(app)).await.unwrap();
    p.drain().await;
    p.orchestrator
        .handle_envelope(&decision(app, "APPROVED"))
        .await
        .unwrap();
    p.drain().await;

    assert_eq!(
        p.publisher.topics(),
        vec![
            command_topics::START_KYC,
            command_topics::BUREAU_PULL,
            command_topics::UNDERWRITE,
            command_topics::ISSUE_SANCTION,
        ]
    );
    // Every command is keyed by the application, so bus partitioning keeps
    // them in order downstream
    assert!(p.publisher.keys().iter().all(|k| k == &app.to_string()));

    let status = p.orchestrator.status(app).await.unwrap().unwrap();
    assert_eq!(status.instance.state, LoanSagaState::Sanction);
    assert!(status.instance.completed_at.is_some());
    assert_eq!(status.log.len(), 3);
    assert_eq!(p.saga_store.outbox().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_rejected_flow_never_publishes_a_sanction() {
    let p = pipeline();
    let app = Uuid::new_v4();

    p.orchestrator.handle_envelope(&submitted(app)).await.unwrap();
    p.orchestrator.handle_envelope(&kyc_done(app)).await.unwrap();
    p.orchestrator
        .handle_envelope(&decision(app, "DECLINED"))
        .await
        .unwrap();
    p.drain().await;

    assert_eq!(
        p.publisher.topics(),
        vec![
            command_topics::START_KYC,
            command_topics::BUREAU_PULL,
            command_topics::UNDERWRITE,
        ]
    );

    let status = p.orchestrator.status(app).await.unwrap().unwrap();
    assert_eq!(status.instance.state, LoanSagaState::Rejected);
    assert!(status.instance.completed_at.is_some());
}

#[tokio::test]
async fn test_redelivered_decision_republishes_nothing() {
    let p = pipeline();
    let app = Uuid::new_v4();

    p.orchestrator.handle_envelope(&submitted(app)).await.unwrap();
    p.orchestrator.handle_envelope(&kyc_done(app)).await.unwrap();
    p.orchestrator
        .handle_envelope(&decision(app, "APPROVED"))
        .await
        .unwrap();
    p.drain().await;

    let published_before = p.publisher.count();
    let logs_before = p.saga_store.log_count();

    let outcome = p
        .orchestrator
        .handle_envelope(&decision(app, "APPROVED"))
        .await
        .unwrap();
    p.drain().await;

    assert_eq!(
        outcome,
        HandleOutcome::Skipped {
            kind: SkipKind::AlreadyApplied
        }
    );
    assert_eq!(p.publisher.count(), published_before);
    // The replay still left its audit trail
    assert_eq!(p.saga_store.log_count(), logs_before + 1);
}

#[tokio::test]
async fn test_early_decision_waits_for_verification() {
    let p = pipeline();
    let app = Uuid::new_v4();

    p.orchestrator.handle_envelope(&submitted(app)).await.unwrap();
    p.drain().await;

    // Decision overtakes KycCompleted in transit
    let outcome = p
        .orchestrator
        .handle_envelope(&decision(app, "APPROVED"))
        .await
        .unwrap();
    p.drain().await;
    assert_eq!(
        outcome,
        HandleOutcome::Skipped {
            kind: SkipKind::OutOfOrder
        }
    );
    assert_eq!(p.publisher.count(), 2);

    // Once verification lands, the decision must be re-delivered to finish;
    // the anomaly only cost an audit entry, not progress
    p.orchestrator.handle_envelope(&kyc_done(app)).await.unwrap();
    p.orchestrator
        .handle_envelope(&decision(app, "APPROVED"))
        .await
        .unwrap();
    p.drain().await;

    assert_eq!(
        p.publisher.topics(),
        vec![
            command_topics::START_KYC,
            command_topics::BUREAU_PULL,
            command_topics::UNDERWRITE,
            command_topics::ISSUE_SANCTION,
        ]
    );

    let status = p.orchestrator.status(app).await.unwrap().unwrap();
    assert_eq!(status.instance.state, LoanSagaState::Sanction);
    // Log shows the anomaly between the normal steps
    let anomaly = status
        .log
        .iter()
        .find(|e| e.step_status == StepStatus::Failed)
        .expect("out-of-order event should leave a failed entry");
    assert_eq!(anomaly.step, "DecisionMade");
}

#[tokio::test]
async fn test_correlation_id_reaches_the_bus() {
    let p = pipeline();
    let app = Uuid::new_v4();

    let mut env = submitted(app);
    env.headers
        .insert(HEADER_CORRELATION_ID.to_string(), "corr-31".to_string());
    p.orchestrator.handle_envelope(&env).await.unwrap();
    p.drain().await;

    let messages = p.publisher.messages();
    assert_eq!(messages.len(), 2);
    for message in &messages {
        assert_eq!(message.envelope.correlation_id(), Some("corr-31"));
        // The relay stamps the outbox row id for consumer-side dedup
        assert_eq!(
            message.envelope.headers.get(HEADER_EVENT_ID),
            Some(&message.envelope.event_id.to_string())
        );
    }
}
