//! In-memory saga store for tests.
//!
//! Instances and log entries live in process memory; command rows go into a
//! [`MemoryOutboxStore`] that can be shared with a relay under test, so the
//! whole orchestrate-then-drain pipeline runs without a database. A write
//! lock over the instance map stands in for the transaction: a conflicting
//! transition returns before anything is recorded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use los_workflow_core::saga::{
    Page, SagaFilter, SagaId, SagaInstance, SagaLogEntry, SagaPage, SagaStore, TransitionApplied,
    TransitionRecord,
};

use crate::memory_outbox::MemoryOutboxStore;

/// Error type for [`MemorySagaStore`] operations.
///
/// The store itself never fails; the type exists to satisfy the trait.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("memory saga error: {0}")]
pub struct MemorySagaError(pub String);

/// In-memory [`SagaStore`] implementation.
#[derive(Debug)]
pub struct MemorySagaStore {
    /// One instance per application, like the unique constraint in Postgres
    instances: RwLock<HashMap<Uuid, SagaInstance>>,
    logs: RwLock<Vec<SagaLogEntry>>,
    outbox: Arc<MemoryOutboxStore>,
}

impl Default for MemorySagaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySagaStore {
    /// Store with its own private command outbox.
    pub fn new() -> Self {
        Self::with_outbox(Arc::new(MemoryOutboxStore::new()))
    }

    /// Store writing command rows into a shared outbox, mirroring the
    /// production topology where saga and outbox tables share one database.
    pub fn with_outbox(outbox: Arc<MemoryOutboxStore>) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            logs: RwLock::new(Vec::new()),
            outbox,
        }
    }

    /// The outbox transitions enqueue their commands into.
    pub fn outbox(&self) -> Arc<MemoryOutboxStore> {
        self.outbox.clone()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    pub fn log_count(&self) -> usize {
        self.logs.read().len()
    }

    /// Clear all data (useful for testing). Leaves the outbox alone.
    pub fn clear(&self) {
        self.instances.write().clear();
        self.logs.write().clear();
    }
}

#[async_trait]
impl SagaStore for MemorySagaStore {
    type Error = MemorySagaError;

    async fn find_by_application_id(
        &self,
        application_id: Uuid,
    ) -> Result<Option<SagaInstance>, Self::Error> {
        Ok(self.instances.read().get(&application_id).cloned())
    }

    async fn record_transition(
        &self,
        record: TransitionRecord,
    ) -> Result<TransitionApplied, Self::Error> {
        // The write guard is held through the log and command writes so a
        // concurrent transition cannot interleave, like the Postgres tx.
        let mut instances = self.instances.write();
        match record.expected_state {
            None => {
                if instances.contains_key(&record.application_id) {
                    return Ok(TransitionApplied::Conflict);
                }
                instances.insert(record.application_id, record.to_new_instance());
            }
            Some(expected) => {
                let Some(instance) = instances.get_mut(&record.application_id) else {
                    return Ok(TransitionApplied::Conflict);
                };
                if instance.state != expected {
                    return Ok(TransitionApplied::Conflict);
                }
                record.apply_to(instance);
            }
        }

        self.logs.write().push(record.log.clone());
        self.outbox.insert_all(record.commands.clone());
        Ok(TransitionApplied::Applied)
    }

    async fn append_log(&self, entry: SagaLogEntry) -> Result<(), Self::Error> {
        self.logs.write().push(entry);
        Ok(())
    }

    async fn fetch_log(&self, saga_id: SagaId) -> Result<Vec<SagaLogEntry>, Self::Error> {
        let mut log: Vec<SagaLogEntry> = self
            .logs
            .read()
            .iter()
            .filter(|e| e.saga_id == saga_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for same-instant entries
        log.sort_by_key(|e| e.created_at);
        Ok(log)
    }

    async fn list(&self, filter: &SagaFilter, page: &Page) -> Result<SagaPage, Self::Error> {
        let instances = self.instances.read();
        let mut matched: Vec<SagaInstance> = instances
            .values()
            .filter(|i| filter.state.is_none_or(|s| i.state == s))
            .filter(|i| filter.step_status.is_none_or(|s| i.step_status == s))
            .filter(|i| filter.application_id.is_none_or(|a| i.application_id == a))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as u64;
        let items: Vec<SagaInstance> = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        Ok(SagaPage::new(items, total, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use los_workflow_core::event::LoanEvent;
    use los_workflow_core::outbox::OutboxStore;
    use los_workflow_core::saga::{Decision, LoanSagaState, decide};
    use los_workflow_core::topics::command_topics;
    use serde_json::json;

    fn submitted(app: Uuid) -> LoanEvent {
        LoanEvent::ApplicationSubmitted {
            application_id: app,
            payload: json!({"applicationId": app.to_string()}),
        }
    }

    fn must_apply(existing: Option<&SagaInstance>, event: &LoanEvent) -> TransitionRecord {
        match decide(existing, event) {
            Decision::Apply(record) => *record,
            other => panic!("expected Apply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_lands_instance_log_and_commands() {
        let store = MemorySagaStore::new();
        let app = Uuid::new_v4();

        let applied = store
            .record_transition(must_apply(None, &submitted(app)))
            .await
            .unwrap();
        assert_eq!(applied, TransitionApplied::Applied);

        let instance = store.find_by_application_id(app).await.unwrap().unwrap();
        assert_eq!(instance.state, LoanSagaState::KycRequested);
        assert_eq!(store.log_count(), 1);

        let pending = store.outbox().claim_batch(10).await.unwrap();
        let topics: Vec<&str> = pending.iter().map(|r| r.topic.as_str()).collect();
        assert_eq!(
            topics,
            vec![command_topics::START_KYC, command_topics::BUREAU_PULL]
        );
    }

    #[tokio::test]
    async fn test_conflicting_transition_records_nothing() {
        let store = MemorySagaStore::new();
        let app = Uuid::new_v4();

        store
            .record_transition(must_apply(None, &submitted(app)))
            .await
            .unwrap();
        let logs_before = store.log_count();
        let rows_before = store.outbox().row_count();

        // A second create is the duplicate-trigger race
        let applied = store
            .record_transition(must_apply(None, &submitted(app)))
            .await
            .unwrap();

        assert_eq!(applied, TransitionApplied::Conflict);
        assert_eq!(store.log_count(), logs_before);
        assert_eq!(store.outbox().row_count(), rows_before);
    }

    #[tokio::test]
    async fn test_shared_outbox_collects_commands() {
        let outbox = Arc::new(MemoryOutboxStore::new());
        let store = MemorySagaStore::with_outbox(outbox.clone());
        let app = Uuid::new_v4();

        store
            .record_transition(must_apply(None, &submitted(app)))
            .await
            .unwrap();

        assert_eq!(outbox.pending_count().await.unwrap(), 2);
    }
}
