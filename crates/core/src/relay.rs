//! Outbox relay: the poll/drain publisher loop
//!
//! A long-running loop that claims unpublished outbox rows oldest-first,
//! publishes each to the configured bus keyed by aggregate id, and stamps
//! delivery. Delivery is at-least-once: a crash between publish and stamp
//! re-publishes the row on the next tick, so downstream handlers must be
//! idempotent.
//!
//! One bad row never halts the queue. A failed publish marks the row with
//! the error and defers the remaining rows of the *same aggregate* in that
//! batch, so per-aggregate FIFO order survives partial failures while other
//! aggregates keep flowing.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::EventPublisher;
use crate::outbox::OutboxStore;

/// Tuning knobs for the relay loop.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum rows claimed per tick
    pub batch_size: usize,
    /// Poll period between ticks
    pub poll_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// What a single tick accomplished.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Rows claimed from the store
    pub fetched: usize,
    /// Rows delivered and stamped
    pub published: usize,
    /// Rows whose publish attempt failed
    pub failed: usize,
    /// Rows skipped because an earlier row of their aggregate failed
    pub deferred: usize,
    pub duration: Duration,
}

impl BatchOutcome {
    /// Published fraction of attempted rows (deferred rows are not attempts).
    pub fn success_rate(&self) -> f64 {
        let attempted = self.published + self.failed;
        if attempted == 0 {
            return 1.0;
        }
        self.published as f64 / attempted as f64
    }
}

/// Cumulative counters across the relay's lifetime.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    batches: AtomicU64,
    events_published: AtomicU64,
    events_failed: AtomicU64,
}

impl RelayMetrics {
    fn record(&self, outcome: &BatchOutcome) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.events_published
            .fetch_add(outcome.published as u64, Ordering::Relaxed);
        self.events_failed
            .fetch_add(outcome.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMetricsSnapshot {
    pub batches: u64,
    pub events_published: u64,
    pub events_failed: u64,
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// The outbox store could not be read or updated
    #[error("outbox store error: {0}")]
    Store(String),
}

/// The publisher loop, generic over store and bus.
pub struct OutboxRelay<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    config: RelayConfig,
    metrics: RelayMetrics,
}

impl<S, P> OutboxRelay<S, P>
where
    S: OutboxStore,
    P: EventPublisher,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics: RelayMetrics::default(),
        }
    }

    pub fn metrics(&self) -> RelayMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run until the shutdown channel fires. Tick failures are logged and
    /// the loop keeps going; the relay itself never crashes over a bad row
    /// or a transient store error.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "outbox relay started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("outbox relay stopping");
                    break;
                }
                _ = sleep(self.config.poll_interval) => {
                    match self.process_batch().await {
                        Ok(outcome) if outcome.fetched > 0 => {
                            debug!(
                                fetched = outcome.fetched,
                                published = outcome.published,
                                failed = outcome.failed,
                                deferred = outcome.deferred,
                                duration_ms = outcome.duration.as_millis() as u64,
                                "outbox batch drained"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "outbox relay tick failed");
                        }
                    }
                }
            }
        }
    }

    /// One tick: claim, publish row by row, stamp.
    pub async fn process_batch(&self) -> Result<BatchOutcome, RelayError> {
        let started = std::time::Instant::now();

        let batch = self
            .store
            .claim_batch(self.config.batch_size)
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;

        let fetched = batch.len();
        let mut published = 0usize;
        let mut failed = 0usize;
        let mut deferred = 0usize;
        // Aggregates with a failed row this tick; their later rows must wait
        // so per-aggregate order holds.
        let mut poisoned: HashSet<Uuid> = HashSet::new();

        for event in batch {
            if poisoned.contains(&event.aggregate_id) {
                deferred += 1;
                continue;
            }

            let key = event.aggregate_id.to_string();
            let envelope = event.to_envelope();

            match self.publisher.publish(&event.topic, &key, &envelope).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_published(&[event.id]).await {
                        // Row was delivered but not stamped; it will be
                        // re-published next tick, which at-least-once allows.
                        error!(
                            event_id = %event.id,
                            error = %e,
                            "published event could not be stamped"
                        );
                    }
                    published += 1;
                }
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        aggregate_id = %event.aggregate_id,
                        topic = %event.topic,
                        error = %e,
                        "publish failed, row stays queued"
                    );
                    if let Err(mark_err) = self.store.mark_failed(event.id, &e.to_string()).await {
                        error!(
                            event_id = %event.id,
                            error = %mark_err,
                            "failed publish could not be recorded"
                        );
                    }
                    failed += 1;
                    poisoned.insert(event.aggregate_id);
                }
            }
        }

        let outcome = BatchOutcome {
            fetched,
            published,
            failed,
            deferred,
            duration: started.elapsed(),
        };
        self.metrics.record(&outcome);
        Ok(outcome)
    }
}
