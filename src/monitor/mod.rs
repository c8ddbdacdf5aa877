//! Event capture: correlation of delivery events into monitor records and
//! their persistence.

pub mod dispatcher;
pub mod event;
pub mod records;
pub mod tracker;

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, warn};

pub use dispatcher::{DispatchError, MonitorHandle, spawn_dispatcher};
pub use event::{DeliveryDestination, DeliveryEvent, DeliverySource, Message, NodeInfo};
pub use records::{LogEntry, NodeDescriptor, Snapshot, Step, Transaction, TransactionView};
pub use tracker::{CorrelationTracker, Observation, TrackerSettings};

use crate::store::{MonitorStore, StoreError};

/// Current wall clock in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Correlates deliveries and writes the resulting records to the store.
pub struct Monitor {
    tracker: CorrelationTracker,
    store: Arc<dyn MonitorStore>,
}

impl Monitor {
    pub fn new(tracker: CorrelationTracker, store: Arc<dyn MonitorStore>) -> Self {
        Self { tracker, store }
    }

    /// Observes one delivery and persists what it produced.
    ///
    /// The message's trace stays locked until every write has completed, so
    /// records of one message reach the store in hop order. Write failures
    /// are logged and counted; they never reach the caller.
    pub async fn deliver(&self, event: &mut DeliveryEvent) -> Observation {
        let mut trace = self.tracker.lock(event.message_id()).await;
        let observation = self.tracker.observe_locked(&mut trace, event, now_millis());
        if !observation.internal {
            self.persist(&observation).await;
        }
        drop(trace);
        observation
    }

    async fn persist(&self, observation: &Observation) {
        if let Some(transaction) = &observation.transaction {
            let result = self.store.insert_transaction(transaction).await;
            record_write("transaction", &transaction.id, result);
        }

        if let Some(step) = observation.step.as_ref().filter(|_| observation.step_is_new) {
            let result = self.store.insert_step(step).await;
            record_write("step", &step.transaction, result);
        }

        if let Some(first) = observation.logs.first() {
            let result = self.store.insert_logs(&observation.logs).await;
            record_write("logs", &first.transaction, result);
        }

        if let Some(snapshot) = &observation.snapshot {
            let result = self.store.insert_snapshot(snapshot).await;
            record_write("snapshot", &snapshot.transaction, result);
        }
    }
}

fn record_write(kind: &'static str, transaction_id: &str, result: Result<(), StoreError>) {
    match result {
        Ok(()) => {
            counter!("monitor_store_writes_total", "kind" => kind).increment(1);
            debug!(kind, transaction_id, "Monitor record stored");
        }
        Err(err) => {
            counter!("monitor_store_write_failures_total", "kind" => kind).increment(1);
            warn!(kind, transaction_id, error = %err, "Failed to store monitor record");
        }
    }
}
