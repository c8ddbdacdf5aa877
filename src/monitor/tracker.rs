//! Correlation tracker.
//!
//! Turns a stream of per-hop delivery events into transactions, steps, logs
//! and snapshots. State is kept per message id in a bounded LRU; each entry is
//! guarded by its own async mutex so that every hop of one message is
//! observed (and persisted) strictly one after another, while different
//! messages proceed in parallel.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::event::{DeliveryEvent, NodeInfo};
use super::records::{LogEntry, Snapshot, Step, Transaction};
use crate::config::{MonitorConfig, SnapshotPolicy};

/// Node type of the monitor itself; its traffic is never recorded.
pub const MONITOR_NODE_TYPE: &str = "monitor";

const DEFAULT_LOG_LEVEL: &str = "warn";
const MISSING_LOG_TEXT: &str = "Text field missing";
const NO_TOPIC: &str = "None";

/// Failure of a single derivation. Never aborts the other derivations.
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("delivery carries no message id")]
    MissingMessageId,
    #[error("failed to copy message for snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Per-message correlation state.
#[derive(Debug, Default)]
pub struct MessageTrace {
    /// Sticky: once a message passed through an ignored node it stays internal.
    internal: bool,
    first_hop: Option<String>,
    last_hop: Option<String>,
    previous_hop: Option<String>,
    open: Option<Transaction>,
}

impl MessageTrace {
    pub fn open_transaction(&self) -> Option<&Transaction> {
        self.open.as_ref()
    }
}

/// Exclusive access to one message's trace.
pub type TraceGuard = OwnedMutexGuard<MessageTrace>;

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub ignore: Vec<String>,
    pub snapshot_policy: SnapshotPolicy,
    pub capacity: NonZeroUsize,
}

impl From<&MonitorConfig> for TrackerSettings {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            ignore: cfg.ignore.clone(),
            snapshot_policy: cfg.snapshot_recording,
            capacity: cfg.trace_capacity(),
        }
    }
}

/// Records derived from one delivery.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Observation {
    /// The delivery belonged to monitor-internal traffic and was skipped.
    pub internal: bool,
    /// Present only when this delivery closed the transaction.
    pub transaction: Option<Transaction>,
    pub step: Option<Step>,
    /// `false` when the step repeats the previous hop and must not be stored.
    pub step_is_new: bool,
    pub logs: Vec<LogEntry>,
    /// Present only when the snapshot policy selects this hop.
    pub snapshot: Option<Snapshot>,
}

impl Observation {
    fn skipped() -> Self {
        Self {
            internal: true,
            ..Self::default()
        }
    }
}

type SharedTrace = Arc<AsyncMutex<MessageTrace>>;

pub struct CorrelationTracker {
    settings: TrackerSettings,
    traces: Mutex<LruCache<String, SharedTrace>>,
}

impl CorrelationTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        let traces = Mutex::new(LruCache::unbounded());
        Self { settings, traces }
    }

    /// Number of message traces currently held.
    pub fn tracked(&self) -> usize {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for exclusive access to the trace of `message_id`, creating it
    /// on first sight.
    ///
    /// Idle traces beyond capacity are evicted, least recently used first. A
    /// trace that is locked or awaited is never evicted; while all of them
    /// are busy the cache grows past capacity.
    pub async fn lock(&self, message_id: &str) -> TraceGuard {
        let entry = {
            let mut traces = self.traces.lock().unwrap_or_else(PoisonError::into_inner);
            match traces.get(message_id) {
                Some(entry) => entry.clone(),
                None => {
                    let entry = Arc::new(AsyncMutex::new(MessageTrace::default()));
                    traces.put(message_id.to_string(), entry.clone());
                    self.evict_idle(&mut traces);
                    entry
                }
            }
        };
        entry.lock_owned().await
    }

    fn evict_idle(&self, traces: &mut LruCache<String, SharedTrace>) {
        while traces.len() > self.settings.capacity.get() {
            // Only the cache holds an idle trace.
            let idle = traces
                .iter()
                .rev()
                .find(|(_, entry)| Arc::strong_count(entry) == 1)
                .map(|(id, _)| id.clone());
            let Some(id) = idle else {
                debug!(tracked = traces.len(), "All message traces busy, exceeding capacity");
                return;
            };
            traces.pop(&id);
            debug!(message_id = %id, "Evicted idle message trace");
        }
    }

    /// Locks the trace and observes a single delivery.
    pub async fn observe(&self, event: &mut DeliveryEvent, now: i64) -> Observation {
        let mut trace = self.lock(&event.msg.id).await;
        self.observe_locked(&mut trace, event, now)
    }

    /// Derives all records for `event`. The caller must hold the trace lock
    /// for `event.msg.id`.
    ///
    /// Clears `event.msg.log` once logs have been extracted, before the
    /// snapshot is taken.
    pub fn observe_locked(
        &self,
        trace: &mut MessageTrace,
        event: &mut DeliveryEvent,
        now: i64,
    ) -> Observation {
        let source_type = event.source.node.node_type.as_str();
        if source_type == MONITOR_NODE_TYPE || self.settings.ignore.iter().any(|t| t == source_type)
        {
            trace.internal = true;
        }
        if trace.internal {
            counter!("monitor_events_ignored_total").increment(1);
            return Observation::skipped();
        }
        counter!("monitor_events_observed_total").increment(1);

        let hop = event.hop_key();
        if trace.first_hop.is_none() {
            trace.first_hop = Some(hop.clone());
        }
        if event.is_terminal() {
            trace.last_hop = Some(hop.clone());
        }
        let record_snapshot = self.records_snapshot(trace, &hop);

        let mut observation = Observation::default();

        match derive_transaction(trace, event, now) {
            Ok(closed) => {
                if closed.is_some() {
                    counter!("monitor_transactions_closed_total").increment(1);
                }
                observation.transaction = closed;
            }
            Err(err) => warn!(hop = %hop, error = %err, "Failed to derive transaction"),
        }

        let snapshot_id = record_snapshot.then(|| hop.clone());
        match derive_step(event, now, snapshot_id) {
            Ok(step) => {
                observation.step_is_new = trace.previous_hop.as_deref() != Some(hop.as_str());
                if observation.step_is_new {
                    trace.previous_hop = Some(hop.clone());
                } else {
                    counter!("monitor_steps_duplicate_total").increment(1);
                    debug!(hop = %hop, "Repeated hop, step not recorded again");
                }
                observation.step = Some(step);
            }
            Err(err) => warn!(hop = %hop, error = %err, "Failed to derive step"),
        }

        match derive_logs(event, now) {
            Ok(logs) => observation.logs = logs,
            Err(err) => warn!(hop = %hop, error = %err, "Failed to derive logs"),
        }
        event.msg.log = None;

        if record_snapshot {
            match derive_snapshot(event, now) {
                Ok(snapshot) => observation.snapshot = Some(snapshot),
                Err(err) => warn!(hop = %hop, error = %err, "Failed to derive snapshot"),
            }
        }

        observation
    }

    fn records_snapshot(&self, trace: &MessageTrace, hop: &str) -> bool {
        match self.settings.snapshot_policy {
            SnapshotPolicy::All => true,
            SnapshotPolicy::None => false,
            SnapshotPolicy::FirstAndLast => {
                trace.first_hop.as_deref() == Some(hop) || trace.last_hop.as_deref() == Some(hop)
            }
        }
    }
}

fn require_message_id(event: &DeliveryEvent) -> Result<&str, CorrelationError> {
    let id = event.message_id();
    if id.is_empty() {
        return Err(CorrelationError::MissingMessageId);
    }
    Ok(id)
}

fn derive_transaction(
    trace: &mut MessageTrace,
    event: &DeliveryEvent,
    now: i64,
) -> Result<Option<Transaction>, CorrelationError> {
    let id = require_message_id(event)?;
    let transaction = trace
        .open
        .get_or_insert_with(|| Transaction::open(id, now));

    if let Some(receiver) = event.msg.receiver.as_deref().filter(|r| !r.is_empty()) {
        transaction.add_receiver(receiver);
    }
    if let Some(sender) = event.msg.sender.as_deref().filter(|s| !s.is_empty()) {
        transaction.sender = sender.to_string();
    }

    if !event.is_terminal() {
        return Ok(None);
    }
    Ok(trace.open.take().map(|mut closed| {
        closed.end = Some(now);
        closed
    }))
}

fn derive_step(
    event: &DeliveryEvent,
    now: i64,
    snapshot_id: Option<String>,
) -> Result<Step, CorrelationError> {
    let transaction = require_message_id(event)?.to_string();
    let topic = event
        .msg
        .topic
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(NO_TOPIC)
        .to_string();

    Ok(Step {
        id: event.step_id(),
        topic,
        node: event.source.node.descriptor(),
        transaction,
        created_at: now,
        snapshot_id,
    })
}

fn derive_logs(event: &DeliveryEvent, now: i64) -> Result<Vec<LogEntry>, CorrelationError> {
    let transaction = require_message_id(event)?;
    let items: Vec<&Value> = match event.msg.log.as_ref() {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    };

    Ok(items
        .into_iter()
        .filter_map(|item| log_entry(item, &event.source.node, transaction, now))
        .collect())
}

fn log_entry(item: &Value, source: &NodeInfo, transaction: &str, now: i64) -> Option<LogEntry> {
    let entry = |level: &str, node: &str, text: String| LogEntry {
        level: level.to_string(),
        node: node.to_string(),
        text,
        transaction: transaction.to_string(),
        created_at: now,
    };

    match item {
        Value::Null => None,
        Value::String(text) => Some(entry(DEFAULT_LOG_LEVEL, source.display_name(), text.clone())),
        Value::Object(fields) => {
            let str_field = |name: &str| {
                fields
                    .get(name)
                    .and_then(Value::as_str)
                    .filter(|v| !v.is_empty())
            };
            let text = match fields.get("text") {
                Some(Value::String(text)) if !text.is_empty() => text.clone(),
                Some(Value::Null) | None => MISSING_LOG_TEXT.to_string(),
                Some(Value::String(_)) => MISSING_LOG_TEXT.to_string(),
                Some(other) => other.to_string(),
            };
            Some(entry(
                str_field("level").unwrap_or(DEFAULT_LOG_LEVEL),
                str_field("node").unwrap_or(source.display_name()),
                text,
            ))
        }
        other => Some(entry(DEFAULT_LOG_LEVEL, source.display_name(), other.to_string())),
    }
}

fn derive_snapshot(event: &DeliveryEvent, now: i64) -> Result<Snapshot, CorrelationError> {
    let transaction = require_message_id(event)?.to_string();
    let mut msg = serde_json::to_value(&event.msg)?;
    if let Value::Object(fields) = &mut msg {
        fields.remove("req");
        fields.remove("res");
    }

    Ok(Snapshot {
        id: event.hop_key(),
        transaction,
        node: event.source.node.descriptor(),
        created_at: now,
        msg,
    })
}
