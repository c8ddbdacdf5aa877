//! Persisted monitor records.
//!
//! These are the shapes written through a [`crate::store::MonitorStore`] and
//! returned by the query surface. Field names are camelCase on the wire and
//! all timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Sender recorded until a message declares one.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Identity of a node as recorded on steps and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NodeDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node name, or the node id when the node is unnamed
    pub name: String,
}

/// One logical message's end-to-end journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub start: i64,
    pub end: Option<i64>,
    pub sender: String,
    /// Unique receiver names, kept sorted
    #[serde(default)]
    pub receivers: Vec<String>,
}

impl Transaction {
    pub fn open(id: impl Into<String>, start: i64) -> Self {
        Self {
            id: id.into(),
            start,
            end: None,
            sender: UNKNOWN_SENDER.to_string(),
            receivers: Vec::new(),
        }
    }

    /// Adds `receiver` to the set; returns `false` when already present.
    pub fn add_receiver(&mut self, receiver: &str) -> bool {
        match self.receivers.binary_search_by(|r| r.as_str().cmp(receiver)) {
            Ok(_) => false,
            Err(pos) => {
                self.receivers.insert(pos, receiver.to_string());
                true
            }
        }
    }

    /// Set-union of another receiver list into this one.
    pub fn merge_receivers<'a>(&mut self, receivers: impl IntoIterator<Item = &'a String>) {
        for receiver in receivers {
            self.add_receiver(receiver);
        }
    }
}

/// One hop of a transaction through a node output port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// `<source node id>-<port>`
    pub id: String,
    pub topic: String,
    pub node: NodeDescriptor,
    pub transaction: String,
    pub created_at: i64,
    pub snapshot_id: Option<String>,
}

/// A log line emitted by a node and attached to a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: String,
    pub node: String,
    pub text: String,
    pub transaction: String,
    pub created_at: i64,
}

/// Full copy of a message as it left a node output port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Hop key `<message id>-<source node id>-<port>`
    pub id: String,
    pub transaction: String,
    pub node: NodeDescriptor,
    pub created_at: i64,
    #[schema(value_type = Object)]
    pub msg: Value,
}

/// A transaction joined with its steps, logs and (when requested) snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<Vec<Snapshot>>,
}

impl TransactionView {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            steps: Vec::new(),
            logs: Vec::new(),
            snapshots: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.transaction.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receivers_behave_as_a_set() {
        let mut tx = Transaction::open("m1", 10);
        assert!(tx.add_receiver("billing"));
        assert!(tx.add_receiver("audit"));
        assert!(!tx.add_receiver("billing"));
        assert_eq!(tx.receivers, vec!["audit", "billing"]);

        tx.merge_receivers(&vec!["crm".to_string(), "audit".to_string()]);
        assert_eq!(tx.receivers, vec!["audit", "billing", "crm"]);
    }

    #[test]
    fn records_serialize_camel_case() {
        let step = Step {
            id: "n1-0".to_string(),
            topic: "None".to_string(),
            node: NodeDescriptor {
                id: "n1".to_string(),
                node_type: "function".to_string(),
                name: "n1".to_string(),
            },
            transaction: "m1".to_string(),
            created_at: 5,
            snapshot_id: None,
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["createdAt"], 5);
        assert_eq!(value["snapshotId"], Value::Null);
        assert_eq!(value["node"]["type"], "function");
    }

    #[test]
    fn view_flattens_transaction_fields() {
        let mut view = TransactionView::new(Transaction::open("m1", 1));
        view.transaction.end = Some(2);
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["id"], "m1");
        assert_eq!(value["end"], 2);
        assert_eq!(value["steps"], json!([]));
        assert!(value.get("snapshots").is_none());

        let back: TransactionView = serde_json::from_value(value).unwrap();
        assert_eq!(back, view);
    }
}
