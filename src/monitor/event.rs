//! Delivery events handed over by the host runtime.
//!
//! A delivery is one message crossing one wire: it leaves `source` on a given
//! output port and arrives at `destination`. The message body is kept as an
//! open JSON object; only the fields the monitor reads are typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use super::records::NodeDescriptor;

/// A node as described by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NodeInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NodeInfo {
    /// The node name, falling back to the id for unnamed nodes.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }

    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: self.id.clone(),
            node_type: self.node_type.clone(),
            name: self.display_name().to_string(),
        }
    }
}

/// The sending side of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeliverySource {
    pub node: NodeInfo,
    #[serde(default)]
    pub port: u32,
}

/// The receiving side of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryDestination {
    pub node: NodeInfo,
    /// Number of outgoing wires of the destination node; zero marks the
    /// end of the flow.
    #[serde(default)]
    pub wire_count: usize,
}

/// The message travelling through the flow.
///
/// Unknown fields are preserved verbatim so snapshots record the full body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    #[serde(rename = "_msgid")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Log payload attached by a node; cleared once the monitor has read it.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub log: Option<Value>,
    #[serde(flatten)]
    #[schema(ignore)]
    pub body: Map<String, Value>,
}

impl Message {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: None,
            sender: None,
            receiver: None,
            log: None,
            body: Map::new(),
        }
    }
}

/// A message crossing one wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryEvent {
    pub source: DeliverySource,
    pub destination: DeliveryDestination,
    pub msg: Message,
}

impl DeliveryEvent {
    pub fn message_id(&self) -> &str {
        &self.msg.id
    }

    /// `<message id>-<source node id>-<port>`: identifies this hop of this
    /// message, and doubles as the snapshot id.
    pub fn hop_key(&self) -> String {
        format!("{}-{}", self.msg.id, self.step_id())
    }

    /// `<source node id>-<port>`: identifies the step within a transaction.
    pub fn step_id(&self) -> String {
        format!("{}-{}", self.source.node.id, self.source.port)
    }

    pub fn is_terminal(&self) -> bool {
        self.destination.wire_count == 0
    }
}
