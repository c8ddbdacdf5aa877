//! Sub-flow reconstruction over the deployed node topology.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use utoipa::ToSchema;

use super::ReplayError;

pub const COPY_SUFFIX: &str = ".copy";
pub const RECONSTRUCTED_FLOW_ID: &str = "reconstructed-flow";
pub const TRIGGER_NODE_ID: &str = "replay-trigger-in";
pub const DEBUG_NODE_ID: &str = "replay-debug-out";
const TRIGGER_LABEL: &str = "Replay transaction";
/// Horizontal distance between a synthetic node and its neighbour.
const NODE_SPACING: f64 = 240.0;

/// A node of the deployed topology as returned by the admin API.
///
/// Only the fields the reconstruction needs are typed; everything else is
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveFlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Out-edges per output port
    #[serde(default)]
    pub wires: Vec<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActiveFlowNode {
    fn first_port(&self) -> &[String] {
        self.wires.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// Copy with a suffixed id whose only port targets suffixed ids.
    fn renamed_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.id = copied_id(&self.id);
        copy.wires = vec![self.first_port().iter().map(|t| copied_id(t)).collect()];
        copy
    }
}

fn copied_id(id: &str) -> String {
    format!("{id}{COPY_SUFFIX}")
}

/// One or several terminal node ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Terminal {
    One(String),
    Many(Vec<String>),
}

impl Terminal {
    pub fn contains(&self, id: &str) -> bool {
        match self {
            Terminal::One(terminal) => terminal == id,
            Terminal::Many(terminals) => terminals.iter().any(|t| t == id),
        }
    }

    /// An empty id or list means "no terminal given".
    pub fn is_specified(&self) -> bool {
        match self {
            Terminal::One(terminal) => !terminal.is_empty(),
            Terminal::Many(terminals) => !terminals.is_empty(),
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::One(terminal) => f.write_str(terminal),
            Terminal::Many(terminals) => f.write_str(&terminals.join(",")),
        }
    }
}

/// Deployable flow as accepted by the admin API's `POST /flow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FlowDefinition {
    pub id: String,
    pub label: String,
    pub disabled: bool,
    pub info: String,
    #[schema(value_type = Vec<Object>)]
    pub env: Vec<Value>,
    #[schema(value_type = Vec<Object>)]
    pub nodes: Vec<ActiveFlowNode>,
}

impl FlowDefinition {
    pub fn new(nodes: Vec<ActiveFlowNode>) -> Self {
        Self {
            id: RECONSTRUCTED_FLOW_ID.to_string(),
            label: "Reconstructed flow".to_string(),
            disabled: false,
            info: format!(
                "This flow was reconstructed automatically by the transaction monitor. \
                 If found, please delete it. Timestamp: {}",
                Utc::now().to_rfc3339()
            ),
            env: Vec::new(),
            nodes,
        }
    }
}

enum Frame<'a> {
    Enter(&'a str),
    Leave(&'a str),
}

/// Copies the sub-graph reachable from `first` over first-port wires.
///
/// Descent stops at terminal nodes and at nodes without first-port wires.
/// Targets missing from the topology are skipped. Nodes reached through
/// several branches are copied once; a node reached again on its own path
/// is a cycle and fails the reconstruction.
pub fn reconstruct(
    first: &str,
    terminal: Option<&Terminal>,
    topology: &[ActiveFlowNode],
) -> Result<Vec<ActiveFlowNode>, ReplayError> {
    let index: HashMap<&str, &ActiveFlowNode> =
        topology.iter().map(|node| (node.id.as_str(), node)).collect();
    if !index.contains_key(first) {
        return Err(ReplayError::StartNodeNotFound(first.to_string()));
    }

    let mut copies = Vec::new();
    let mut on_path = HashSet::new();
    let mut copied = HashSet::new();
    let mut stack = vec![Frame::Enter(first)];

    while let Some(frame) = stack.pop() {
        let id = match frame {
            Frame::Leave(id) => {
                on_path.remove(id);
                continue;
            }
            Frame::Enter(id) => id,
        };

        if on_path.contains(id) {
            return Err(ReplayError::CycleDetected(id.to_string()));
        }
        if copied.contains(id) {
            continue;
        }
        let Some(node) = index.get(id) else {
            continue;
        };

        copied.insert(id);
        on_path.insert(id);
        copies.push(node.renamed_copy());
        stack.push(Frame::Leave(id));

        let is_terminal = terminal.is_some_and(|t| t.contains(id));
        if !is_terminal {
            // Reversed so branches are walked in wire order.
            for target in node.first_port().iter().rev() {
                stack.push(Frame::Enter(target.as_str()));
            }
        }
    }

    Ok(copies)
}

/// Prepends the trigger node feeding `payload` into the first copy and,
/// when `with_debug` is set, appends a debug sink fed by the last copy.
pub fn splice_io(
    mut nodes: Vec<ActiveFlowNode>,
    payload: &Value,
    input_type: &str,
    with_debug: bool,
) -> Vec<ActiveFlowNode> {
    let Some(first) = nodes.first() else {
        return nodes;
    };

    let payload = match payload {
        Value::String(text) => text.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "{}".to_string()),
    };
    let trigger = ActiveFlowNode {
        id: TRIGGER_NODE_ID.to_string(),
        node_type: "inject".to_string(),
        name: Some(TRIGGER_LABEL.to_string()),
        x: first.x - NODE_SPACING,
        y: first.y,
        wires: vec![vec![first.id.clone()]],
        extra: object(json!({
            "props": [{ "p": "payload" }, { "p": "topic", "vt": "str" }],
            "repeat": "",
            "crontab": "",
            "once": false,
            "onceDelay": 0.1,
            "topic": TRIGGER_LABEL,
            "payload": payload,
            "payloadType": input_type,
        })),
    };

    if with_debug {
        if let Some(last) = nodes.last_mut() {
            let debug = ActiveFlowNode {
                id: DEBUG_NODE_ID.to_string(),
                node_type: "debug".to_string(),
                name: Some("Replay debug out".to_string()),
                x: last.x + NODE_SPACING,
                y: last.y,
                wires: Vec::new(),
                extra: object(json!({
                    "active": true,
                    "tosidebar": true,
                    "console": false,
                    "tostatus": false,
                    "complete": "payload",
                    "targetType": "msg",
                    "statusVal": "",
                    "statusType": "auto",
                })),
            };
            last.wires = vec![vec![DEBUG_NODE_ID.to_string()]];
            nodes.push(debug);
        }
    }

    nodes.insert(0, trigger);
    nodes
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
