//! # Transaction replay
//!
//! Rebuilds the part of the deployed topology between two nodes as a new
//! flow, wires a trigger carrying the recorded payload in front of it, and
//! deploys it through the host's admin API so an operator can re-run a
//! transaction by hand.

pub mod admin;
pub mod flow;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

pub use admin::{AdminApiError, AdminClient, AdminCredentials};
pub use flow::{ActiveFlowNode, FlowDefinition, Terminal};

use crate::config::AdminConfig;

/// Fields a replay request must declare, in reporting order.
pub const REQUIRED_FIELDS: [&str; 4] = ["first_node", "last_node", "payload", "input_type"];

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Payload is missing one or more mandatory fields: {}", .0.join(","))]
    MissingFields(Vec<&'static str>),
    #[error("Invalid replay request: {0}")]
    InvalidRequest(serde_json::Error),
    #[error("Start node {0} is not part of any deployed flow")]
    StartNodeNotFound(String),
    #[error("Flow topology contains a cycle through node {0}")]
    CycleDetected(String),
    #[error(transparent)]
    Admin(#[from] AdminApiError),
}

/// Required fields absent from `body`. Declared-but-null counts as present.
pub fn missing_fields(body: &Value) -> Vec<&'static str> {
    match body.as_object() {
        Some(fields) => REQUIRED_FIELDS
            .into_iter()
            .filter(|field| !fields.contains_key(*field))
            .collect(),
        None => REQUIRED_FIELDS.to_vec(),
    }
}

/// Body of `POST {base}/replay/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReplayRequest {
    pub first_node: String,
    /// Terminal node id or list of ids; empty for no debug output
    #[schema(value_type = Option<String>)]
    pub last_node: Option<Terminal>,
    #[schema(value_type = Object)]
    pub payload: Value,
    /// Payload type of the trigger node, e.g. `json` or `str`
    pub input_type: String,
    /// Informational only
    #[serde(default)]
    pub send: bool,
}

impl ReplayRequest {
    /// Validates field presence, then decodes.
    pub fn parse(body: Value) -> Result<Self, ReplayError> {
        let missing = missing_fields(&body);
        if !missing.is_empty() {
            return Err(ReplayError::MissingFields(missing));
        }
        serde_json::from_value(body).map_err(ReplayError::InvalidRequest)
    }

    fn terminal(&self) -> Option<&Terminal> {
        self.last_node.as_ref().filter(|t| t.is_specified())
    }

    fn last_node_label(&self) -> String {
        self.last_node
            .as_ref()
            .map(Terminal::to_string)
            .unwrap_or_default()
    }

    /// Reconstructs the replay flow against the deployed `topology`.
    pub fn build_flow(&self, topology: &[ActiveFlowNode]) -> Result<FlowDefinition, ReplayError> {
        let terminal = self.terminal();
        let copies = flow::reconstruct(&self.first_node, terminal, topology)?;
        let nodes = flow::splice_io(copies, &self.payload, &self.input_type, terminal.is_some());
        Ok(FlowDefinition::new(nodes))
    }
}

/// Response of a successful replay.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReplayOutcome {
    pub msg: String,
    pub flow: FlowDefinition,
}

pub struct ReplayService {
    admin: AdminClient,
    credentials: AdminCredentials,
}

impl ReplayService {
    pub fn new(admin: AdminClient, credentials: AdminCredentials) -> Self {
        Self { admin, credentials }
    }

    pub fn from_config(config: &AdminConfig) -> Result<Self, ReplayError> {
        let admin = AdminClient::new(
            &config.public_url,
            Duration::from_millis(config.request_timeout_ms),
        )?;
        Ok(Self::new(
            admin,
            AdminCredentials {
                client_id: config.client_id.clone(),
                username: config.username.clone(),
                password: config.password.clone(),
            },
        ))
    }

    /// Validates `body`, rebuilds the flow and deploys it.
    ///
    /// Validation happens before any admin API call.
    pub async fn replay(&self, body: Value) -> Result<ReplayOutcome, ReplayError> {
        let request = ReplayRequest::parse(body)?;
        let last_node = request.last_node_label();

        info!(
            first_node = %request.first_node,
            last_node = %last_node,
            "Replaying transaction"
        );
        info!(
            "Sending message to target system is {}",
            if request.send { "enabled" } else { "disabled" }
        );

        let token = self.admin.token(&self.credentials).await?;
        let topology = self.admin.deployed_nodes(&token).await?;
        let flow = request.build_flow(&topology)?;
        let flow_id = self.admin.deploy_flow(&token, &flow).await?;

        info!(flow_id = %flow_id, nodes = flow.nodes.len(), "Replay flow deployed");
        Ok(ReplayOutcome {
            msg: format!(
                "Replaying transaction from {} to {}. Flow id: {}",
                request.first_node, last_node, flow_id
            ),
            flow,
        })
    }
}
