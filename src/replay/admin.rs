//! Client for the host runtime's admin API.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::flow::{ActiveFlowNode, FlowDefinition};

#[derive(Debug, Error)]
pub enum AdminApiError {
    #[error("admin API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("admin API responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("admin API token response did not contain an access token")]
    MissingToken,
    #[error("admin API did not return the id of the deployed flow")]
    MissingFlowId,
}

/// Password-grant credentials for the admin API.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    grant_type: &'a str,
    scope: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// `GET /flows` answers either with a bare node array or, in the versioned
/// form, with `{ "rev": ..., "flows": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DeployedFlows {
    Versioned { flows: Vec<ActiveFlowNode> },
    Plain(Vec<ActiveFlowNode>),
}

#[derive(Deserialize)]
struct DeployResponse {
    id: Option<String>,
}

#[derive(Clone)]
pub struct AdminClient {
    http: Client,
    base_url: String,
}

impl AdminClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AdminApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Obtains a bearer token via the password grant.
    pub async fn token(&self, credentials: &AdminCredentials) -> Result<String, AdminApiError> {
        let body = TokenRequest {
            client_id: &credentials.client_id,
            grant_type: "password",
            scope: "*",
            username: &credentials.username,
            password: &credentials.password,
        };

        let response = check(self.http.post(self.url("/auth/token")).json(&body).send().await?).await?;
        let token: TokenResponse = response.json().await?;
        token.access_token.ok_or(AdminApiError::MissingToken)
    }

    /// Every node of every deployed flow.
    pub async fn deployed_nodes(&self, token: &str) -> Result<Vec<ActiveFlowNode>, AdminApiError> {
        let response = check(
            self.http
                .get(self.url("/flows"))
                .bearer_auth(token)
                .send()
                .await?,
        )
        .await?;

        let nodes = match response.json::<DeployedFlows>().await? {
            DeployedFlows::Versioned { flows } => flows,
            DeployedFlows::Plain(flows) => flows,
        };
        debug!(nodes = nodes.len(), "Fetched deployed flows");
        Ok(nodes)
    }

    /// Adds `flow` as a new flow and returns the id the runtime assigned.
    pub async fn deploy_flow(
        &self,
        token: &str,
        flow: &FlowDefinition,
    ) -> Result<String, AdminApiError> {
        let response = check(
            self.http
                .post(self.url("/flow"))
                .bearer_auth(token)
                .json(flow)
                .send()
                .await?,
        )
        .await?;

        let deployed: DeployResponse = response.json().await?;
        deployed.id.ok_or(AdminApiError::MissingFlowId)
    }
}

async fn check(response: Response) -> Result<Response, AdminApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AdminApiError::Status {
        status: status.as_u16(),
        body: truncate(body),
    })
}

fn truncate(mut body: String) -> String {
    const MAX: usize = 512;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

