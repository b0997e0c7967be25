//! Execution client — invokes the local or remote FaaS gateway, and forwards
//! request descriptors to peer agents. All three operations are synchronous
//! from the caller's point of view (`.await`ed) with a 60s timeout; network
//! failure is reported as a structured error, never a panic.

use crate::error::ExecutionError;
use crate::{Node, RequestDescriptor};
use serde_json::Value;
use std::time::Duration;

const GATEWAY_PORT: u16 = 31112;
const AGENT_PORT: u16 = 31113;
const TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of invoking a function. `Failure` carries a full [`ExecutionError`]
/// so the HTTP layer can report `execution_location`/`target_node` rather
/// than a bare message.
#[derive(Debug, Clone)]
pub enum InvokeOutcome {
    Success { resp: String },
    Failure { error: ExecutionError },
}

impl InvokeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvokeOutcome::Success { .. })
    }
}

pub struct ExecutionClient {
    client: reqwest::Client,
}

impl ExecutionClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .expect("reqwest client builder never fails for this configuration");
        ExecutionClient { client }
    }

    /// `POST http://127.0.0.1:31112/function/<fn_name>` with `payload` as
    /// the raw body.
    pub async fn invoke_local(&self, fn_name: &str, payload: &str) -> InvokeOutcome {
        let url = format!("http://127.0.0.1:{GATEWAY_PORT}/function/{fn_name}");
        self.post_raw(&url, payload, None).await
    }

    /// `POST http://<target.address>:31112/function/<fn_name>`.
    pub async fn invoke_remote(&self, fn_name: &str, payload: &str, target: &Node) -> InvokeOutcome {
        let url = format!(
            "http://{}:{GATEWAY_PORT}/function/{fn_name}",
            target.address
        );
        self.post_raw(&url, payload, Some(&target.id)).await
    }

    /// `target_node` is `None` for `invoke_local` and `Some(&target.id)` for
    /// `invoke_remote`, so a failure always carries the right
    /// `execution_location`.
    async fn post_raw(&self, url: &str, payload: &str, target_node: Option<&str>) -> InvokeOutcome {
        let fail = |message: String| InvokeOutcome::Failure {
            error: match target_node {
                Some(target_node) => ExecutionError::Remote {
                    message,
                    target_node: target_node.to_string(),
                },
                None => ExecutionError::Local(message),
            },
        };

        match self
            .client
            .post(url)
            .body(payload.to_string())
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    match resp.text().await {
                        Ok(body) => InvokeOutcome::Success { resp: body },
                        Err(e) => fail(format!("failed to read response body: {e}")),
                    }
                } else {
                    fail(format!("gateway returned status {}", resp.status()))
                }
            }
            Err(e) if e.is_timeout() => fail(ExecutionError::Timeout.to_string()),
            Err(e) => fail(e.to_string()),
        }
    }

    /// `POST <url>` (a peer's `/entry` or `/schedule`) with the descriptor
    /// JSON-serialized. Returns the peer's JSON body and HTTP status code.
    pub async fn forward(
        &self,
        url: &str,
        descriptor: &RequestDescriptor,
    ) -> Result<(u16, Value), ExecutionError> {
        let resp = self
            .client
            .post(url)
            .json(descriptor)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutionError::Timeout
                } else {
                    ExecutionError::Forward(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        let body = resp
            .json::<Value>()
            .await
            .map_err(|e| ExecutionError::Forward(format!("invalid JSON response: {e}")))?;
        Ok((status, body))
    }

    /// Convenience for building a peer URL from a node's address.
    pub fn agent_url(address: &str, path: &str) -> String {
        format!("http://{address}:{AGENT_PORT}{path}")
    }
}

impl Default for ExecutionClient {
    fn default() -> Self {
        Self::new()
    }
}
