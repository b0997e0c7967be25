//! Error types for configuration loading and request handling.
//!
//! Configuration errors are fatal at startup. Everything under
//! [`AgentError`] is caught at the HTTP boundary and mapped to a JSON body —
//! no panic is allowed to escape a handler.

use serde_json::{json, Value};

/// Failure loading or validating `architecture.yaml`. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    NotFound { path: String },

    #[error("error reading configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing YAML configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("node id {0:?} not found in topology configuration")]
    UnknownSelfId(String),
}

/// Failure invoking the local or remote FaaS gateway, or forwarding to a
/// peer agent.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ExecutionError {
    #[error("local FaaS execution failed: {0}")]
    Local(String),

    #[error("remote FaaS execution to {target_node:?} failed: {message}")]
    Remote {
        message: String,
        target_node: String,
    },

    #[error("forwarding request failed: {0}")]
    Forward(String),

    #[error("request timed out after 60s")]
    Timeout,
}

/// Everything a router call can fail with, surfaced to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid architecture: {0}")]
    InvalidArchitecture(String),

    #[error("wrong role for this endpoint")]
    WrongRole,

    #[error("no candidate available: {0}")]
    NoCandidate(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl AgentError {
    /// HTTP status code this error should be reported under.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            AgentError::UnsupportedArchitecture(_) => StatusCode::BAD_REQUEST,
            AgentError::MissingField(_) => StatusCode::BAD_REQUEST,
            AgentError::InvalidArchitecture(_) => StatusCode::BAD_REQUEST,
            AgentError::WrongRole => StatusCode::FORBIDDEN,
            AgentError::NoCandidate(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error body, carrying `execution_location`/`target_node` when the
    /// failure came from the execution client.
    pub fn to_json(&self) -> Value {
        match self {
            AgentError::Execution(ExecutionError::Remote {
                message,
                target_node,
            }) => json!({
                "error": message,
                "status": "failed",
                "execution_location": "remote",
                "target_node": target_node,
            }),
            AgentError::Execution(ExecutionError::Local(message)) => json!({
                "error": message,
                "status": "failed",
                "execution_location": "local",
            }),
            other => json!({ "error": other.to_string(), "status": "failed" }),
        }
    }
}
