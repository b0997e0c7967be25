//! Configuration loading — `architecture.yaml`, parsed with `serde_yaml`.
//!
//! ```yaml
//! architecture: centralized|federated|decentralized|dynamic
//! node: { id: <string> }
//! topology:
//!   - { id, address, role, zone }
//! ```
//!
//! Missing required fields or a `node.id` absent from `topology` are
//! rejected here, before the agent ever opens a socket.

use crate::error::ConfigError;
use crate::{Arch, Node, Topology};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawConfig {
    architecture: Arch,
    node: RawSelf,
    topology: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct RawSelf {
    id: String,
}

/// The fully validated configuration for this agent process.
#[derive(Debug, Clone)]
pub struct Config {
    pub initial_architecture: Arch,
    pub topology: Topology,
}

impl Config {
    /// Load and validate configuration from a YAML file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();

        let contents = std::fs::read_to_string(path_ref).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path_str.clone(),
                }
            } else {
                ConfigError::Io {
                    path: path_str.clone(),
                    source,
                }
            }
        })?;

        Self::from_yaml_str(&contents)
    }

    /// Parse and validate configuration from an in-memory YAML document.
    /// Split out from [`Config::load`] so tests can exercise validation
    /// without touching the filesystem.
    pub fn from_yaml_str(contents: &str) -> Result<Config, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(contents)?;

        let mut nodes = std::collections::HashMap::with_capacity(raw.topology.len());
        for node in raw.topology {
            nodes.insert(node.id.clone(), node);
        }

        if !nodes.contains_key(&raw.node.id) {
            return Err(ConfigError::UnknownSelfId(raw.node.id));
        }

        Ok(Config {
            initial_architecture: raw.architecture,
            topology: Topology {
                nodes,
                self_id: raw.node.id,
            },
        })
    }
}
