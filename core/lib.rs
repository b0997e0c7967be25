//! Per-node scheduling agent for a federated FaaS fabric.
//!
//! The agent decides, for each inbound invocation, whether to execute the
//! named function locally, forward it to a peer controller, or offload it to
//! another zone/node — under one of four placement architectures
//! (centralized, federated, decentralized, dynamic). State lives entirely in
//! memory: a restart is a cold cache.

pub mod config;
pub mod error;
pub mod execution;
pub mod http;
pub mod load;
pub mod router;
pub mod selector;
pub mod store;
pub mod tail;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique key for a node in the topology.
pub type NodeId = String;

/// Role a node plays in the fabric. Only controllers may initiate scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    CloudController,
    EdgeController,
    Worker,
}

/// An immutable member of the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
    pub role: Role,
    pub zone: String,
}

/// Mapping from node-id to `Node`, with one node marked as "self".
///
/// Invariant: `self_id` is always present as a key in `nodes`.
#[derive(Debug, Clone)]
pub struct Topology {
    pub nodes: HashMap<NodeId, Node>,
    pub self_id: NodeId,
}

impl Topology {
    pub fn self_node(&self) -> &Node {
        self.nodes
            .get(&self.self_id)
            .expect("invariant: self_id is present in nodes")
    }

    pub fn nodes_by_role(&self, role: Role) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.role == role).collect()
    }

    pub fn nodes_by_zone<'a>(&'a self, zone: &str) -> Vec<&'a Node> {
        self.nodes.values().filter(|n| n.zone == zone).collect()
    }

    pub fn all_nodes(&self) -> Vec<&Node> {
        self.nodes.values().collect()
    }
}

/// Placement architecture. `Dynamic` is resolved to one of the other three
/// before the router ever dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Centralized,
    Federated,
    Decentralized,
    Dynamic,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Centralized => "centralized",
            Arch::Federated => "federated",
            Arch::Decentralized => "decentralized",
            Arch::Dynamic => "dynamic",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Arch> {
        match s {
            "centralized" => Some(Arch::Centralized),
            "federated" => Some(Arch::Federated),
            "decentralized" => Some(Arch::Decentralized),
            "dynamic" => Some(Arch::Dynamic),
            _ => None,
        }
    }
}

/// An inbound invocation, as parsed off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default = "default_fn_name")]
    pub fn_name: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub deadline: String,
    #[serde(default)]
    pub hop: u32,
    pub arch: Option<Arch>,
}

fn default_tag() -> String {
    "default".to_string()
}

fn default_fn_name() -> String {
    "hello".to_string()
}

/// The window every sliding-window store trims to.
pub const TIME_WINDOW_SECS: u64 = 60;

/// Hop penalty multiplier applied to latency recorded for forwarded calls.
pub const HOP_PENALTY_ALPHA: f64 = 0.3;

/// Anti-ping-pong bound: at this many hops (or more) a request must execute
/// wherever it currently sits rather than offload again.
pub const HOP_LIMIT: u32 = 2;

/// Below this 1-minute load average, a node prefers to execute locally
/// rather than offload (the system is not busy enough to bother).
pub const LOAD_EXECUTE_LOCAL_THRESHOLD: f64 = 2.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_round_trips_through_json() {
        for (s, a) in [
            ("centralized", Arch::Centralized),
            ("federated", Arch::Federated),
            ("decentralized", Arch::Decentralized),
            ("dynamic", Arch::Dynamic),
        ] {
            let v: Arch = serde_json::from_str(&format!("\"{s}\"")).unwrap();
            assert_eq!(v, a);
            assert_eq!(serde_json::to_string(&a).unwrap(), format!("\"{s}\""));
        }
    }

    #[test]
    fn role_round_trips_with_kebab_case() {
        let v: Role = serde_json::from_str("\"cloud-controller\"").unwrap();
        assert_eq!(v, Role::CloudController);
    }

    #[test]
    fn topology_self_node_lookup() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "n1".to_string(),
            Node {
                id: "n1".to_string(),
                address: "127.0.0.1".to_string(),
                role: Role::Worker,
                zone: "zA".to_string(),
            },
        );
        let topo = Topology {
            nodes,
            self_id: "n1".to_string(),
        };
        assert_eq!(topo.self_node().id, "n1");
    }
}
