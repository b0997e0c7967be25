//! Placement state machine.
//!
//! Given a request descriptor with a concrete architecture and the local
//! node's role, dispatches to one of three sub-machines (centralized /
//! federated / decentralized), each a pure decision procedure over the
//! topology, the sliding-window stores, and the load probe. `entry` wraps
//! the whole dispatch with end-to-end timing and tail-scheduler feedback;
//! `schedule` is a thinner entry point used for direct `/schedule` calls
//! and performs neither.
//!
//! Latency is recorded only for calls that actually complete successfully
//! — a downstream failure must not poison the selector with a misleading
//! sample.

use crate::error::{AgentError, ExecutionError};
use crate::execution::{ExecutionClient, InvokeOutcome};
use crate::load::LoadProbe;
use crate::selector::TargetSelector;
use crate::store::{ResponseLog, TotalTimeLog};
use crate::tail::TailRatioScheduler;
use crate::{
    Arch, Node, RequestDescriptor, Role, Topology, HOP_LIMIT, HOP_PENALTY_ALPHA,
    LOAD_EXECUTE_LOCAL_THRESHOLD,
};
use axum::http::StatusCode;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct Router {
    topology: Topology,
    architecture: RwLock<Arch>,
    response_log: ResponseLog,
    total_time_log: TotalTimeLog,
    tail_scheduler: TailRatioScheduler,
    execution: ExecutionClient,
    load_probe: LoadProbe,
}

impl Router {
    pub fn new(topology: Topology, initial_architecture: Arch) -> Self {
        Router {
            topology,
            architecture: RwLock::new(initial_architecture),
            response_log: ResponseLog::new(),
            total_time_log: TotalTimeLog::new(),
            tail_scheduler: TailRatioScheduler::new(),
            execution: ExecutionClient::new(),
            load_probe: LoadProbe::new(),
        }
    }

    pub fn architecture(&self) -> Arch {
        *self.architecture.read()
    }

    pub fn set_architecture(&self, arch: Arch) {
        *self.architecture.write() = arch;
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn tail_scheduler(&self) -> &TailRatioScheduler {
        &self.tail_scheduler
    }

    /// `POST /entry` — resolves dynamic architecture, dispatches, then
    /// stamps the response with `total_time`/`hop`/`architecture` and
    /// feeds the tail scheduler.
    pub async fn entry(&self, mut descriptor: RequestDescriptor) -> (StatusCode, Value) {
        let total_start = Instant::now();
        let mut arch = descriptor.arch.unwrap_or_else(|| self.architecture());
        if arch == Arch::Dynamic {
            arch = self.select_dynamic_architecture(&descriptor.fn_name);
        }
        descriptor.arch = Some(arch);

        let (mut response, status) = match arch {
            Arch::Centralized => self.handle_centralized(&descriptor).await,
            Arch::Federated => self.handle_federated(&descriptor).await,
            Arch::Decentralized => self.handle_decentralized(&descriptor).await,
            Arch::Dynamic => unreachable!("dynamic is resolved to a concrete architecture above"),
        };

        let total_time = total_start.elapsed().as_secs_f64();
        if let Value::Object(ref mut map) = response {
            map.insert("total_time".into(), json!(round6(total_time)));
            map.insert("hop".into(), json!(descriptor.hop));
            map.insert("architecture".into(), json!(arch.as_str()));
        }
        self.record_total_time(&descriptor.fn_name, arch, total_time);

        (status, response)
    }

    /// `POST /schedule` — no dynamic resolution, no timing, no
    /// tail-scheduler feedback; only centralized and federated support it.
    pub async fn schedule(&self, descriptor: RequestDescriptor) -> (StatusCode, Value) {
        let arch = descriptor.arch.unwrap_or_else(|| self.architecture());
        match arch {
            Arch::Centralized => self.handle_centralized_scheduling(&descriptor).await,
            Arch::Federated => self.handle_federated_scheduling(&descriptor).await,
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "Unsupported scheduling architecture"}),
            ),
        }
    }

    fn select_dynamic_architecture(&self, fn_name: &str) -> Arch {
        let mut durations = HashMap::new();
        for arch in [Arch::Centralized, Arch::Federated, Arch::Decentralized] {
            let key = format!("{fn_name}_{}", arch.as_str());
            durations.insert(arch, self.total_time_log.recent(&key));
        }
        let weights = self.tail_scheduler.update_ratios(fn_name, &durations);
        self.tail_scheduler.select_arch(weights)
    }

    fn record_total_time(&self, fn_name: &str, arch: Arch, total_time: f64) {
        let key = format!("{fn_name}_{}", arch.as_str());
        self.total_time_log.append(&key, Duration::from_secs_f64(total_time));
        self.tail_scheduler.record_arch_perf(arch, total_time);
    }

    // ---- centralized -----------------------------------------------------

    async fn handle_centralized(&self, params: &RequestDescriptor) -> (Value, StatusCode) {
        let self_node = self.topology.self_node();
        if self_node.role == Role::CloudController {
            let candidates = self.topology.all_nodes();
            let target = TargetSelector::select_target(&candidates, &params.fn_name, &self.response_log);

            let start = Instant::now();
            let outcome = self.execution.invoke_remote(&params.fn_name, &params.payload, target).await;
            let duration = start.elapsed();
            if outcome.is_success() {
                self.response_log.append(&target.id, &params.fn_name, duration);
            }
            (outcome_to_value(&outcome), outcome_status(&outcome))
        } else {
            self.forward_to_controller(params, Role::CloudController, "/schedule").await
        }
    }

    async fn handle_centralized_scheduling(&self, params: &RequestDescriptor) -> (StatusCode, Value) {
        let self_node = self.topology.self_node();
        if self_node.role != Role::CloudController {
            return (
                StatusCode::FORBIDDEN,
                json!({"error": "Edge nodes cannot initiate scheduling in centralized architecture"}),
            );
        }

        let candidates = self.topology.all_nodes();
        let target = TargetSelector::select_target(&candidates, &params.fn_name, &self.response_log);

        let start = Instant::now();
        let outcome = self.execution.invoke_remote(&params.fn_name, &params.payload, target).await;
        let duration = start.elapsed();
        if outcome.is_success() {
            self.response_log.append(&target.id, &params.fn_name, duration);
        }

        (outcome_status(&outcome), outcome_to_value(&outcome))
    }

    // ---- federated ---------------------------------------------------------

    async fn handle_federated(&self, params: &RequestDescriptor) -> (Value, StatusCode) {
        let self_node = self.topology.self_node();
        match self_node.role {
            Role::EdgeController => self.handle_federated_edge_controller(params).await,
            Role::CloudController => {
                let outcome = self.execution.invoke_local(&params.fn_name, &params.payload).await;
                (outcome_to_value(&outcome), outcome_status(&outcome))
            }
            Role::Worker => {
                let zone = self_node.zone.clone();
                let schedulers: Vec<&Node> = self
                    .topology
                    .all_nodes()
                    .into_iter()
                    .filter(|n| n.zone == zone && n.role == Role::EdgeController)
                    .collect();
                match schedulers.first() {
                    Some(controller) => self.forward_to_specific_controller(params, controller, "/entry").await,
                    None => (
                        json!({"error": "No edge controller in same zone"}),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                }
            }
        }
    }

    async fn handle_federated_scheduling(&self, params: &RequestDescriptor) -> (StatusCode, Value) {
        let self_node = self.topology.self_node();
        if self_node.role != Role::EdgeController {
            return (
                StatusCode::FORBIDDEN,
                json!({"error": "Only edge controllers can schedule in federated architecture"}),
            );
        }

        let node_zone = self_node.zone.clone();
        let candidates = self.topology.nodes_by_zone(&node_zone);
        if candidates.is_empty() {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "No targets available in current zone"}),
            );
        }

        let target = TargetSelector::select_target(&candidates, &params.fn_name, &self.response_log);

        let start = Instant::now();
        let outcome = self.execution.invoke_remote(&params.fn_name, &params.payload, target).await;
        let duration = start.elapsed();
        if outcome.is_success() {
            self.response_log.append(&target.id, &params.fn_name, duration);
        }

        (outcome_status(&outcome), outcome_to_value(&outcome))
    }

    async fn handle_federated_edge_controller(&self, params: &RequestDescriptor) -> (Value, StatusCode) {
        let self_node = self.topology.self_node();
        let node_zone = self_node.zone.clone();

        let target: &Node = if params.hop >= HOP_LIMIT || self.load_probe.load1() <= LOAD_EXECUTE_LOCAL_THRESHOLD {
            self_node
        } else {
            let candidates: Vec<&Node> = self
                .topology
                .all_nodes()
                .into_iter()
                .filter(|n| matches!(n.role, Role::CloudController | Role::EdgeController))
                .collect();
            TargetSelector::select_zone(&candidates, &params.fn_name, &self.response_log)
        };

        if target.zone != node_zone {
            self.offload_to_zone(params, target).await
        } else {
            self.execute_in_local_zone(params).await
        }
    }

    async fn offload_to_zone(&self, params: &RequestDescriptor, target: &Node) -> (Value, StatusCode) {
        let mut forwarded = params.clone();
        forwarded.hop += 1;
        let url = ExecutionClient::agent_url(&target.address, "/entry");

        let start = Instant::now();
        match self.execution.forward(&url, &forwarded).await {
            Ok((status, body)) if (200..300).contains(&status) => {
                let returned_hop = body.get("hop").and_then(Value::as_u64).unwrap_or(0);
                let duration = scale_by_hop_penalty(start.elapsed(), returned_hop);
                self.response_log.append(&target.zone, &params.fn_name, duration);
                let response = json!({
                    "message": format!("Offloaded to zone {}", target.zone),
                    "response": body,
                });
                (response, status_from_u16(status))
            }
            Ok((status, body)) => {
                warn!(zone = %target.zone, status, "zone offload returned non-success status");
                (body, status_from_u16(status))
            }
            Err(e) => {
                warn!(zone = %target.zone, error = %e, "zone offload failed");
                (forward_error_json(&e), StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn execute_in_local_zone(&self, params: &RequestDescriptor) -> (Value, StatusCode) {
        let self_node = self.topology.self_node();
        let node_zone = self_node.zone.clone();
        let candidates = self.topology.nodes_by_zone(&node_zone);
        let target = TargetSelector::select_target(&candidates, &params.fn_name, &self.response_log);

        let start = Instant::now();
        let outcome = self.execution.invoke_remote(&params.fn_name, &params.payload, target).await;
        let duration = start.elapsed();
        if outcome.is_success() {
            self.response_log.append(&node_zone, &params.fn_name, duration);
        }

        (outcome_to_value(&outcome), outcome_status(&outcome))
    }

    async fn forward_to_controller(&self, params: &RequestDescriptor, role: Role, endpoint: &str) -> (Value, StatusCode) {
        let controllers = self.topology.nodes_by_role(role);
        let Some(controller) = controllers.choose(&mut rand::thread_rng()) else {
            return (
                json!({"error": format!("No {} found", role_label(role))}),
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        };
        self.forward_to_specific_controller(params, controller, endpoint).await
    }

    async fn forward_to_specific_controller(&self, params: &RequestDescriptor, controller: &Node, endpoint: &str) -> (Value, StatusCode) {
        let url = ExecutionClient::agent_url(&controller.address, endpoint);
        match self.execution.forward(&url, params).await {
            Ok((status, body)) => (body, status_from_u16(status)),
            Err(e) => (forward_error_json(&e), StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    // ---- decentralized -------------------------------------------------

    async fn handle_decentralized(&self, params: &RequestDescriptor) -> (Value, StatusCode) {
        let self_node = self.topology.self_node();

        let target: &Node = if params.hop >= HOP_LIMIT || self.load_probe.load1() <= LOAD_EXECUTE_LOCAL_THRESHOLD {
            self_node
        } else {
            let candidates = self.topology.all_nodes();
            TargetSelector::select_target(&candidates, &params.fn_name, &self.response_log)
        };

        if target.id != self_node.id {
            let mut forwarded = params.clone();
            forwarded.hop += 1;
            let url = ExecutionClient::agent_url(&target.address, "/entry");

            let start = Instant::now();
            match self.execution.forward(&url, &forwarded).await {
                Ok((status, body)) if (200..300).contains(&status) => {
                    let returned_hop = body.get("hop").and_then(Value::as_u64).unwrap_or(0);
                    let duration = scale_by_hop_penalty(start.elapsed(), returned_hop);
                    self.response_log.append(&target.id, &params.fn_name, duration);
                    let response = json!({
                        "message": format!("Offloaded to node {}", target.id),
                        "response": body,
                    });
                    (response, status_from_u16(status))
                }
                Ok((status, body)) => {
                    warn!(target = %target.id, status, "node offload returned non-success status");
                    (body, status_from_u16(status))
                }
                Err(e) => {
                    warn!(target = %target.id, error = %e, "node offload failed");
                    (forward_error_json(&e), StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        } else {
            let start = Instant::now();
            let outcome = self.execution.invoke_local(&params.fn_name, &params.payload).await;
            let duration = start.elapsed();
            if outcome.is_success() {
                self.response_log.append(&self_node.id, &params.fn_name, duration);
            }
            (outcome_to_value(&outcome), outcome_status(&outcome))
        }
    }

    // ---- reporting endpoints ---------------------------------------------

    /// `GET /arch_metrics`.
    pub fn arch_metrics(&self) -> Value {
        self.tail_scheduler.metrics()
    }

    /// `GET /durations` — hardcoded to the `matrix-multiplication` function,
    /// matching the original deployment's single benchmarked workload.
    pub fn recent_durations(&self) -> Value {
        const FN_NAME: &str = "matrix-multiplication";
        let mut out = serde_json::Map::new();
        for arch in [Arch::Centralized, Arch::Federated, Arch::Decentralized] {
            let key = format!("{FN_NAME}_{}", arch.as_str());
            out.insert(arch.as_str().to_string(), json!(self.total_time_log.recent(&key)));
        }
        Value::Object(out)
    }

    /// `GET /configuration`.
    pub fn configuration(&self) -> Value {
        json!({
            "arch": self.architecture().as_str(),
            "self": self.topology.self_node(),
            "topology": self.topology.nodes,
        })
    }

    pub fn update_thresholds(&self, thresholds: crate::tail::Thresholds) {
        info!(
            soft_d2f = thresholds.c_soft_d2f,
            hard_d2f = thresholds.c_hard_d2f,
            soft_f2c = thresholds.c_soft_f2c,
            hard_f2c = thresholds.c_hard_f2c,
            "thresholds updated"
        );
        self.tail_scheduler.update_thresholds(thresholds);
    }

    pub fn load_snapshot(&self) -> crate::load::LoadSnapshot {
        self.load_probe.snapshot()
    }
}

fn scale_by_hop_penalty(elapsed: Duration, returned_hop: u64) -> Duration {
    let scaled = elapsed.as_secs_f64() * (1.0 + HOP_PENALTY_ALPHA * returned_hop as f64);
    Duration::from_secs_f64(scaled.max(0.0))
}

/// `{"resp": ...}` on success, or the full `AgentError` error body (carrying
/// `execution_location`/`target_node` when known) on failure.
fn outcome_to_value(outcome: &InvokeOutcome) -> Value {
    match outcome {
        InvokeOutcome::Success { resp } => json!({"resp": resp}),
        InvokeOutcome::Failure { error } => AgentError::Execution(error.clone()).to_json(),
    }
}

fn outcome_status(outcome: &InvokeOutcome) -> StatusCode {
    match outcome {
        InvokeOutcome::Success { .. } => StatusCode::OK,
        InvokeOutcome::Failure { error } => AgentError::Execution(error.clone()).status_code(),
    }
}

fn forward_error_json(e: &ExecutionError) -> Value {
    json!({"error": e.to_string()})
}

fn status_from_u16(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::CloudController => "cloud-controller",
        Role::EdgeController => "edge-controller",
        Role::Worker => "worker",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn node(id: &str, role: Role, zone: &str) -> Node {
        Node {
            id: id.to_string(),
            address: "127.0.0.1".to_string(),
            role,
            zone: zone.to_string(),
        }
    }

    fn topology(self_id: &str, nodes: Vec<Node>) -> Topology {
        let mut map = Map::new();
        for n in nodes {
            map.insert(n.id.clone(), n);
        }
        Topology {
            nodes: map,
            self_id: self_id.to_string(),
        }
    }

    fn descriptor(fn_name: &str, arch: Option<Arch>, hop: u32) -> RequestDescriptor {
        RequestDescriptor {
            tag: "default".into(),
            fn_name: fn_name.into(),
            payload: String::new(),
            deadline: String::new(),
            hop,
            arch,
        }
    }

    #[tokio::test]
    async fn schedule_rejects_non_cloud_controller_in_centralized() {
        let topo = topology(
            "w1",
            vec![
                node("c1", Role::CloudController, "zA"),
                node("w1", Role::Worker, "zA"),
            ],
        );
        let router = Router::new(topo, Arch::Centralized);
        let (status, body) = router.schedule(descriptor("hello", Some(Arch::Centralized), 0)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("Edge nodes"));
    }

    #[tokio::test]
    async fn federated_worker_without_edge_controller_returns_500() {
        let topo = topology(
            "w1",
            vec![
                node("w1", Role::Worker, "zA"),
                node("c1", Role::CloudController, "zB"),
            ],
        );
        let router = Router::new(topo, Arch::Federated);
        let (status, body) = router.entry(descriptor("hello", Some(Arch::Federated), 0)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("No edge controller"));
    }

    #[tokio::test]
    async fn decentralized_hop_limit_forces_local_execution() {
        let topo = topology(
            "w1",
            vec![
                node("w1", Role::Worker, "zA"),
                node("w2", Role::Worker, "zA"),
            ],
        );
        let router = Router::new(topo, Arch::Decentralized);
        let (status, body) = router.entry(descriptor("hello", Some(Arch::Decentralized), HOP_LIMIT)).await;
        // Nothing is listening on the local gateway port in this unit test,
        // so the local invoke itself fails — but it must still be attempted
        // locally rather than forwarded, and the failure must be reported
        // honestly rather than masked as a 200.
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["execution_location"], "local");
        assert_eq!(body["hop"].as_u64().unwrap(), HOP_LIMIT as u64);
        assert_eq!(body["architecture"].as_str().unwrap(), "decentralized");
    }

    #[tokio::test]
    async fn failed_local_invoke_reports_500_with_execution_location() {
        let topo = topology("c1", vec![node("c1", Role::CloudController, "zA")]);
        let router = Router::new(topo, Arch::Federated);
        let (status, body) = router.entry(descriptor("hello", Some(Arch::Federated), 0)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["execution_location"], "local");
    }

    #[tokio::test]
    async fn failed_remote_invoke_reports_500_with_target_node() {
        let topo = topology(
            "c1",
            vec![
                node("c1", Role::CloudController, "zA"),
                node("w1", Role::Worker, "zA"),
            ],
        );
        let router = Router::new(topo, Arch::Centralized);
        let (status, body) = router.entry(descriptor("hello", Some(Arch::Centralized), 0)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["execution_location"], "remote");
        assert!(body["target_node"].is_string());
    }

    #[tokio::test]
    async fn schedule_reports_500_instead_of_masking_execution_failure() {
        let topo = topology("c1", vec![node("c1", Role::CloudController, "zA")]);
        let router = Router::new(topo, Arch::Centralized);
        let (status, body) = router.schedule(descriptor("hello", Some(Arch::Centralized), 0)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.get("resp").is_none(), "a failed invoke must not be echoed as a null resp");
        assert_eq!(body["status"], "failed");
    }

    #[tokio::test]
    async fn entry_always_stamps_architecture_and_total_time() {
        let topo = topology("c1", vec![node("c1", Role::CloudController, "zA")]);
        let router = Router::new(topo, Arch::Centralized);
        let (_, body) = router.entry(descriptor("hello", Some(Arch::Centralized), 0)).await;
        assert!(body.get("total_time").is_some());
        assert_eq!(body["architecture"].as_str().unwrap(), "centralized");
    }

    #[test]
    fn role_label_matches_kebab_case() {
        assert_eq!(role_label(Role::CloudController), "cloud-controller");
        assert_eq!(role_label(Role::EdgeController), "edge-controller");
        assert_eq!(role_label(Role::Worker), "worker");
    }
}
