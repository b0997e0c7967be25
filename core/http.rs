//! HTTP surface. Thin `axum` wrappers around [`Router`](crate::router::Router)
//! that do nothing beyond JSON (de)serialization and error mapping — all
//! placement logic lives in `router.rs`.

use crate::router::Router;
use crate::tail::Thresholds;
use crate::{Arch, RequestDescriptor};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const AGENT_PORT: u16 = 31113;

pub type AppState = Arc<Router>;

pub fn build_app(router: Arc<Router>) -> AxumRouter {
    AxumRouter::new()
        .route("/entry", post(entry))
        .route("/schedule", post(schedule))
        .route("/reload", post(reload))
        .route("/load", get(load))
        .route("/arch_metrics", get(arch_metrics))
        .route("/durations", get(durations))
        .route("/update_threshold", post(update_threshold))
        .route("/configuration", get(configuration))
        .with_state(router)
}

async fn entry(State(router): State<AppState>, Json(descriptor): Json<RequestDescriptor>) -> Response {
    let (status, body) = router.entry(descriptor).await;
    (status, Json(body)).into_response()
}

async fn schedule(State(router): State<AppState>, Json(descriptor): Json<RequestDescriptor>) -> Response {
    let (status, body) = router.schedule(descriptor).await;
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct ReloadRequest {
    architecture: Option<String>,
}

async fn reload(State(router): State<AppState>, Json(body): Json<ReloadRequest>) -> Response {
    let Some(raw) = body.architecture.filter(|s| !s.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "Missing architecture field"}))).into_response();
    };

    let Some(arch) = Arch::from_str_loose(&raw) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid architecture: {raw}")})),
        )
            .into_response();
    };

    router.set_architecture(arch);
    info!(architecture = arch.as_str(), "architecture switched");
    (
        StatusCode::OK,
        Json(json!({
            "message": format!("Architecture switched to: {}", arch.as_str()),
            "current_arch": router.architecture().as_str(),
        })),
    )
        .into_response()
}

async fn load(State(router): State<AppState>) -> Response {
    (StatusCode::OK, Json(router.load_snapshot())).into_response()
}

async fn arch_metrics(State(router): State<AppState>) -> Response {
    (StatusCode::OK, Json(router.arch_metrics())).into_response()
}

async fn durations(State(router): State<AppState>) -> Response {
    (StatusCode::OK, Json(router.recent_durations())).into_response()
}

#[derive(Debug, Deserialize)]
struct UpdateThresholdRequest {
    #[serde(default = "default_soft_d2f")]
    soft_d2f: f64,
    #[serde(default = "default_hard_d2f")]
    hard_d2f: f64,
    #[serde(default = "default_soft_f2c")]
    soft_f2c: f64,
    #[serde(default = "default_hard_f2c")]
    hard_f2c: f64,
}

fn default_soft_d2f() -> f64 {
    1.3
}
fn default_hard_d2f() -> f64 {
    1.7
}
fn default_soft_f2c() -> f64 {
    1.6
}
fn default_hard_f2c() -> f64 {
    2.7
}

async fn update_threshold(State(router): State<AppState>, Json(body): Json<UpdateThresholdRequest>) -> Response {
    router.update_thresholds(Thresholds {
        c_soft_d2f: body.soft_d2f,
        c_hard_d2f: body.hard_d2f,
        c_soft_f2c: body.soft_f2c,
        c_hard_f2c: body.hard_f2c,
    });
    (StatusCode::OK, Json(json!({"message": "Thresholds updated"}))).into_response()
}

async fn configuration(State(router): State<AppState>) -> Response {
    (StatusCode::OK, Json(router.configuration())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Node, Role, Topology};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_app() -> AxumRouter {
        let mut nodes = HashMap::new();
        nodes.insert(
            "c1".to_string(),
            Node {
                id: "c1".to_string(),
                address: "127.0.0.1".to_string(),
                role: Role::CloudController,
                zone: "zA".to_string(),
            },
        );
        let topology = Topology {
            nodes,
            self_id: "c1".to_string(),
        };
        let router = Arc::new(Router::new(topology, Arch::Centralized));
        build_app(router)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn entry_returns_200_for_centralized_cloud_controller() {
        let app = test_app();
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/entry")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                json!({"tag": "default", "fn_name": "hello", "payload": "x", "arch": "centralized"}).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["architecture"], "centralized");
    }

    #[tokio::test]
    async fn reload_rejects_missing_architecture_field() {
        let app = test_app();
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/reload")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json!({}).to_string()))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reload_rejects_unknown_architecture() {
        let app = test_app();
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/reload")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json!({"architecture": "quantum"}).to_string()))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn configuration_reports_self_and_topology() {
        let app = test_app();
        let req = axum::http::Request::builder()
            .method("GET")
            .uri("/configuration")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["arch"], "centralized");
        assert_eq!(body["self"]["id"], "c1");
    }

    #[tokio::test]
    async fn load_endpoint_returns_snapshot_fields() {
        let app = test_app();
        let req = axum::http::Request::builder()
            .method("GET")
            .uri("/load")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body.get("cpu_percent").is_some());
        assert!(body.get("load_1min").is_some());
    }
}
