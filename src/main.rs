//! Entry point: loads configuration, wires the router, and serves the HTTP
//! surface on port 31113.

use clap::Parser;
use placement_agent::config::Config;
use placement_agent::http::{build_app, AGENT_PORT};
use placement_agent::router::Router;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about = "Per-node scheduling agent for a federated FaaS fabric")]
struct Args {
    /// Path to the architecture.yaml topology/configuration file
    #[arg(short, long, default_value = "arch/architecture.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %args.config, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        self_id = %config.topology.self_id,
        architecture = config.initial_architecture.as_str(),
        "configuration loaded"
    );

    let router = Arc::new(Router::new(config.topology, config.initial_architecture));
    let app = build_app(router);

    let addr = SocketAddr::from(([0, 0, 0, 0], AGENT_PORT));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    info!(%addr, "agent listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server exited with error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
