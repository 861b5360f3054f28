mod cli;
mod config;
mod connection;
mod directory;
mod handlers;
mod matchmaker;
mod queue;
mod registry;
mod router;
mod signaling;
mod telemetry;
mod websocket;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    cli::{Cli, Commands},
    config::Config,
    handlers::{health_check, hello, metrics_handler, stats_handler, AppState},
    matchmaker::{MatchConfig, Matchmaker},
    router::SignalRouter,
    websocket::websocket_handler,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }

    let metrics = telemetry::init(config.log_format)?;

    if let Some(Commands::Probe {
        url,
        say,
        wait,
        linger,
    }) = cli.command
    {
        return cli::run_probe(url, say, wait, linger).await;
    }

    info!(
        listen_addr = %config.listen_addr(),
        queue_timeout_secs = config.queue_timeout_seconds,
        "starting signaling server"
    );

    let matchmaker = Matchmaker::new(MatchConfig {
        wait_timeout: config.queue_timeout(),
    });
    let state = AppState {
        router: SignalRouter::new(matchmaker),
        metrics: Some(metrics),
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
    info!("listening on {}", config.listen_addr());

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace_seconds,
        "shutdown signal received; waiting for connections to drain"
    );
    tokio::time::sleep(config.shutdown_grace()).await;
    info!("shutdown complete");
    Ok(())
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/hello", get(hello))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
