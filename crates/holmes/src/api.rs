//! HTTP API for engine status, liveness and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use holmes_lib::{ConfigHandle, EngineStatus};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigHandle,
    pub status: watch::Receiver<EngineStatus>,
}

impl AppState {
    pub fn new(config: ConfigHandle, status: watch::Receiver<EngineStatus>) -> Self {
        Self { config, status }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    ticks: u64,
    enabled_kinds: usize,
}

/// Liveness - 200 while the sampling loop runs, 503 once it has stopped
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let running = state.status.borrow().running;
    let ticks = state.status.borrow().ticks;
    let health = Health {
        status: if running { "ok" } else { "stopped" },
        ticks,
        enabled_kinds: state.config.current().enabled_kinds().count(),
    };

    let status_code = if running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Per-kind phase, baseline and last dump
async fn status(State(state): State<Arc<AppState>>) -> Json<EngineStatus> {
    Json(state.status.borrow().clone())
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
