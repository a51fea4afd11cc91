//! Liveness and readiness probes for the restart agent
//!
//! `/healthz` fails only once the watcher, workers or notifier report
//! unhealthy. A notifier that keeps failing Slack deliveries is degraded and
//! stays live. `/readyz` waits for the initial pod list.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use restart_lib::{HealthRegistry, HealthResponse, ReadinessResponse};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub const LIVENESS_PATH: &str = "/healthz";
pub const READINESS_PATH: &str = "/readyz";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry) -> Self {
        Self { health_registry }
    }
}

fn probe_status(passing: bool) -> StatusCode {
    if passing {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn liveness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.health_registry.health().await;
    let code = probe_status(health.status.is_operational());
    if code != StatusCode::OK {
        debug!(status = ?health.status, "Liveness probe failing");
    }
    (code, Json(health))
}

async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let readiness = state.health_registry.readiness().await;
    if let Some(reason) = &readiness.reason {
        debug!(reason = %reason, "Readiness probe failing");
    }
    (probe_status(readiness.ready), Json(readiness))
}

/// Router serving both probes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(LIVENESS_PATH, get(liveness))
        .route(READINESS_PATH, get(readiness))
        .with_state(state)
}

/// Serve the probes on `addr` until a message arrives on `shutdown`
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Serving health probes");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("Health probe server stopped");
    Ok(())
}
