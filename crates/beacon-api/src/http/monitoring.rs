//! Health and liveness handlers.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use beacon_daemon::{HealthSnapshot, HealthStatus};
use serde::Serialize;

use crate::state::AppState;

/// Health response: the notifying process snapshot plus API uptime.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub process: HealthSnapshot,
    pub api_running: bool,
    pub api_uptime_secs: u64,
}

/// Detailed health check.
///
/// Answers 503 unless the notifying process is running and healthy, so
/// load balancers and uptime checkers can act on the status code alone.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let process = state.coordinator.status();
    let code = match process.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy | HealthStatus::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(HealthResponse {
            process,
            api_running: true,
            api_uptime_secs: state.uptime().as_secs(),
        }),
    )
}

/// Liveness probe.
pub async fn liveness_probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive"
    }))
}
