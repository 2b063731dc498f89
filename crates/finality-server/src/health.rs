use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub host_connected: bool,
    pub trial_loop_running: bool,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        host_connected: state.host_connected.load(Ordering::Relaxed),
        trial_loop_running: !state.trial.is_closed(),
    })
}

/// Readiness check: the trial loop must be alive to accept work.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.trial.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "not ready: trial loop stopped");
    }
    (StatusCode::OK, "ready")
}
