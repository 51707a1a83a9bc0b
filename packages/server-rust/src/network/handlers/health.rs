//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::shutdown::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the body says whether the
/// server is actually healthy, so monitoring can tell "up but draining"
/// from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let in_flight = state.shutdown.in_flight_count();
    let uptime_secs = state.start_time.elapsed().as_secs();

    Json(json!({
        "state": health.as_str(),
        "in_flight": in_flight,
        "uptime_secs": uptime_secs,
    }))
}

/// Liveness probe -- always returns 200 OK while the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- 200 when ready, 503 during startup and drain.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
