use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::debug;

use crate::models::HealthResponse;
use crate::AppState;

fn ok(message: String) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message,
    })
}

/// Liveness: the process answers.
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    ok("Server is running".to_string())
}

/// Readiness: the registry is reachable. Rooms live in memory only, so
/// there is no downstream dependency to check.
pub async fn ready_check(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = app_state.registry.stats();
    debug!(rooms = stats.rooms, sessions = stats.sessions, "Readiness check requested");
    ok(format!(
        "Service is ready ({} rooms, {} sessions)",
        stats.rooms, stats.sessions
    ))
}
