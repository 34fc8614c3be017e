use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - relay status and backend connectivity
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connected = state.backend.is_available();
    let snapshot = state.metrics.snapshot();

    Json(metrics::HealthStatus {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        backend: metrics::BackendHealth {
            connected,
            url: state.backend_url.to_string(),
        },
        connections: state.hub.connected_clients() as u64,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed relay metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the relay is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - 200 only while the backend link is up
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    if state.backend.is_available() {
        Json(serde_json::json!({
            "status": "ready",
            "backend": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "backend": "disconnected"
            })),
        )
            .into_response()
    }
}
