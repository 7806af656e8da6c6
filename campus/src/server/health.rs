//! Health check endpoints.

use crate::server::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
}

/// Liveness check. Returns 200 OK while the process is serving.
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// Readiness check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,
    /// Event store reachable
    pub store: bool,
    /// Live WebSocket connections
    pub connections: usize,
    /// Rooms with at least one member
    pub rooms: usize,
    /// Whether the sweeps run on a schedule
    pub jobs_enabled: bool,
}

/// Readiness check.
///
/// Probes the event store with a listing; 503 if it fails.
///
/// ```bash
/// curl http://localhost:8080/ready
/// # {"ready":true,"store":true,"connections":3,"rooms":5,"jobsEnabled":true}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let store = state.service.repository().list().await.is_ok();
    let status = if store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: store,
            store,
            connections: state.registry.connection_count(),
            rooms: state.registry.room_count(),
            jobs_enabled: state.jobs_enabled,
        }),
    )
}
