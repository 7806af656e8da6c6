//! Router configuration.
//!
//! Builds the complete Axum router with all endpoints.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::middleware::correlation_id_layer;
use crate::api::{admin, events, rsvp, websocket};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - Health checks
/// - Event management endpoints
/// - RSVP endpoints
/// - Admin job triggers
/// - WebSocket upgrade
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Event management
        .route("/events", post(events::create_event))
        .route("/events/:id", get(events::get_event).patch(events::update_event))
        .route("/events/:id/publish", post(events::publish_event))
        .route("/events/:id/cancel", post(events::cancel_event))
        // RSVP
        .route(
            "/events/:id/rsvp",
            post(rsvp::register).delete(rsvp::cancel).get(rsvp::status),
        )
        // Operational triggers
        .route("/admin/jobs/promotion", post(admin::run_promotion))
        .route("/admin/jobs/reminders", post(admin::run_reminders))
        // Real-time
        .route("/ws", get(websocket::connect));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
