//! RSVP endpoints.
//!
//! - POST /api/events/:id/rsvp - Register the caller
//! - DELETE /api/events/:id/rsvp - Cancel the caller's registration
//! - GET /api/events/:id/rsvp - Caller's registration and live counts
//!
//! Real-time clients that reconnect use the GET to reconcile, since missed
//! messages are never replayed.

use crate::api::error::AppError;
use crate::api::identity::Caller;
use crate::server::state::AppState;
use crate::service::{RsvpChange, RsvpStatus};
use crate::types::{EventId, Registration, RsvpCounts};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;

/// Registration plus the counts of the version that committed it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpResponse {
    /// Event
    pub event_id: EventId,
    /// Registration as stored
    pub registration: Registration,
    /// Counts after the change
    #[serde(flatten)]
    pub counts: RsvpCounts,
}

impl RsvpResponse {
    fn new(event_id: EventId, change: RsvpChange) -> Self {
        Self {
            event_id,
            registration: change.registration,
            counts: change.counts,
        }
    }
}

/// Register the caller.
///
/// Returns 201 with the registration, which is either `confirmed` or
/// `waitlisted`.
///
/// # Errors
///
/// 409 when already registered or registration is closed, 503 on sustained
/// contention (retryable), 404 if the event is missing.
pub async fn register(
    Caller(identity): Caller,
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RsvpResponse>), AppError> {
    let change = state.service.add_registration(event_id, &identity.user_id).await?;
    Ok((StatusCode::CREATED, Json(RsvpResponse::new(event_id, change))))
}

/// Cancel the caller's active registration.
///
/// # Errors
///
/// 409 when the caller holds no active registration, 404 if the event is missing.
pub async fn cancel(
    Caller(identity): Caller,
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<RsvpResponse>, AppError> {
    let change = state.service.cancel_registration(event_id, &identity.user_id).await?;
    Ok(Json(RsvpResponse::new(event_id, change)))
}

/// Caller's active registration (if any) and the current counts.
///
/// # Errors
///
/// 404 if the event is missing.
pub async fn status(
    Caller(identity): Caller,
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<RsvpStatus>, AppError> {
    let status = state.service.registration_status(event_id, &identity.user_id).await?;
    Ok(Json(status))
}
