//! Event management endpoints.
//!
//! - POST /api/events - Create a draft event (organizer or admin)
//! - GET /api/events/:id - Event details with live counts
//! - PATCH /api/events/:id - Update organizer-owned fields
//! - POST /api/events/:id/publish - Publish a draft
//! - POST /api/events/:id/cancel - Cancel an event

use crate::api::error::AppError;
use crate::api::identity::Caller;
use crate::server::state::AppState;
use crate::types::{EventId, EventPatch, EventSummary, NewEvent};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Create a new draft event owned by the caller.
///
/// # Errors
///
/// 403 for students, 422 for invalid input.
pub async fn create_event(
    Caller(identity): Caller,
    State(state): State<AppState>,
    Json(request): Json<NewEvent>,
) -> Result<(StatusCode, Json<EventSummary>), AppError> {
    let event = state.service.create_event(&identity, request).await?;
    Ok((StatusCode::CREATED, Json(EventSummary::from(&event))))
}

/// Get event details.
///
/// # Errors
///
/// 404 if the event does not exist.
pub async fn get_event(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<EventSummary>, AppError> {
    let event = state.service.get_event(event_id).await?;
    Ok(Json(EventSummary::from(&event)))
}

/// Update organizer-owned fields.
///
/// # Errors
///
/// 403 unless owner or admin, 422 for invalid changes, 404 if missing.
pub async fn update_event(
    Caller(identity): Caller,
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
    Json(patch): Json<EventPatch>,
) -> Result<Json<EventSummary>, AppError> {
    let event = state.service.update_event(&identity, event_id, patch).await?;
    Ok(Json(EventSummary::from(&event)))
}

/// Publish a draft event.
///
/// # Errors
///
/// 403 unless owner or admin, 422 if not a draft, 404 if missing.
pub async fn publish_event(
    Caller(identity): Caller,
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<EventSummary>, AppError> {
    let event = state.service.publish_event(&identity, event_id).await?;
    Ok(Json(EventSummary::from(&event)))
}

/// Cancel an event.
///
/// # Errors
///
/// 403 unless owner or admin, 422 if already closed, 404 if missing.
pub async fn cancel_event(
    Caller(identity): Caller,
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<EventSummary>, AppError> {
    let event = state.service.cancel_event(&identity, event_id).await?;
    Ok(Json(EventSummary::from(&event)))
}
