//! Operational triggers, admin only.
//!
//! - POST /api/admin/jobs/promotion - Run the promotion sweep now
//! - POST /api/admin/jobs/reminders - Run the reminder sweep now

use crate::api::identity::RequireAdmin;
use crate::jobs::SweepReport;
use crate::server::state::AppState;
use axum::{Json, extract::State};
use tracing::info;

/// Run the promotion sweep and return its report.
pub async fn run_promotion(RequireAdmin(admin): RequireAdmin, State(state): State<AppState>) -> Json<SweepReport> {
    info!(user_id = %admin.user_id, "Promotion sweep triggered manually");
    Json(state.promotion.run_once().await)
}

/// Run the reminder sweep and return its report.
pub async fn run_reminders(RequireAdmin(admin): RequireAdmin, State(state): State<AppState>) -> Json<SweepReport> {
    info!(user_id = %admin.user_id, "Reminder sweep triggered manually");
    Json(state.reminders.run_once().await)
}
