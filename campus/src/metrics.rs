//! Operational metrics for the RSVP and real-time layers.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `campus_rsvp_registrations_total{status}` - Registrations by initial status
//! - `campus_rsvp_cancellations_total` - Cancelled registrations
//! - `campus_rsvp_promotions_total{source}` - Promotions (cancel, sweep)
//! - `campus_rsvp_conflicts_total` - Updates that exhausted the retry budget
//! - `campus_notifications_total{kind,outcome}` - Notification attempts
//! - `campus_fanout_deliveries_total{scope}` - Messages handed to outboxes
//! - `campus_fanout_dropped_total` - Messages dropped on full or closed outboxes
//! - `campus_job_runs_total{job}` - Background sweep runs
//!
//! ## Gauges
//! - `campus_ws_connections` - Live WebSocket connections

use metrics::{describe_counter, describe_gauge};

/// Initialize and register all metric descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_metrics() {
    describe_counter!(
        "campus_rsvp_registrations_total",
        "Total number of registrations by initial status (confirmed, waitlisted)"
    );
    describe_counter!(
        "campus_rsvp_cancellations_total",
        "Total number of cancelled registrations"
    );
    describe_counter!(
        "campus_rsvp_promotions_total",
        "Total number of waitlist promotions by source (cancel, sweep)"
    );
    describe_counter!(
        "campus_rsvp_conflicts_total",
        "Total number of event updates that exhausted the optimistic retry budget"
    );
    describe_counter!(
        "campus_notifications_total",
        "Total number of notification attempts by template and outcome"
    );
    describe_gauge!(
        "campus_ws_connections",
        "Current number of live WebSocket connections"
    );
    describe_counter!(
        "campus_fanout_deliveries_total",
        "Total number of messages handed to connection outboxes by scope"
    );
    describe_counter!(
        "campus_fanout_dropped_total",
        "Total number of messages dropped because an outbox was full or closed"
    );
    describe_counter!(
        "campus_job_runs_total",
        "Total number of background sweep runs by job"
    );

    tracing::info!("Metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a new registration with its initial status.
pub fn record_registration(status: &'static str) {
    metrics::counter!("campus_rsvp_registrations_total", "status" => status).increment(1);
}

/// Record a cancellation.
pub fn record_cancellation() {
    metrics::counter!("campus_rsvp_cancellations_total").increment(1);
}

/// Record a promotion.
///
/// # Arguments
///
/// * `source` - `"cancel"` for in-step promotion, `"sweep"` for the background job
pub fn record_promotion(source: &'static str) {
    metrics::counter!("campus_rsvp_promotions_total", "source" => source).increment(1);
}

/// Record an exhausted retry budget.
pub fn record_conflict() {
    metrics::counter!("campus_rsvp_conflicts_total").increment(1);
}

/// Record a notification attempt.
pub fn record_notification(kind: &'static str, outcome: &'static str) {
    metrics::counter!("campus_notifications_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record a WebSocket connection opening.
pub fn record_ws_connected() {
    metrics::gauge!("campus_ws_connections").increment(1.0);
}

/// Record a WebSocket connection closing.
pub fn record_ws_disconnected() {
    metrics::gauge!("campus_ws_connections").decrement(1.0);
}

/// Record the outcome of one fan-out publish.
#[allow(clippy::cast_possible_truncation)]
pub fn record_fanout(scope: &'static str, delivered: usize, dropped: usize) {
    if delivered > 0 {
        metrics::counter!("campus_fanout_deliveries_total", "scope" => scope).increment(delivered as u64);
    }
    if dropped > 0 {
        metrics::counter!("campus_fanout_dropped_total").increment(dropped as u64);
    }
}

/// Record a background sweep run.
pub fn record_job_run(job: &'static str) {
    metrics::counter!("campus_job_runs_total", "job" => job).increment(1);
}
