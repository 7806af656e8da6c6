//! Background sweeps: waitlist promotion and day-before reminders.
//!
//! Both jobs work from a snapshot of the event list and isolate failures per
//! item. A failed event or user is logged and counted in the [`SweepReport`];
//! the sweep moves on. Nothing is retried within a run; the next tick picks
//! up whatever is still pending.

use crate::metrics;
use crate::notify::event_payload;
use crate::service::{NotifyMode, RsvpService};
use crate::types::{Event, EventStatus};
use campus_core::environment::TemplateKind;
use campus_runtime::RecurringTask;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Outcome of one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Events looked at
    pub events_scanned: usize,
    /// Waitlisted registrations promoted
    pub promoted: usize,
    /// Reminders delivered
    pub reminders_sent: usize,
    /// Notifications that failed or timed out
    pub notifications_failed: usize,
    /// Items skipped because of an error
    pub errors: usize,
}

// ============================================================================
// Promotion
// ============================================================================

/// Promotes waitlisted attendees wherever seats are free
#[derive(Clone)]
pub struct PromotionJob {
    service: RsvpService,
}

impl PromotionJob {
    /// Job name used in logs and metrics
    pub const NAME: &'static str = "promotion";

    /// Creates a new `PromotionJob`
    #[must_use]
    pub const fn new(service: RsvpService) -> Self {
        Self { service }
    }

    /// Run one sweep over every published, upcoming event with a waitlist.
    ///
    /// Each promotion is its own atomic update, so the sweep stays consistent
    /// with cancellations racing against it.
    pub async fn run_once(&self) -> SweepReport {
        metrics::record_job_run(Self::NAME);
        let mut report = SweepReport::default();

        let events = match self.service.repository().list().await {
            Ok(events) => events,
            Err(err) => {
                error!(job = Self::NAME, error = %err, "Could not list events");
                report.errors += 1;
                return report;
            },
        };
        let now = self.service.now();

        for event in events.iter().filter(|event| needs_promotion(event, now)) {
            report.events_scanned += 1;

            for _ in 0..event.available_spots() {
                match self.service.promote_next(event.id, NotifyMode::Awaited).await {
                    Ok(Some(promotion)) => {
                        report.promoted += 1;
                        report.notifications_failed += promotion.notifications_failed;
                    },
                    Ok(None) => break,
                    Err(err) => {
                        error!(job = Self::NAME, event_id = %event.id, error = %err, "Promotion failed");
                        report.errors += 1;
                        break;
                    },
                }
            }
        }

        info!(
            job = Self::NAME,
            events = report.events_scanned,
            promoted = report.promoted,
            errors = report.errors,
            "Promotion sweep finished"
        );
        report
    }

    /// Run on a fixed period until shutdown.
    #[must_use]
    pub fn spawn(self, period: StdDuration, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        RecurringTask::new(Self::NAME, period, shutdown, move || {
            let job = self.clone();
            async move {
                job.run_once().await;
            }
        })
        .spawn()
    }
}

fn needs_promotion(event: &Event, now: DateTime<Utc>) -> bool {
    event.status == EventStatus::Published
        && event.starts_at > now
        && event.waitlist_count() > 0
        && event.available_spots() > 0
}

// ============================================================================
// Reminders
// ============================================================================

/// Reminds confirmed attendees of events starting in the next window
#[derive(Clone)]
pub struct ReminderJob {
    service: RsvpService,
}

impl ReminderJob {
    /// Job name used in logs and metrics
    pub const NAME: &'static str = "reminders";

    /// Creates a new `ReminderJob`
    #[must_use]
    pub const fn new(service: RsvpService) -> Self {
        Self { service }
    }

    /// Send one reminder per confirmed attendee of every published event
    /// starting in `[now + 24h, now + 48h)`.
    pub async fn run_once(&self) -> SweepReport {
        metrics::record_job_run(Self::NAME);
        let mut report = SweepReport::default();

        let events = match self.service.repository().list().await {
            Ok(events) => events,
            Err(err) => {
                error!(job = Self::NAME, error = %err, "Could not list events");
                report.errors += 1;
                return report;
            },
        };
        let now = self.service.now();

        for event in events.iter().filter(|event| in_reminder_window(event, now)) {
            report.events_scanned += 1;
            let payload = event_payload(event);

            for registration in event.registrations.confirmed() {
                let outcome = self
                    .service
                    .notifications()
                    .deliver(&registration.user_id, TemplateKind::EventReminder, payload.clone())
                    .await;
                match outcome {
                    Ok(()) => report.reminders_sent += 1,
                    Err(_) => report.notifications_failed += 1,
                }
            }
        }

        info!(
            job = Self::NAME,
            events = report.events_scanned,
            sent = report.reminders_sent,
            failed = report.notifications_failed,
            "Reminder sweep finished"
        );
        report
    }

    /// Run on a fixed period until shutdown.
    #[must_use]
    pub fn spawn(self, period: StdDuration, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        RecurringTask::new(Self::NAME, period, shutdown, move || {
            let job = self.clone();
            async move {
                job.run_once().await;
            }
        })
        .spawn()
    }
}

fn in_reminder_window(event: &Event, now: DateTime<Utc>) -> bool {
    event.status == EventStatus::Published
        && event.starts_at >= now + Duration::hours(24)
        && event.starts_at < now + Duration::hours(48)
}
