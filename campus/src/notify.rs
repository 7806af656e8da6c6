//! Best-effort notification dispatch.
//!
//! The external notifier is never allowed to influence an RSVP transition.
//! Request paths call [`NotificationDispatcher::dispatch`], which spawns the
//! call with a timeout and returns immediately. The background jobs call
//! [`NotificationDispatcher::deliver`] so they can count per-user failures.

use crate::error::RsvpError;
use crate::metrics;
use crate::types::{Event, UserId};
use campus_core::environment::{NotificationTarget, Notifier, NotifyError, NotifyFuture, TemplateKind};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Template variables for an event notification
#[must_use]
pub fn event_payload(event: &Event) -> serde_json::Value {
    json!({
        "eventId": event.id,
        "title": event.title,
        "category": event.category,
        "startsAt": event.starts_at,
    })
}

/// Wraps the external notifier with a timeout and failure isolation
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl NotificationDispatcher {
    /// Creates a new `NotificationDispatcher`
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Fire and forget.
    ///
    /// The call runs on its own task; failures and timeouts are logged and
    /// counted there.
    pub fn dispatch(&self, user_id: &UserId, kind: TemplateKind, payload: serde_json::Value) {
        let this = self.clone();
        let user_id = user_id.clone();
        tokio::spawn(async move {
            // Outcome already logged and counted.
            let _ = this.deliver(&user_id, kind, payload).await;
        });
    }

    /// Send and wait for the outcome, bounded by the timeout.
    ///
    /// # Errors
    ///
    /// `ExternalService` if the notifier fails or does not answer in time.
    pub async fn deliver(
        &self,
        user_id: &UserId,
        kind: TemplateKind,
        payload: serde_json::Value,
    ) -> Result<(), RsvpError> {
        let target = NotificationTarget::User(user_id.to_string());
        let outcome = tokio::time::timeout(self.timeout, self.notifier.notify(target, kind, payload))
            .await
            .unwrap_or_else(|_| {
                Err(NotifyError::Timeout(
                    u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            });

        match outcome {
            Ok(()) => {
                debug!(user_id = %user_id, kind = %kind, "Notification sent");
                metrics::record_notification(kind.as_str(), "sent");
                Ok(())
            },
            Err(err) => {
                warn!(user_id = %user_id, kind = %kind, error = %err, "Notification failed");
                let outcome = match err {
                    NotifyError::Timeout(_) => "timeout",
                    NotifyError::Delivery(_) => "failed",
                };
                metrics::record_notification(kind.as_str(), outcome);
                Err(RsvpError::ExternalService(err.to_string()))
            },
        }
    }
}

/// Notifier that only logs; stands in for the email/SMS gateway
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        target: NotificationTarget,
        kind: TemplateKind,
        payload: serde_json::Value,
    ) -> NotifyFuture<'_> {
        Box::pin(async move {
            info!(target = %target, kind = %kind, payload = %payload, "Notification");
            Ok(())
        })
    }
}
