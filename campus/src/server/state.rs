//! Application state for the campus HTTP server.
//!
//! Built once at startup and cloned (cheaply, via `Arc`) into every handler.

use crate::config::Config;
use crate::fanout::FanOut;
use crate::jobs::{PromotionJob, ReminderJob};
use crate::notify::NotificationDispatcher;
use crate::presence::PresenceRegistry;
use crate::rsvp::RsvpEnvironment;
use crate::service::RsvpService;
use crate::store::EventRepository;
use crate::types::{Event, EventId};
use campus_core::environment::{Clock, Notifier};
use campus_core::store::DocumentStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// WebSocket limits taken from configuration
#[derive(Debug, Clone, Copy)]
pub struct RealtimeLimits {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Per-connection outbox capacity
    pub outbox_capacity: usize,
    /// Interval between server pings
    pub ping_interval: std::time::Duration,
}

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// RSVP and event lifecycle operations
    pub service: RsvpService,
    /// Presence and room bookkeeping
    pub registry: Arc<PresenceRegistry>,
    /// Message fan-out
    pub fanout: Arc<FanOut>,
    /// Promotion sweep
    pub promotion: PromotionJob,
    /// Reminder sweep
    pub reminders: ReminderJob,
    /// WebSocket limits
    pub limits: RealtimeLimits,
    /// Whether the sweeps run on a schedule
    pub jobs_enabled: bool,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Wire every component from configuration and collaborators.
    ///
    /// # Arguments
    ///
    /// - `config`: Loaded configuration
    /// - `store`: Durable document store holding events
    /// - `notifier`: External notification collaborator
    /// - `clock`: Time source
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore<EventId, Event>>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(PresenceRegistry::new(Arc::clone(&clock)));
        let fanout = Arc::new(FanOut::new(Arc::clone(&registry), Arc::clone(&clock)));
        let repo = EventRepository::new(store, config.retry_policy());
        let notifications = NotificationDispatcher::new(notifier, config.notify_timeout());
        let service = RsvpService::new(repo, RsvpEnvironment::new(clock), Arc::clone(&fanout), notifications);

        Self {
            promotion: PromotionJob::new(service.clone()),
            reminders: ReminderJob::new(service.clone()),
            service,
            registry,
            fanout,
            limits: RealtimeLimits {
                max_connections: config.realtime.max_connections,
                outbox_capacity: config.realtime.outbox_capacity.max(1),
                ping_interval: std::time::Duration::from_secs(config.realtime.heartbeat_interval.max(1)),
            },
            jobs_enabled: config.jobs.enabled,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserve a WebSocket slot. Returns `None` when the cap is reached.
    #[must_use]
    pub fn try_acquire_connection(&self) -> Option<ConnectionSlot> {
        let max = self.limits.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                connections: Arc::clone(&self.connections),
            })
    }

    /// Live WebSocket connections
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }
}

/// Held for the lifetime of one WebSocket connection
#[derive(Debug)]
pub struct ConnectionSlot {
    connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use campus_core::environment::SystemClock;
    use campus_runtime::InMemoryDocumentStore;

    #[test]
    fn connection_slots_respect_the_cap() {
        let config = Config::from_lookup(|key| (key == "WS_MAX_CONNECTIONS").then(|| "2".to_string()));
        let state = AppState::new(
            &config,
            Arc::new(InMemoryDocumentStore::<EventId, Event>::new()),
            Arc::new(LogNotifier),
            Arc::new(SystemClock),
        );

        let first = state.try_acquire_connection();
        let second = state.try_acquire_connection();
        assert!(first.is_some() && second.is_some());
        assert!(state.try_acquire_connection().is_none());

        drop(first);
        assert_eq!(state.active_connections(), 1);
        assert!(state.try_acquire_connection().is_some());
    }
}
