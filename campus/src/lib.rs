//! Campus events - RSVP capacity management with real-time fan-out.
//!
//! The interesting part of the campus platform: many students registering
//! for the same event at once, a waitlist that must be promoted fairly, and a
//! set of live WebSocket clients that should see counts change as it happens.
//!
//! # Architecture
//!
//! ```text
//!   HTTP request            Promotion / Reminder jobs
//!        │                            │
//!        ▼                            ▼
//! ┌──────────────────────────────────────────────┐
//! │ RsvpService                                  │
//! │   RsvpReducer (pure)  ──►  EventRepository   │──► DocumentStore (CAS + retry)
//! └──────────────────────────────────────────────┘
//!        │ effects (after commit)
//!        ├──────────────► FanOut ──► PresenceRegistry ──► connection outboxes
//!        └──────────────► NotificationDispatcher (best-effort, never blocks)
//! ```
//!
//! # Key Invariants
//!
//! ```text
//! confirmed_count <= effective_limit        for every event, at every version
//! one active registration per (event, user)
//! waitlist promoted strictly by registered_at
//! ```
//!
//! Every mutation, whether from a request or from the promotion sweep, goes
//! through the same compare-and-swap update, so the capacity check and the
//! append are one atomic step.

pub mod api;
pub mod config;
pub mod error;
pub mod fanout;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod presence;
pub mod rsvp;
pub mod server;
pub mod service;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::RsvpError;
pub use fanout::{Envelope, FanOut, ServerMessage};
pub use lifecycle::Application;
pub use presence::{PresenceRegistry, Room};
pub use server::{AppState, build_router};
pub use service::RsvpService;
pub use types::{Event, EventId, Identity, Registration, RegistrationStatus, Role, UserId};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::fanout::FanOut;
    use crate::notify::NotificationDispatcher;
    use crate::presence::PresenceRegistry;
    use crate::rsvp::RsvpEnvironment;
    use crate::service::RsvpService;
    use crate::store::EventRepository;
    use crate::types::{Event, EventId, EventStatus, RegistrationLog};
    use campus_core::environment::Clock;
    use campus_runtime::{InMemoryDocumentStore, RetryPolicy};
    use campus_testing::{RecordingNotifier, test_clock};
    use chrono::Duration;
    use std::sync::Arc;

    /// Published event starting in a week, limit equal to capacity
    pub fn published_event(limit: u32) -> Event {
        let now = test_clock().now();
        Event {
            id: EventId::new(),
            organizer_id: "org".into(),
            title: "Robotics demo".into(),
            category: "tech".into(),
            starts_at: now + Duration::days(7),
            capacity: limit,
            registration_limit: None,
            registration_deadline: now + Duration::days(6),
            status: EventStatus::Published,
            registrations: RegistrationLog::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub struct TestHarness {
        pub service: RsvpService,
        pub registry: Arc<PresenceRegistry>,
        pub notifier: Arc<RecordingNotifier>,
    }

    /// Service over an in-memory store with a fixed clock and recording notifier
    pub fn test_service() -> TestHarness {
        let clock = Arc::new(test_clock());
        let registry = Arc::new(PresenceRegistry::new(clock.clone()));
        let fanout = Arc::new(FanOut::new(Arc::clone(&registry), clock.clone()));
        let notifier = Arc::new(RecordingNotifier::new());
        let repo = EventRepository::new(
            Arc::new(InMemoryDocumentStore::<EventId, Event>::new()),
            RetryPolicy::builder()
                .max_attempts(5)
                .initial_delay(std::time::Duration::from_millis(1))
                .build(),
        );
        let service = RsvpService::new(
            repo,
            RsvpEnvironment::new(clock.clone()),
            fanout,
            NotificationDispatcher::new(notifier.clone(), std::time::Duration::from_secs(1)),
        );
        TestHarness {
            service,
            registry,
            notifier,
        }
    }
}
