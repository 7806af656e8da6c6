//! # Campus Core
//!
//! Core traits and types shared by every crate of the campus events platform.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for one aggregate (an event and its attendee log)
//! - **Action**: All possible inputs to a reducer
//! - **Reducer**: Pure function `(State, Action, Environment) → Result<Effects, Error>`
//! - **Effect**: Description of a side effect to run *after* the state change commits
//! - **Environment**: Injected dependencies via traits (clock, notifier)
//! - **Document store**: Versioned persistence with compare-and-swap writes
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Explicit Effects (no hidden I/O inside reducers)
//! - Dependency Injection via Environment
//! - Optimistic concurrency at the persistence boundary
//!
//! ## Example
//!
//! ```ignore
//! use campus_core::reducer::Reducer;
//! use smallvec::SmallVec;
//!
//! impl Reducer for CounterReducer {
//!     type State = Counter;
//!     type Action = CounterAction;
//!     type Environment = ();
//!     type Effect = CounterEffect;
//!     type Error = CounterError;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut Counter,
//!         action: CounterAction,
//!         _env: &(),
//!     ) -> Result<SmallVec<[CounterEffect; 4]>, CounterError> {
//!         state.count += 1;
//!         Ok(SmallVec::new())
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod store;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → Result<Effects, Error>`.
///
/// They contain all business logic and are deterministic and testable. A reducer
/// that returns `Err` must leave the state untouched, so callers can run it against
/// a scratch copy and only persist on success.
pub mod reducer {
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Effect`: Side effect descriptions produced by a successful transition
    /// - `Error`: Rejection reasons (validation, state conflicts)
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Effect descriptions returned on success
        type Effect;

        /// Error returned when the action is rejected
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed by the caller
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is not allowed in the current
        /// state. The state is left unchanged in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<SmallVec<[Self::Effect; 4]>, Self::Error>;
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::future::Future;
    use std::pin::Pin;
    use thiserror::Error;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Who a notification is addressed to.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(tag = "kind", content = "value", rename_all = "snake_case")]
    pub enum NotificationTarget {
        /// A platform user, resolved to contact details by the collaborator
        User(String),
        /// A raw email address
        Email(String),
    }

    impl fmt::Display for NotificationTarget {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::User(id) => write!(f, "user:{id}"),
                Self::Email(email) => write!(f, "email:{email}"),
            }
        }
    }

    /// Notification templates understood by the delivery collaborator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TemplateKind {
        /// Registration confirmed on arrival
        RsvpConfirmation,
        /// Registration placed on the waitlist
        RsvpWaitlisted,
        /// Waitlisted registration promoted to confirmed
        RsvpPromoted,
        /// Day-before reminder for confirmed attendees
        EventReminder,
        /// Registration cancelled by the attendee
        RsvpCancelled,
    }

    impl TemplateKind {
        /// Wire name of the template.
        #[must_use]
        pub const fn as_str(self) -> &'static str {
            match self {
                Self::RsvpConfirmation => "rsvp_confirmation",
                Self::RsvpWaitlisted => "rsvp_waitlisted",
                Self::RsvpPromoted => "rsvp_promoted",
                Self::EventReminder => "event_reminder",
                Self::RsvpCancelled => "rsvp_cancelled",
            }
        }
    }

    impl fmt::Display for TemplateKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Errors reported by the notification collaborator.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum NotifyError {
        /// The collaborator refused or failed to deliver
        #[error("Notification delivery failed: {0}")]
        Delivery(String),

        /// The collaborator did not answer in time
        #[error("Notification timed out after {0}ms")]
        Timeout(u64),
    }

    /// Future returned by [`Notifier::notify`].
    pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

    /// Notification delivery collaborator (email, SMS, push).
    ///
    /// Calls are best-effort: the core never lets a failure or slow answer
    /// affect the outcome of the state transition that triggered it.
    ///
    /// Returns `BoxFuture` instead of async fn to be dyn-compatible.
    pub trait Notifier: Send + Sync {
        /// Deliver one notification.
        fn notify(
            &self,
            target: NotificationTarget,
            kind: TemplateKind,
            payload: serde_json::Value,
        ) -> NotifyFuture<'_>;
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, NotificationTarget, SystemClock, TemplateKind};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn template_kind_wire_names() {
        assert_eq!(TemplateKind::RsvpPromoted.as_str(), "rsvp_promoted");
        assert_eq!(
            serde_json::to_value(TemplateKind::EventReminder).ok(),
            Some(serde_json::json!("event_reminder"))
        );
    }

    #[test]
    fn notification_target_display() {
        assert_eq!(NotificationTarget::User("u1".into()).to_string(), "user:u1");
        assert_eq!(
            NotificationTarget::Email("a@b.edu".into()).to_string(),
            "email:a@b.edu"
        );
    }
}
