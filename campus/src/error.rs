//! Error taxonomy for RSVP and event operations.

use crate::types::{EventId, EventStatus, UserId};
use campus_core::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Why registration is not accepted for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    /// The registration deadline has passed
    DeadlinePassed,
    /// The event is not in the published state
    NotPublished(EventStatus),
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadlinePassed => f.write_str("registration deadline has passed"),
            Self::NotPublished(status) => write!(f, "event is {status}"),
        }
    }
}

/// Errors returned by the RSVP state machine and the services around it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RsvpError {
    /// Malformed input, rejected before touching the store
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No such event
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// The user already holds a confirmed or waitlisted registration
    #[error("User {user_id} is already registered for event {event_id}")]
    AlreadyRegistered {
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
    },

    /// The user holds no active registration to cancel
    #[error("User {user_id} is not registered for event {event_id}")]
    NotRegistered {
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
    },

    /// Deadline passed or event not published
    #[error("Registration closed: {reason}")]
    RegistrationClosed {
        /// Why
        reason: ClosedReason,
    },

    /// Optimistic retry budget exhausted under contention
    #[error("Registration conflict after {attempts} attempts, please retry")]
    RegistrationConflict {
        /// Attempts made
        attempts: usize,
    },

    /// Notification side channel failed
    #[error("External service error: {0}")]
    ExternalService(String),

    /// The event store could not be reached
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The caller may not perform this operation
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl RsvpError {
    /// Expected control flow rather than a fault.
    ///
    /// Expected errors are logged at `debug`.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::EventNotFound(_)
                | Self::AlreadyRegistered { .. }
                | Self::NotRegistered { .. }
                | Self::RegistrationClosed { .. }
                | Self::Forbidden(_)
        )
    }

    /// Map a store error raised while working on `event_id`.
    #[must_use]
    pub fn from_store(event_id: EventId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::EventNotFound(event_id),
            StoreError::AlreadyExists => Self::Persistence(format!("event {event_id} already exists")),
            StoreError::Conflict { .. } => Self::RegistrationConflict { attempts: 1 },
            StoreError::Unavailable(message) => Self::Persistence(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_conflicts_are_expected() {
        let event_id = EventId::new();
        assert!(RsvpError::AlreadyRegistered {
            event_id,
            user_id: "u".into()
        }
        .is_expected());
        assert!(RsvpError::RegistrationClosed {
            reason: ClosedReason::DeadlinePassed
        }
        .is_expected());
        assert!(!RsvpError::RegistrationConflict { attempts: 3 }.is_expected());
        assert!(!RsvpError::Persistence("down".into()).is_expected());
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        let id = EventId::new();
        assert_eq!(RsvpError::from_store(id, StoreError::NotFound), RsvpError::EventNotFound(id));
        assert_eq!(
            RsvpError::from_store(id, StoreError::Unavailable("timeout".into())),
            RsvpError::Persistence("timeout".into())
        );
    }

    #[test]
    fn closed_reason_message() {
        let err = RsvpError::RegistrationClosed {
            reason: ClosedReason::NotPublished(EventStatus::Draft),
        };
        assert_eq!(err.to_string(), "Registration closed: event is draft");
    }
}
