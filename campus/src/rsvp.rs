//! RSVP state machine for one event's attendee list.
//!
//! The reducer is pure: it validates an [`RsvpAction`] against the current
//! [`Event`], mutates the registration log in place, and describes follow-up
//! work as [`RsvpEffect`]s. Effects are executed by the service layer only
//! after the new state has been committed to the store.
//!
//! # Invariants
//!
//! ```text
//! confirmed_count <= effective_limit            (always)
//! at most one active record per user            (confirmed or waitlisted)
//! waitlisted only if the limit was reached at arrival
//! promotion takes the earliest registered_at first
//! ```
//!
//! A rejected action leaves the event untouched.

use crate::error::{ClosedReason, RsvpError};
use crate::types::{Event, EventId, EventStatus, Registration, RegistrationStatus, RsvpCounts, UserId};
use campus_core::environment::{Clock, TemplateKind};
use campus_core::reducer::Reducer;
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

// ============================================================================
// Actions & Effects
// ============================================================================

/// Inputs to the RSVP state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RsvpAction {
    /// Register a user; confirmed if a seat is free, waitlisted otherwise
    Register {
        /// Registering user
        user_id: UserId,
    },
    /// Cancel the user's active registration, promoting the next waitlisted
    /// attendee if a seat frees up
    Cancel {
        /// Cancelling user
        user_id: UserId,
    },
    /// Promote the earliest waitlisted attendee if a seat is free
    PromoteNext,
}

/// Work to run once the transition is committed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RsvpEffect {
    /// Publish refreshed counts to the event room
    RsvpUpdated {
        /// Event
        event_id: EventId,
        /// Counts after the transition
        counts: RsvpCounts,
    },
    /// Best-effort notification through the external collaborator
    Notify {
        /// Recipient
        user_id: UserId,
        /// Template
        kind: TemplateKind,
    },
    /// A waitlisted attendee now holds a seat
    Promoted {
        /// Promoted user
        user_id: UserId,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the RSVP reducer
#[derive(Clone)]
pub struct RsvpEnvironment {
    /// Time source for deadlines and arrival order
    pub clock: Arc<dyn Clock>,
}

impl RsvpEnvironment {
    /// Creates a new `RsvpEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer enforcing the capacity and ordering invariants
#[derive(Clone, Copy, Debug, Default)]
pub struct RsvpReducer;

impl RsvpReducer {
    /// Creates a new `RsvpReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates `Register`
    fn validate_register(
        event: &Event,
        user_id: &UserId,
        env: &RsvpEnvironment,
    ) -> Result<(), RsvpError> {
        if user_id.as_str().trim().is_empty() {
            return Err(RsvpError::Validation("user id must not be empty".to_string()));
        }

        if event.status != EventStatus::Published {
            return Err(RsvpError::RegistrationClosed {
                reason: ClosedReason::NotPublished(event.status),
            });
        }

        if env.clock.now() > event.registration_deadline {
            return Err(RsvpError::RegistrationClosed {
                reason: ClosedReason::DeadlinePassed,
            });
        }

        if event.registrations.active_for(user_id).is_some() {
            return Err(RsvpError::AlreadyRegistered {
                event_id: event.id,
                user_id: user_id.clone(),
            });
        }

        Ok(())
    }

    /// Promote one waitlisted attendee if the limit allows it
    fn promote_one(event: &mut Event, effects: &mut SmallVec<[RsvpEffect; 4]>) -> bool {
        if event.is_full() {
            return false;
        }
        let Some(position) = event.registrations.promote_next() else {
            return false;
        };
        if let Some(promoted) = event.registrations.get(position) {
            let user_id = promoted.user_id.clone();
            effects.push(RsvpEffect::Promoted {
                user_id: user_id.clone(),
            });
            effects.push(RsvpEffect::Notify {
                user_id,
                kind: TemplateKind::RsvpPromoted,
            });
        }
        true
    }

    fn counts_effect(event: &Event) -> RsvpEffect {
        RsvpEffect::RsvpUpdated {
            event_id: event.id,
            counts: event.counts(),
        }
    }
}

impl Reducer for RsvpReducer {
    type State = Event;
    type Action = RsvpAction;
    type Environment = RsvpEnvironment;
    type Effect = RsvpEffect;
    type Error = RsvpError;

    fn reduce(
        &self,
        event: &mut Event,
        action: RsvpAction,
        env: &RsvpEnvironment,
    ) -> Result<SmallVec<[RsvpEffect; 4]>, RsvpError> {
        match action {
            RsvpAction::Register { user_id } => {
                Self::validate_register(event, &user_id, env)?;

                let now = env.clock.now();
                let status = if event.confirmed_count() < event.effective_limit() {
                    RegistrationStatus::Confirmed
                } else {
                    RegistrationStatus::Waitlisted
                };

                event.registrations.append(Registration {
                    user_id: user_id.clone(),
                    status,
                    registered_at: now,
                });
                event.updated_at = now;

                let kind = match status {
                    RegistrationStatus::Confirmed => TemplateKind::RsvpConfirmation,
                    _ => TemplateKind::RsvpWaitlisted,
                };

                Ok(smallvec![
                    Self::counts_effect(event),
                    RsvpEffect::Notify { user_id, kind },
                ])
            },

            RsvpAction::Cancel { user_id } => {
                let Some((_, previous)) = event.registrations.cancel(&user_id) else {
                    return Err(RsvpError::NotRegistered {
                        event_id: event.id,
                        user_id,
                    });
                };
                event.updated_at = env.clock.now();

                let mut effects = SmallVec::new();
                if previous == RegistrationStatus::Confirmed {
                    Self::promote_one(event, &mut effects);
                }
                effects.insert(0, Self::counts_effect(event));
                effects.push(RsvpEffect::Notify {
                    user_id,
                    kind: TemplateKind::RsvpCancelled,
                });
                Ok(effects)
            },

            RsvpAction::PromoteNext => {
                if event.status != EventStatus::Published {
                    return Err(RsvpError::RegistrationClosed {
                        reason: ClosedReason::NotPublished(event.status),
                    });
                }

                let mut effects = SmallVec::new();
                if Self::promote_one(event, &mut effects) {
                    event.updated_at = env.clock.now();
                    effects.insert(0, Self::counts_effect(event));
                }
                Ok(effects)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::RegistrationLog;
    use campus_testing::{FixedClock, ReducerTest, assertions, test_clock};
    use chrono::Duration;

    fn env_at(clock: FixedClock) -> RsvpEnvironment {
        RsvpEnvironment::new(Arc::new(clock))
    }

    fn published_event(limit: u32) -> Event {
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

    fn register(event: &mut Event, env: &RsvpEnvironment, user: &str) -> RegistrationStatus {
        RsvpReducer
            .reduce(event, RsvpAction::Register { user_id: user.into() }, env)
            .unwrap();
        event.registrations.active_for(&user.into()).unwrap().status
    }

    #[test]
    fn first_registration_is_confirmed() {
        ReducerTest::new(RsvpReducer::new())
            .with_env(env_at(test_clock()))
            .given_state(published_event(2))
            .when_action(RsvpAction::Register { user_id: "alice".into() })
            .then_state(|event| {
                assert_eq!(event.confirmed_count(), 1);
                assert_eq!(event.available_spots(), 1);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
                assertions::assert_any_effect(effects, |e| {
                    matches!(e, RsvpEffect::Notify { kind: TemplateKind::RsvpConfirmation, .. })
                });
            })
            .run();
    }

    #[test]
    fn limit_reached_places_on_waitlist_and_cancel_promotes() {
        // A, B, C register against a limit of two; A cancels.
        let env = env_at(test_clock());
        let mut event = published_event(2);

        assert_eq!(register(&mut event, &env, "a"), RegistrationStatus::Confirmed);
        assert_eq!(register(&mut event, &env, "b"), RegistrationStatus::Confirmed);
        assert_eq!(register(&mut event, &env, "c"), RegistrationStatus::Waitlisted);

        let effects = RsvpReducer
            .reduce(&mut event, RsvpAction::Cancel { user_id: "a".into() }, &env)
            .unwrap();

        assert_eq!(
            event.registrations.active_for(&"c".into()).unwrap().status,
            RegistrationStatus::Confirmed
        );
        assert_eq!(event.confirmed_count(), 2);
        assert_eq!(event.waitlist_count(), 0);
        assert!(effects.contains(&RsvpEffect::Promoted { user_id: "c".into() }));
        assert!(effects.contains(&RsvpEffect::Notify {
            user_id: "c".into(),
            kind: TemplateKind::RsvpPromoted
        }));
        assert_eq!(
            effects.first(),
            Some(&RsvpEffect::RsvpUpdated {
                event_id: event.id,
                counts: RsvpCounts {
                    confirmed_count: 2,
                    waitlist_count: 0,
                    available_spots: 0
                }
            })
        );
    }

    #[test]
    fn deadline_passed_rejects_even_with_free_seats() {
        let clock = test_clock();
        let mut event = published_event(50);
        event.registration_deadline = clock.now() - Duration::minutes(1);

        ReducerTest::new(RsvpReducer::new())
            .with_env(env_at(clock))
            .given_state(event)
            .when_action(RsvpAction::Register { user_id: "late".into() })
            .then_error(|err| {
                assert_eq!(
                    *err,
                    RsvpError::RegistrationClosed {
                        reason: ClosedReason::DeadlinePassed
                    }
                );
            })
            .run();
    }

    #[test]
    fn draft_event_is_closed() {
        let mut event = published_event(5);
        event.status = EventStatus::Draft;

        ReducerTest::new(RsvpReducer::new())
            .with_env(env_at(test_clock()))
            .given_state(event)
            .when_action(RsvpAction::Register { user_id: "u".into() })
            .then_error(|err| assert!(matches!(err, RsvpError::RegistrationClosed { .. })))
            .run();
    }

    #[test]
    fn second_registration_is_rejected() {
        let env = env_at(test_clock());
        let mut event = published_event(5);
        register(&mut event, &env, "dup");

        ReducerTest::new(RsvpReducer::new())
            .with_env(env)
            .given_state(event)
            .when_action(RsvpAction::Register { user_id: "dup".into() })
            .then_error(|err| assert!(matches!(err, RsvpError::AlreadyRegistered { .. })))
            .then_state(|event| assert_eq!(event.registrations.len(), 1))
            .run();
    }

    #[test]
    fn cancel_without_registration_is_rejected() {
        ReducerTest::new(RsvpReducer::new())
            .with_env(env_at(test_clock()))
            .given_state(published_event(5))
            .when_action(RsvpAction::Cancel { user_id: "ghost".into() })
            .then_error(|err| assert!(matches!(err, RsvpError::NotRegistered { .. })))
            .run();
    }

    #[test]
    fn reactivation_appends_a_fresh_record() {
        let env = env_at(test_clock());
        let mut event = published_event(1);
        register(&mut event, &env, "u");
        RsvpReducer
            .reduce(&mut event, RsvpAction::Cancel { user_id: "u".into() }, &env)
            .unwrap();

        assert_eq!(register(&mut event, &env, "u"), RegistrationStatus::Confirmed);
        assert_eq!(event.registrations.len(), 2);
        assert_eq!(
            event.registrations.get(0).unwrap().status,
            RegistrationStatus::Cancelled
        );
    }

    #[test]
    fn cancelling_a_waitlisted_record_promotes_nobody() {
        let env = env_at(test_clock());
        let mut event = published_event(1);
        register(&mut event, &env, "a");
        register(&mut event, &env, "b");
        register(&mut event, &env, "c");

        let effects = RsvpReducer
            .reduce(&mut event, RsvpAction::Cancel { user_id: "b".into() }, &env)
            .unwrap();

        assert!(!effects.iter().any(|e| matches!(e, RsvpEffect::Promoted { .. })));
        assert_eq!(event.waitlist_count(), 1);
        assert_eq!(event.confirmed_count(), 1);
    }

    #[test]
    fn promote_next_follows_arrival_order() {
        let env = env_at(test_clock());
        let mut event = published_event(1);
        for user in ["a", "b", "c", "d"] {
            register(&mut event, &env, user);
        }

        // Raising the limit frees seats without promoting anybody.
        event.registration_limit = None;
        event.capacity = 3;

        let mut promoted = Vec::new();
        loop {
            let effects = RsvpReducer
                .reduce(&mut event, RsvpAction::PromoteNext, &env)
                .unwrap();
            let Some(user) = effects.iter().find_map(|e| match e {
                RsvpEffect::Promoted { user_id } => Some(user_id.to_string()),
                _ => None,
            }) else {
                break;
            };
            promoted.push(user);
        }

        assert_eq!(promoted, vec!["b", "c"]);
        assert_eq!(event.confirmed_count(), 3);
        assert_eq!(event.waitlist_count(), 1);
    }

    #[test]
    fn promote_next_without_room_changes_nothing() {
        let env = env_at(test_clock());
        let mut event = published_event(1);
        register(&mut event, &env, "a");
        register(&mut event, &env, "b");

        ReducerTest::new(RsvpReducer::new())
            .with_env(env)
            .given_state(event)
            .when_action(RsvpAction::PromoteNext)
            .then_effects(assertions::assert_no_effects)
            .then_state(|event| assert_eq!(event.waitlist_count(), 1))
            .run();
    }
}
