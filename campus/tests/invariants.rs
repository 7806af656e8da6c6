//! Property tests for the RSVP state machine.
//!
//! Random sequences of register, cancel and promote are replayed against the
//! reducer and a straightforward queue model. After every step the event must
//! agree with the model and hold its capacity invariants.

#![allow(clippy::unwrap_used)]

use campus_core::environment::Clock;
use campus_core::reducer::Reducer;
use campus_events::rsvp::{RsvpAction, RsvpEnvironment, RsvpReducer};
use campus_events::types::{EventStatus, RegistrationLog};
use campus_events::{Event, EventId, RegistrationStatus, RsvpError, UserId};
use campus_testing::test_clock;
use chrono::Duration;
use proptest::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Register(u8),
    Cancel(u8),
    Promote,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..6).prop_map(Op::Register),
        3 => (0u8..6).prop_map(Op::Cancel),
        1 => Just(Op::Promote),
    ]
}

/// Confirmed set plus FIFO waitlist
#[derive(Default)]
struct Model {
    confirmed: Vec<String>,
    waitlist: VecDeque<String>,
}

impl Model {
    fn is_active(&self, user: &str) -> bool {
        self.confirmed.iter().any(|u| u == user) || self.waitlist.iter().any(|u| u == user)
    }

    fn promote(&mut self, limit: usize) -> bool {
        if self.confirmed.len() >= limit {
            return false;
        }
        match self.waitlist.pop_front() {
            Some(user) => {
                self.confirmed.push(user);
                true
            },
            None => false,
        }
    }
}

fn event(capacity: u32, limit: Option<u32>, now: chrono::DateTime<chrono::Utc>) -> Event {
    Event {
        id: EventId::new(),
        organizer_id: "org".into(),
        title: "Hackathon".into(),
        category: "tech".into(),
        starts_at: now + Duration::days(30),
        capacity,
        registration_limit: limit,
        registration_deadline: now + Duration::days(29),
        status: EventStatus::Published,
        registrations: RegistrationLog::new(),
        created_at: now,
        updated_at: now,
    }
}

fn check_invariants(event: &Event) -> Result<(), TestCaseError> {
    let limit = event.effective_limit();
    prop_assert!(event.confirmed_count() <= limit);
    if event.waitlist_count() > 0 {
        prop_assert_eq!(event.confirmed_count(), limit);
    }

    let active: Vec<_> = event.registrations.iter().filter(|r| r.status.is_active()).collect();
    let users: HashSet<_> = active.iter().map(|r| &r.user_id).collect();
    prop_assert_eq!(users.len(), active.len());

    let waitlisted: Vec<_> = event.registrations.waitlisted().map(|r| r.registered_at).collect();
    prop_assert!(waitlisted.windows(2).all(|pair| pair[0] <= pair[1]));
    Ok(())
}

proptest! {
    #[test]
    fn reducer_matches_queue_model(
        capacity in 1u32..5,
        lower_limit in proptest::option::of(1u32..5),
        ops in proptest::collection::vec(op(), 1..60),
    ) {
        let limit = lower_limit.filter(|l| *l <= capacity);
        let clock = Arc::new(test_clock());
        let env = RsvpEnvironment::new(clock.clone());
        let reducer = RsvpReducer::new();
        let mut state = event(capacity, limit, clock.now());
        let mut model = Model::default();
        let effective = usize::try_from(limit.unwrap_or(capacity).min(capacity)).unwrap();

        for op in ops {
            clock.advance(Duration::seconds(1));
            match op {
                Op::Register(n) => {
                    let user = format!("u{n}");
                    let result = reducer.reduce(&mut state, RsvpAction::Register { user_id: UserId::new(user.clone()) }, &env);
                    if model.is_active(&user) {
                        let is_duplicate = matches!(result, Err(RsvpError::AlreadyRegistered { .. }));
                        prop_assert!(is_duplicate);
                    } else {
                        prop_assert!(result.is_ok());
                        if model.confirmed.len() < effective {
                            model.confirmed.push(user);
                        } else {
                            model.waitlist.push_back(user);
                        }
                    }
                },
                Op::Cancel(n) => {
                    let user = format!("u{n}");
                    let result = reducer.reduce(&mut state, RsvpAction::Cancel { user_id: UserId::new(user.clone()) }, &env);
                    if model.is_active(&user) {
                        prop_assert!(result.is_ok());
                        if let Some(i) = model.confirmed.iter().position(|u| *u == user) {
                            model.confirmed.remove(i);
                            model.promote(effective);
                        } else {
                            model.waitlist.retain(|u| *u != user);
                        }
                    } else {
                        let is_missing = matches!(result, Err(RsvpError::NotRegistered { .. }));
                        prop_assert!(is_missing);
                    }
                },
                Op::Promote => {
                    let result = reducer.reduce(&mut state, RsvpAction::PromoteNext, &env);
                    prop_assert!(result.is_ok());
                    model.promote(effective);
                },
            }

            check_invariants(&state)?;

            let mut confirmed: Vec<_> = state
                .registrations
                .iter()
                .filter(|r| r.status == RegistrationStatus::Confirmed)
                .map(|r| r.user_id.to_string())
                .collect();
            let mut expected = model.confirmed.clone();
            confirmed.sort();
            expected.sort();
            prop_assert_eq!(confirmed, expected);

            let waitlist: Vec<_> = state.registrations.waitlisted().map(|r| r.user_id.to_string()).collect();
            let expected: Vec<_> = model.waitlist.iter().cloned().collect();
            prop_assert_eq!(waitlist, expected);
        }
    }
}
