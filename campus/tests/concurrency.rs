//! Concurrency integration tests.
//!
//! Registrations and cancellations racing on one event must never push the
//! confirmed count past the limit or leave a user with two active records.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use campus_events::types::EventPatch;
use campus_events::{Identity, RegistrationStatus, Role, RsvpError, UserId};
use common::{config, published_event, test_app};
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_registrations_respect_the_limit() {
    campus_testing::init_test_tracing();
    let app = test_app(&config(&[("RSVP_MAX_RETRIES", "10"), ("RSVP_RETRY_DELAY_MS", "1")]));
    let event_id = published_event(&app, 3).await;

    let handles: Vec<_> = (0..5)
        .map(|n| {
            let service = app.state.service.clone();
            tokio::spawn(async move {
                service
                    .add_registration(event_id, &UserId::new(format!("student-{n}")))
                    .await
            })
        })
        .collect();

    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap().unwrap().registration.status);
    }

    let confirmed = statuses.iter().filter(|s| **s == RegistrationStatus::Confirmed).count();
    let waitlisted = statuses.iter().filter(|s| **s == RegistrationStatus::Waitlisted).count();
    assert_eq!(confirmed, 3);
    assert_eq!(waitlisted, 2);

    let event = app.state.service.get_event(event_id).await.unwrap();
    assert_eq!(event.confirmed_count(), 3);
    assert_eq!(event.waitlist_count(), 2);
    assert_eq!(event.registrations.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_user_racing_gets_one_registration() {
    let app = test_app(&config(&[("RSVP_MAX_RETRIES", "10"), ("RSVP_RETRY_DELAY_MS", "1")]));
    let event_id = published_event(&app, 10).await;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = app.state.service.clone();
            tokio::spawn(async move { service.add_registration(event_id, &UserId::new("eager")).await })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(RsvpError::AlreadyRegistered { .. }) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(duplicates, 3);
    let event = app.state.service.get_event(event_id).await.unwrap();
    assert_eq!(event.registrations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellations_racing_registrations_keep_seats_consistent() {
    let app = test_app(&config(&[("RSVP_MAX_RETRIES", "20"), ("RSVP_RETRY_DELAY_MS", "1")]));
    let event_id = published_event(&app, 2).await;
    for user in ["a", "b"] {
        app.state.service.add_registration(event_id, &UserId::new(user)).await.unwrap();
    }

    let mut handles = Vec::new();
    for user in ["a", "b"] {
        let service = app.state.service.clone();
        handles.push(tokio::spawn(async move {
            service.cancel_registration(event_id, &UserId::new(user)).await.map(|_| ())
        }));
    }
    for n in 0..4 {
        let service = app.state.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .add_registration(event_id, &UserId::new(format!("late-{n}")))
                .await
                .map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let event = app.state.service.get_event(event_id).await.unwrap();
    assert_eq!(event.confirmed_count(), 2);
    assert_eq!(event.waitlist_count(), 2);

    let active: Vec<_> = event
        .registrations
        .iter()
        .filter(|r| r.status.is_active())
        .map(|r| r.user_id.clone())
        .collect();
    let unique: HashSet<_> = active.iter().collect();
    assert_eq!(active.len(), unique.len());
    assert!(active.iter().all(|u| u.as_str().starts_with("late-")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn promotion_sweep_racing_cancellations_keeps_fifo_and_limit() {
    let app = test_app(&config(&[("RSVP_MAX_RETRIES", "20"), ("RSVP_RETRY_DELAY_MS", "1")]));
    let event_id = published_event(&app, 5).await;
    let organizer = Identity::new("org", Role::Organizer);
    let limit = |limit| EventPatch {
        registration_limit: Some(limit),
        ..EventPatch::default()
    };
    app.state.service.update_event(&organizer, event_id, limit(3)).await.unwrap();
    for user in ["a", "b", "c", "w1", "w2"] {
        app.state.service.add_registration(event_id, &UserId::new(user)).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..3 {
        let job = app.state.promotion.clone();
        handles.push(tokio::spawn(async move {
            let report = job.run_once().await;
            assert_eq!(report.errors, 0);
        }));
    }
    for user in ["a", "b"] {
        let service = app.state.service.clone();
        handles.push(tokio::spawn(async move {
            service.cancel_registration(event_id, &UserId::new(user)).await.unwrap();
        }));
    }
    for n in 0..3 {
        let service = app.state.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .add_registration(event_id, &UserId::new(format!("late-{n}")))
                .await
                .unwrap();
        }));
    }
    {
        let service = app.state.service.clone();
        let organizer = organizer.clone();
        handles.push(tokio::spawn(async move {
            service.update_event(&organizer, event_id, limit(5)).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    app.state.promotion.run_once().await;

    let event = app.state.service.get_event(event_id).await.unwrap();
    assert_eq!(event.effective_limit(), 5);
    assert!(event.confirmed_count() <= event.effective_limit());
    assert_eq!(event.confirmed_count(), 5);
    assert_eq!(event.waitlist_count(), 1);

    // The earliest waitlisted attendees were promoted first.
    for user in ["c", "w1", "w2"] {
        let record = event.registrations.active_for(&UserId::new(user)).unwrap();
        assert_eq!(record.status, RegistrationStatus::Confirmed, "{user}");
    }

    // Whoever is still waiting is queued in arrival order.
    let queued: Vec<_> = event.registrations.waitlisted().map(|r| r.user_id.clone()).collect();
    let in_log_order: Vec<_> = event
        .registrations
        .iter()
        .filter(|r| r.status == RegistrationStatus::Waitlisted)
        .map(|r| r.user_id.clone())
        .collect();
    assert_eq!(queued, in_log_order);

    let active: Vec<_> = event
        .registrations
        .iter()
        .filter(|r| r.status.is_active())
        .map(|r| r.user_id.clone())
        .collect();
    let unique: HashSet<_> = active.iter().collect();
    assert_eq!(active.len(), unique.len());
    assert_eq!(active.len(), 6);
}
