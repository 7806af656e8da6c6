//! RSVP and event lifecycle service.
//!
//! Every operation follows the same steps:
//! 1. Run the reducer (or a field mutation) inside [`EventRepository::atomic_update`]
//! 2. Commit the new event version
//! 3. Execute the resulting effects: fan-out first, then notifications
//!
//! Effects run only after a successful commit, so a lost race never leaks a
//! message for a state that was not written.

use crate::error::RsvpError;
use crate::fanout::{FanOut, ServerMessage};
use crate::metrics;
use crate::notify::{NotificationDispatcher, event_payload};
use crate::presence::Room;
use crate::rsvp::{RsvpAction, RsvpEffect, RsvpEnvironment, RsvpReducer};
use crate::store::EventRepository;
use crate::types::{
    Event, EventId, EventPatch, EventStatus, Identity, NewEvent, Registration, RegistrationLog,
    RegistrationStatus, Role, RsvpCounts, UserId,
};
use campus_core::reducer::Reducer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How notification effects are issued
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyMode {
    /// Spawned, never awaited (request paths)
    Background,
    /// Awaited so failures can be counted (background jobs)
    Awaited,
}

/// Who triggered a promotion, used as a metric label
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromotionSource {
    /// Seat freed by a cancellation
    Cancel,
    /// Background promotion sweep
    Sweep,
}

impl PromotionSource {
    /// Label for promotions the action can cause; `None` if it cannot promote.
    const fn for_action(action: &RsvpAction) -> Option<Self> {
        match action {
            RsvpAction::Register { .. } => None,
            RsvpAction::Cancel { .. } => Some(Self::Cancel),
            RsvpAction::PromoteNext => Some(Self::Sweep),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Sweep => "sweep",
        }
    }
}

/// Answer to the reconciliation query
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpStatus {
    /// Event
    pub event_id: EventId,
    /// Caller's active registration, if any
    pub registration: Option<Registration>,
    /// Current counts
    #[serde(flatten)]
    pub counts: RsvpCounts,
}

/// A committed registration change and the counts it produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsvpChange {
    /// Registration as committed
    pub registration: Registration,
    /// Counts of the committed event version
    pub counts: RsvpCounts,
}

/// Result of one promotion attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Promotion {
    /// Promoted user
    pub user_id: UserId,
    /// Notifications that could not be delivered (awaited mode only)
    pub notifications_failed: usize,
}

/// Application service for RSVPs and organizer-owned event fields
#[derive(Clone)]
pub struct RsvpService {
    repo: EventRepository,
    reducer: RsvpReducer,
    env: RsvpEnvironment,
    fanout: Arc<FanOut>,
    notifications: NotificationDispatcher,
}

impl RsvpService {
    /// Creates a new `RsvpService`
    #[must_use]
    pub const fn new(
        repo: EventRepository,
        env: RsvpEnvironment,
        fanout: Arc<FanOut>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            repo,
            reducer: RsvpReducer::new(),
            env,
            fanout,
            notifications,
        }
    }

    /// Event repository
    #[must_use]
    pub const fn repository(&self) -> &EventRepository {
        &self.repo
    }

    /// Fan-out service
    #[must_use]
    pub const fn fanout(&self) -> &Arc<FanOut> {
        &self.fanout
    }

    /// Notification dispatcher
    #[must_use]
    pub const fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    /// Current time according to the service clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.env.clock.now()
    }

    // ========================================================================
    // RSVP operations
    // ========================================================================

    /// Register `user_id` for an event.
    ///
    /// # Errors
    ///
    /// `Validation`, `EventNotFound`, `RegistrationClosed`,
    /// `AlreadyRegistered`, `RegistrationConflict` or `Persistence`.
    pub async fn add_registration(&self, event_id: EventId, user_id: &UserId) -> Result<RsvpChange, RsvpError> {
        let action = RsvpAction::Register {
            user_id: user_id.clone(),
        };
        let source = PromotionSource::for_action(&action);
        let (event, effects) = self
            .apply(event_id, action)
            .await
            .inspect_err(|err| log_failure("add_registration", event_id, err))?;

        let registration = event
            .registrations
            .active_for(user_id)
            .cloned()
            .ok_or_else(|| RsvpError::Persistence("committed registration is missing".to_string()))?;

        info!(
            event_id = %event_id,
            user_id = %user_id,
            status = registration.status.as_str(),
            "Registration added"
        );
        metrics::record_registration(registration.status.as_str());

        self.execute(&event, effects, NotifyMode::Background, source).await;
        Ok(RsvpChange {
            registration,
            counts: event.counts(),
        })
    }

    /// Cancel the user's active registration, promoting the next waitlisted
    /// attendee if a confirmed seat was freed.
    ///
    /// # Errors
    ///
    /// `EventNotFound`, `NotRegistered`, `RegistrationConflict` or `Persistence`.
    pub async fn cancel_registration(&self, event_id: EventId, user_id: &UserId) -> Result<RsvpChange, RsvpError> {
        let action = RsvpAction::Cancel {
            user_id: user_id.clone(),
        };
        let source = PromotionSource::for_action(&action);
        let (event, effects) = self
            .apply(event_id, action)
            .await
            .inspect_err(|err| log_failure("cancel_registration", event_id, err))?;

        let cancelled = event
            .registrations
            .iter()
            .rev()
            .find(|r| &r.user_id == user_id && r.status == RegistrationStatus::Cancelled)
            .cloned()
            .ok_or_else(|| RsvpError::Persistence("cancelled registration is missing".to_string()))?;

        info!(event_id = %event_id, user_id = %user_id, "Registration cancelled");
        metrics::record_cancellation();

        self.execute(&event, effects, NotifyMode::Background, source).await;
        Ok(RsvpChange {
            registration: cancelled,
            counts: event.counts(),
        })
    }

    /// Promote the earliest waitlisted attendee if a seat is free.
    ///
    /// Returns `None` when nobody was promoted.
    ///
    /// # Errors
    ///
    /// `EventNotFound`, `RegistrationClosed` (event not published),
    /// `RegistrationConflict` or `Persistence`.
    pub async fn promote_next(&self, event_id: EventId, mode: NotifyMode) -> Result<Option<Promotion>, RsvpError> {
        let action = RsvpAction::PromoteNext;
        let source = PromotionSource::for_action(&action);
        let (event, effects) = self.apply(event_id, action).await?;

        let promoted = effects.iter().find_map(|effect| match effect {
            RsvpEffect::Promoted { user_id } => Some(user_id.clone()),
            _ => None,
        });
        let Some(user_id) = promoted else {
            return Ok(None);
        };

        info!(event_id = %event_id, user_id = %user_id, "Waitlisted registration promoted");
        let notifications_failed = self.execute(&event, effects, mode, source).await;
        Ok(Some(Promotion {
            user_id,
            notifications_failed,
        }))
    }

    /// The caller's active registration and the current counts.
    ///
    /// # Errors
    ///
    /// `EventNotFound` or `Persistence`.
    pub async fn registration_status(&self, event_id: EventId, user_id: &UserId) -> Result<RsvpStatus, RsvpError> {
        let event = self.repo.get(event_id).await?;
        Ok(RsvpStatus {
            event_id,
            registration: event.registrations.active_for(user_id).cloned(),
            counts: event.counts(),
        })
    }

    // ========================================================================
    // Event lifecycle
    // ========================================================================

    /// Load one event.
    ///
    /// # Errors
    ///
    /// `EventNotFound` or `Persistence`.
    pub async fn get_event(&self, event_id: EventId) -> Result<Event, RsvpError> {
        self.repo.get(event_id).await
    }

    /// Create a draft event owned by the caller.
    ///
    /// # Errors
    ///
    /// `Forbidden` for students, `Validation` for bad input, `Persistence`.
    pub async fn create_event(&self, identity: &Identity, input: NewEvent) -> Result<Event, RsvpError> {
        if identity.role == Role::Student {
            return Err(RsvpError::Forbidden("only organizers can create events".to_string()));
        }

        let registration_deadline = input.registration_deadline.unwrap_or(input.starts_at);
        validate_title(&input.title)?;
        validate_limits(input.capacity, input.registration_limit, 0)?;
        validate_schedule(input.starts_at, registration_deadline)?;

        let now = self.now();
        let event = Event {
            id: EventId::new(),
            organizer_id: identity.user_id.clone(),
            title: input.title.trim().to_string(),
            category: input.category,
            starts_at: input.starts_at,
            capacity: input.capacity,
            registration_limit: input.registration_limit,
            registration_deadline,
            status: EventStatus::Draft,
            registrations: RegistrationLog::new(),
            created_at: now,
            updated_at: now,
        };

        self.repo.insert(event.clone()).await?;
        info!(event_id = %event.id, organizer_id = %event.organizer_id, "Event created");
        Ok(event)
    }

    /// Move a draft event to published and announce it to everyone.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `Validation` if the event is not a draft, store errors.
    pub async fn publish_event(&self, identity: &Identity, event_id: EventId) -> Result<Event, RsvpError> {
        let now = self.now();
        let committed = self
            .repo
            .atomic_update(event_id, |event| {
                ensure_owner(identity, event)?;
                if event.status != EventStatus::Draft {
                    return Err(RsvpError::Validation(format!(
                        "only draft events can be published, event is {}",
                        event.status
                    )));
                }
                event.status = EventStatus::Published;
                event.updated_at = now;
                Ok(())
            })
            .await
            .inspect_err(|err| log_failure("publish_event", event_id, err))?;

        let event = committed.event;
        info!(event_id = %event_id, "Event published");
        self.fanout.publish_to_all(ServerMessage::NewEvent {
            event_id,
            title: event.title.clone(),
            category: event.category.clone(),
            organizer: event.organizer_id.clone(),
        });
        Ok(event)
    }

    /// Change organizer-owned fields.
    ///
    /// Raising the limit does not promote anybody here; the promotion sweep
    /// picks that up.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `Validation` (empty patch, closed event, bad values,
    /// limit below the confirmed count), store errors.
    pub async fn update_event(
        &self,
        identity: &Identity,
        event_id: EventId,
        patch: EventPatch,
    ) -> Result<Event, RsvpError> {
        if patch.is_empty() {
            return Err(RsvpError::Validation("nothing to update".to_string()));
        }

        let now = self.now();
        let committed = self
            .repo
            .atomic_update(event_id, |event| {
                ensure_owner(identity, event)?;
                if matches!(event.status, EventStatus::Cancelled | EventStatus::Completed) {
                    return Err(RsvpError::Validation(format!("event is {}", event.status)));
                }
                apply_patch(event, &patch, now)
            })
            .await
            .inspect_err(|err| log_failure("update_event", event_id, err))?;

        info!(event_id = %event_id, "Event updated");
        self.fanout.publish_to_room(
            &Room::Event(event_id),
            ServerMessage::EventUpdated {
                event_id,
                fields: committed.output,
            },
            Some(&identity.user_id),
        );
        Ok(committed.event)
    }

    /// Cancel a draft or published event.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `Validation` if already cancelled or completed, store errors.
    pub async fn cancel_event(&self, identity: &Identity, event_id: EventId) -> Result<Event, RsvpError> {
        let now = self.now();
        let committed = self
            .repo
            .atomic_update(event_id, |event| {
                ensure_owner(identity, event)?;
                if !matches!(event.status, EventStatus::Draft | EventStatus::Published) {
                    return Err(RsvpError::Validation(format!("event is already {}", event.status)));
                }
                event.status = EventStatus::Cancelled;
                event.updated_at = now;
                Ok(())
            })
            .await
            .inspect_err(|err| log_failure("cancel_event", event_id, err))?;

        info!(event_id = %event_id, "Event cancelled");
        self.fanout.publish_to_room(
            &Room::Event(event_id),
            ServerMessage::EventUpdated {
                event_id,
                fields: json!({ "status": EventStatus::Cancelled }),
            },
            Some(&identity.user_id),
        );
        Ok(committed.event)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn apply(
        &self,
        event_id: EventId,
        action: RsvpAction,
    ) -> Result<(Event, SmallVec<[RsvpEffect; 4]>), RsvpError> {
        let committed = self
            .repo
            .atomic_update(event_id, |event| {
                self.reducer.reduce(event, action.clone(), &self.env)
            })
            .await?;
        Ok((committed.event, committed.output))
    }

    /// Run committed effects in order. Returns the number of failed
    /// notifications, which is always zero in background mode.
    ///
    /// `source` labels promotions and is `None` for transitions that cannot
    /// promote anybody.
    async fn execute(
        &self,
        event: &Event,
        effects: SmallVec<[RsvpEffect; 4]>,
        mode: NotifyMode,
        source: Option<PromotionSource>,
    ) -> usize {
        let mut failed = 0;
        for effect in effects {
            match effect {
                RsvpEffect::RsvpUpdated { event_id, counts } => {
                    self.fanout.publish_to_room(
                        &Room::Event(event_id),
                        ServerMessage::rsvp_updated(event_id, counts),
                        None,
                    );
                },
                RsvpEffect::Promoted { user_id } => {
                    if let Some(source) = source {
                        metrics::record_promotion(source.as_str());
                    }
                    self.fanout.publish_to_user(
                        &user_id,
                        ServerMessage::notification(
                            "rsvp_promoted",
                            "You're in!",
                            format!("A seat opened up for {}", event.title),
                        ),
                    );
                },
                RsvpEffect::Notify { user_id, kind } => {
                    let payload = event_payload(event);
                    match mode {
                        NotifyMode::Background => self.notifications.dispatch(&user_id, kind, payload),
                        NotifyMode::Awaited => {
                            if self.notifications.deliver(&user_id, kind, payload).await.is_err() {
                                failed += 1;
                            }
                        },
                    }
                },
            }
        }
        failed
    }
}

fn log_failure(operation: &'static str, event_id: EventId, err: &RsvpError) {
    match err {
        err if err.is_expected() => debug!(operation, event_id = %event_id, error = %err, "Request rejected"),
        RsvpError::RegistrationConflict { .. } | RsvpError::ExternalService(_) => {
            warn!(operation, event_id = %event_id, error = %err, "Request failed");
        },
        _ => error!(operation, event_id = %event_id, error = %err, "Request failed"),
    }
}

fn ensure_owner(identity: &Identity, event: &Event) -> Result<(), RsvpError> {
    if identity.is_admin() || identity.user_id == event.organizer_id {
        Ok(())
    } else {
        Err(RsvpError::Forbidden(format!(
            "{} does not own event {}",
            identity.user_id, event.id
        )))
    }
}

fn validate_title(title: &str) -> Result<(), RsvpError> {
    if title.trim().is_empty() {
        return Err(RsvpError::Validation("title must not be empty".to_string()));
    }
    Ok(())
}

fn validate_limits(capacity: u32, limit: Option<u32>, confirmed: u32) -> Result<(), RsvpError> {
    if capacity == 0 {
        return Err(RsvpError::Validation("capacity must be at least 1".to_string()));
    }
    let Some(limit) = limit else {
        return Ok(());
    };
    if limit == 0 || limit > capacity {
        return Err(RsvpError::Validation(format!(
            "registration limit must be between 1 and capacity ({capacity})"
        )));
    }
    if limit < confirmed {
        return Err(RsvpError::Validation(format!(
            "registration limit {limit} is below the {confirmed} confirmed attendees"
        )));
    }
    Ok(())
}

fn validate_schedule(starts_at: DateTime<Utc>, deadline: DateTime<Utc>) -> Result<(), RsvpError> {
    if deadline > starts_at {
        return Err(RsvpError::Validation(
            "registration deadline must not be after the start time".to_string(),
        ));
    }
    Ok(())
}

/// Apply a patch and return the changed fields as sent to clients
fn apply_patch(event: &mut Event, patch: &EventPatch, now: DateTime<Utc>) -> Result<Value, RsvpError> {
    let starts_at = patch.starts_at.unwrap_or(event.starts_at);
    let deadline = patch.registration_deadline.unwrap_or(event.registration_deadline);
    validate_schedule(starts_at, deadline)?;
    if let Some(title) = &patch.title {
        validate_title(title)?;
    }
    if patch.registration_limit.is_some() {
        validate_limits(event.capacity, patch.registration_limit, event.confirmed_count())?;
    }

    let mut fields = Map::new();
    if let Some(title) = &patch.title {
        event.title = title.trim().to_string();
        fields.insert("title".into(), json!(event.title));
    }
    if let Some(starts_at) = patch.starts_at {
        event.starts_at = starts_at;
        fields.insert("startsAt".into(), json!(starts_at));
    }
    if let Some(deadline) = patch.registration_deadline {
        event.registration_deadline = deadline;
        fields.insert("registrationDeadline".into(), json!(deadline));
    }
    if let Some(limit) = patch.registration_limit {
        event.registration_limit = Some(limit);
        fields.insert("registrationLimit".into(), json!(event.effective_limit()));
        fields.insert("availableSpots".into(), json!(event.available_spots()));
    }
    event.updated_at = now;
    Ok(Value::Object(fields))
}
