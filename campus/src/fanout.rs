//! Fan-out of typed real-time messages to live connections.
//!
//! Three publish primitives: to a user's connections, to a room's members
//! (optionally skipping the acting user), and to everyone. Delivery is a
//! non-blocking `try_send` into each connection's bounded outbox:
//!
//! - a full outbox drops the message for that recipient only
//! - nothing is queued for users without a live connection
//! - nothing is replayed; reconnecting clients re-query state over HTTP
//!
//! Each outbox is FIFO, so the messages of one logical operation reach every
//! recipient in publish order.

use crate::metrics;
use crate::presence::{ConnectionId, Departure, Outbox, PresenceRegistry, Room};
use crate::types::{EventId, RsvpCounts, UserId};
use campus_core::environment::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

// ============================================================================
// Message Types
// ============================================================================

/// Message from server to client.
///
/// Serialized as `{"event": "<name>", "data": {...}}`, with the envelope's
/// `timestamp` alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Fresh counts for an event
    #[serde(rename_all = "camelCase")]
    RsvpUpdated {
        /// Event
        event_id: EventId,
        /// Confirmed seats
        confirmed_count: u32,
        /// Waitlisted registrations
        waitlist_count: u32,
        /// Seats left
        available_spots: u32,
    },
    /// Organizer changed event fields
    #[serde(rename_all = "camelCase")]
    EventUpdated {
        /// Event
        event_id: EventId,
        /// Changed fields and their new values
        fields: serde_json::Value,
    },
    /// An event was published
    #[serde(rename_all = "camelCase")]
    NewEvent {
        /// Event
        event_id: EventId,
        /// Title
        title: String,
        /// Category
        category: String,
        /// Organizer
        organizer: UserId,
    },
    /// In-app notification for one user
    Notification {
        /// Notification id
        id: Uuid,
        /// Notification type (template name)
        #[serde(rename = "type")]
        kind: String,
        /// Headline
        title: String,
        /// Body
        message: String,
        /// Always false when sent
        read: bool,
    },
    /// A user's presence changed
    #[serde(rename_all = "camelCase")]
    Presence {
        /// User
        user_id: UserId,
        /// Whether they have a live connection
        online: bool,
        /// Last activity
        last_seen: DateTime<Utc>,
    },
    /// Join acknowledged
    Joined {
        /// Room
        room: Room,
    },
    /// Leave acknowledged
    Left {
        /// Room
        room: Room,
    },
    /// Reply to a client ping
    Pong,
    /// Client request could not be processed
    Error {
        /// Description
        message: String,
    },
}

impl ServerMessage {
    /// Scope-independent message name, used as a log and metric label
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RsvpUpdated { .. } => "rsvp_updated",
            Self::EventUpdated { .. } => "event_updated",
            Self::NewEvent { .. } => "new_event",
            Self::Notification { .. } => "notification",
            Self::Presence { .. } => "presence",
            Self::Joined { .. } => "joined",
            Self::Left { .. } => "left",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    /// Counts update for an event
    #[must_use]
    pub const fn rsvp_updated(event_id: EventId, counts: RsvpCounts) -> Self {
        Self::RsvpUpdated {
            event_id,
            confirmed_count: counts.confirmed_count,
            waitlist_count: counts.waitlist_count,
            available_spots: counts.available_spots,
        }
    }

    /// In-app notification with a fresh id
    #[must_use]
    pub fn notification(kind: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notification {
            id: Uuid::new_v4(),
            kind: kind.into(),
            title: title.into(),
            message: message.into(),
            read: false,
        }
    }
}

/// Timestamped message as written to the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Payload
    #[serde(flatten)]
    pub message: ServerMessage,
    /// Publish time
    pub timestamp: DateTime<Utc>,
}

/// Per-publish delivery tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Outboxes that accepted the message
    pub delivered: usize,
    /// Outboxes that were full or closed
    pub dropped: usize,
}

// ============================================================================
// Fan-out
// ============================================================================

/// Publishes messages through the presence registry
#[derive(Clone)]
pub struct FanOut {
    registry: Arc<PresenceRegistry>,
    clock: Arc<dyn Clock>,
}

impl FanOut {
    /// Creates a new `FanOut`
    #[must_use]
    pub fn new(registry: Arc<PresenceRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    /// The registry deliveries are resolved against
    #[must_use]
    pub const fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    /// Wrap a message with the current time
    #[must_use]
    pub fn envelope(&self, message: ServerMessage) -> Arc<Envelope> {
        Arc::new(Envelope {
            message,
            timestamp: self.clock.now(),
        })
    }

    /// Deliver to every live connection of `user_id`; dropped if offline.
    pub fn publish_to_user(&self, user_id: &UserId, message: ServerMessage) -> Delivery {
        let targets = self.registry.user_outboxes(user_id);
        self.deliver("user", targets, message)
    }

    /// Deliver to every member of `room` except `exclude`'s connections.
    pub fn publish_to_room(&self, room: &Room, message: ServerMessage, exclude: Option<&UserId>) -> Delivery {
        let targets = self.registry.room_outboxes(room, exclude);
        self.deliver("room", targets, message)
    }

    /// Deliver to every live connection.
    pub fn publish_to_all(&self, message: ServerMessage) -> Delivery {
        let targets = self.registry.all_outboxes();
        self.deliver("all", targets, message)
    }

    /// Tell the rooms a departed connection was in that its user went offline.
    pub fn announce_departure(&self, departure: &Departure) -> Delivery {
        if !departure.went_offline {
            return Delivery::default();
        }
        let message = ServerMessage::Presence {
            user_id: departure.user_id.clone(),
            online: false,
            last_seen: departure.last_seen,
        };
        let mut total = Delivery::default();
        for room in &departure.rooms {
            if matches!(room, Room::User(_)) {
                continue;
            }
            let delivery = self.publish_to_room(room, message.clone(), Some(&departure.user_id));
            total.delivered += delivery.delivered;
            total.dropped += delivery.dropped;
        }
        total
    }

    fn deliver(
        &self,
        scope: &'static str,
        targets: Vec<(ConnectionId, Outbox)>,
        message: ServerMessage,
    ) -> Delivery {
        if targets.is_empty() {
            return Delivery::default();
        }

        let name = message.name();
        let envelope = self.envelope(message);
        let mut delivery = Delivery::default();

        for (connection_id, outbox) in targets {
            match outbox.try_send(Arc::clone(&envelope)) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %connection_id, message = name, "Outbox full, dropping message");
                    delivery.dropped += 1;
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %connection_id, message = name, "Outbox closed, dropping message");
                    delivery.dropped += 1;
                },
            }
        }

        metrics::record_fanout(scope, delivery.delivered, delivery.dropped);
        delivery
    }
}
