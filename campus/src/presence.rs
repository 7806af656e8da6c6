//! Presence and room registry.
//!
//! Process-local bookkeeping of live connections: which user owns each
//! connection, which rooms each connection joined, who is in each room, and
//! when each user was last active. The registry is an explicitly constructed
//! object shared through `Arc`; it is created at startup and drained on
//! graceful shutdown.
//!
//! All maps live behind a single `parking_lot::RwLock`, so a room's membership
//! set is never mutated by two connections at once. Lookups used by fan-out
//! take the read lock, clone the outbox senders they need, and release the
//! lock before any delivery is attempted.
//!
//! Last-seen times outlive their connections but not forever; the heartbeat
//! prunes offline users past the retention window.
//!
//! Only correct for a single running instance.

use crate::fanout::Envelope;
use crate::types::{EventId, UserId};
use campus_core::environment::Clock;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Sending half of a connection's bounded outbox
pub type Outbox = mpsc::Sender<Arc<Envelope>>;

/// Process-unique connection handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Logical real-time channel
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Room {
    /// Updates about one event
    Event(EventId),
    /// A user's private channel
    User(UserId),
    /// Campus-wide feed
    Global,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// Room name that does not follow `event:<uuid>`, `user:<id>` or `global`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid room name '{0}'")]
pub struct InvalidRoom(String);

impl FromStr for Room {
    type Err = InvalidRoom;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "global" {
            return Ok(Self::Global);
        }
        match s.split_once(':') {
            Some(("event", id)) => id
                .parse()
                .map(Self::Event)
                .map_err(|_| InvalidRoom(s.to_string())),
            Some(("user", id)) if !id.is_empty() => Ok(Self::User(UserId::new(id))),
            _ => Err(InvalidRoom(s.to_string())),
        }
    }
}

impl TryFrom<String> for Room {
    type Error = InvalidRoom;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Room> for String {
    fn from(room: Room) -> Self {
        room.to_string()
    }
}

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    /// The connection is not registered (already disconnected)
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Private rooms of other users cannot be joined
    #[error("room {0} is private")]
    Forbidden(Room),
}

/// What `on_disconnect` removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Removed connection
    pub connection_id: ConnectionId,
    /// Its owner
    pub user_id: UserId,
    /// Rooms the connection was in
    pub rooms: Vec<Room>,
    /// Whether this was the user's last connection
    pub went_offline: bool,
    /// The user's last activity
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug)]
struct Session {
    user_id: UserId,
    rooms: HashSet<Room>,
    last_activity: DateTime<Utc>,
    outbox: Outbox,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<ConnectionId, Session>,
    user_connections: HashMap<UserId, HashSet<ConnectionId>>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
    last_seen: HashMap<UserId, DateTime<Utc>>,
}

impl Inner {
    fn remove(&mut self, connection_id: ConnectionId) -> Option<Departure> {
        let session = self.sessions.remove(&connection_id)?;

        for room in &session.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }

        let went_offline = match self.user_connections.get_mut(&session.user_id) {
            Some(connections) => {
                connections.remove(&connection_id);
                if connections.is_empty() {
                    self.user_connections.remove(&session.user_id);
                    true
                } else {
                    false
                }
            },
            None => true,
        };

        let last_seen = self
            .last_seen
            .get(&session.user_id)
            .copied()
            .unwrap_or(session.last_activity);

        Some(Departure {
            connection_id,
            user_id: session.user_id,
            rooms: session.rooms.into_iter().collect(),
            went_offline,
            last_seen,
        })
    }
}

/// Registry of live connections and their room subscriptions
pub struct PresenceRegistry {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

impl fmt::Debug for PresenceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PresenceRegistry")
            .field("connections", &inner.sessions.len())
            .field("rooms", &inner.rooms.len())
            .finish()
    }
}

impl PresenceRegistry {
    /// Empty registry
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection for `user_id`.
    pub fn register(&self, user_id: UserId, outbox: Outbox) -> ConnectionId {
        let connection_id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = self.clock.now();

        let mut inner = self.inner.write();
        inner
            .user_connections
            .entry(user_id.clone())
            .or_default()
            .insert(connection_id);
        inner.last_seen.insert(user_id.clone(), now);
        inner.sessions.insert(
            connection_id,
            Session {
                user_id,
                rooms: HashSet::new(),
                last_activity: now,
                outbox,
            },
        );
        connection_id
    }

    /// Subscribe a connection to a room.
    ///
    /// Idempotent; returns `false` when the connection was already a member.
    ///
    /// # Errors
    ///
    /// `UnknownConnection`, or `Forbidden` for another user's private room.
    pub fn join(&self, connection_id: ConnectionId, room: Room) -> Result<bool, PresenceError> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(&connection_id)
            .ok_or(PresenceError::UnknownConnection(connection_id))?;

        if let Room::User(owner) = &room {
            if *owner != session.user_id {
                return Err(PresenceError::Forbidden(room));
            }
        }

        if !session.rooms.insert(room.clone()) {
            return Ok(false);
        }
        inner.rooms.entry(room).or_default().insert(connection_id);
        Ok(true)
    }

    /// Unsubscribe a connection from a room, deleting the room when empty.
    ///
    /// Returns `false` when the connection was not a member.
    ///
    /// # Errors
    ///
    /// `UnknownConnection`.
    pub fn leave(&self, connection_id: ConnectionId, room: &Room) -> Result<bool, PresenceError> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(&connection_id)
            .ok_or(PresenceError::UnknownConnection(connection_id))?;

        if !session.rooms.remove(room) {
            return Ok(false);
        }
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
        Ok(true)
    }

    /// Remove a connection from every room and from the user mapping.
    ///
    /// Dropping the session's outbox sender ends the connection's writer.
    /// Returns `None` if the connection was already gone.
    pub fn on_disconnect(&self, connection_id: ConnectionId) -> Option<Departure> {
        self.inner.write().remove(connection_id)
    }

    /// Record activity on a connection.
    pub fn touch(&self, connection_id: ConnectionId) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let Some(session) = inner.sessions.get_mut(&connection_id) else {
            return;
        };
        session.last_activity = now;
        let user_id = session.user_id.clone();
        inner.last_seen.insert(user_id, now);
    }

    /// Connections idle for longer than `idle`.
    #[must_use]
    pub fn stale_connections(&self, idle: chrono::Duration) -> Vec<ConnectionId> {
        let cutoff = self.clock.now() - idle;
        self.inner
            .read()
            .sessions
            .iter()
            .filter(|(_, session)| session.last_activity < cutoff)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Disconnect every connection idle for longer than `idle`.
    pub fn evict_stale(&self, idle: chrono::Duration) -> Vec<Departure> {
        let cutoff = self.clock.now() - idle;
        let mut inner = self.inner.write();
        let stale: Vec<ConnectionId> = inner
            .sessions
            .iter()
            .filter(|(_, session)| session.last_activity < cutoff)
            .map(|(id, _)| *id)
            .collect();
        stale.into_iter().filter_map(|id| inner.remove(id)).collect()
    }

    /// Forget last-seen times of offline users inactive for longer than
    /// `retention`. Returns how many entries were dropped.
    pub fn forget_offline(&self, retention: chrono::Duration) -> usize {
        let cutoff = self.clock.now() - retention;
        let mut inner = self.inner.write();
        let Inner {
            last_seen,
            user_connections,
            ..
        } = &mut *inner;
        let before = last_seen.len();
        last_seen.retain(|user_id, seen| *seen >= cutoff || user_connections.contains_key(user_id));
        before - last_seen.len()
    }

    /// Remove every connection. Used on shutdown.
    pub fn drain(&self) -> Vec<Departure> {
        let mut inner = self.inner.write();
        let all: Vec<ConnectionId> = inner.sessions.keys().copied().collect();
        let departures = all.into_iter().filter_map(|id| inner.remove(id)).collect();
        inner.rooms.clear();
        inner.user_connections.clear();
        departures
    }

    // ------------------------------------------------------------------
    // Delivery lookups
    // ------------------------------------------------------------------

    /// Outboxes of the user's live connections
    #[must_use]
    pub fn user_outboxes(&self, user_id: &UserId) -> Vec<(ConnectionId, Outbox)> {
        let inner = self.inner.read();
        inner
            .user_connections
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id).map(|s| (*id, s.outbox.clone())))
            .collect()
    }

    /// Outboxes of a room's members, optionally skipping one user
    #[must_use]
    pub fn room_outboxes(&self, room: &Room, exclude: Option<&UserId>) -> Vec<(ConnectionId, Outbox)> {
        let inner = self.inner.read();
        inner
            .rooms
            .get(room)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id).map(|s| (*id, s)))
            .filter(|(_, session)| exclude != Some(&session.user_id))
            .map(|(id, session)| (id, session.outbox.clone()))
            .collect()
    }

    /// Outboxes of every live connection
    #[must_use]
    pub fn all_outboxes(&self) -> Vec<(ConnectionId, Outbox)> {
        self.inner
            .read()
            .sessions
            .iter()
            .map(|(id, session)| (*id, session.outbox.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Live connection count
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Non-empty room count
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.inner.read().rooms.len()
    }

    /// Whether the room currently exists
    #[must_use]
    pub fn has_room(&self, room: &Room) -> bool {
        self.inner.read().rooms.contains_key(room)
    }

    /// Users currently subscribed to a room
    #[must_use]
    pub fn room_members(&self, room: &Room) -> HashSet<UserId> {
        let inner = self.inner.read();
        inner
            .rooms
            .get(room)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id).map(|s| s.user_id.clone()))
            .collect()
    }

    /// Rooms a connection is subscribed to
    #[must_use]
    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<Room> {
        self.inner
            .read()
            .sessions
            .get(&connection_id)
            .map(|s| s.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the user has at least one live connection
    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.inner.read().user_connections.contains_key(user_id)
    }

    /// The user's last recorded activity, kept after disconnect
    #[must_use]
    pub fn last_seen(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.inner.read().last_seen.get(user_id).copied()
    }
}
