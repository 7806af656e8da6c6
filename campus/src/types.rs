//! Domain types for campus events and their attendee lists.
//!
//! An [`Event`] embeds its [`Registration`] records in an append-only
//! [`RegistrationLog`]. Counts such as confirmed seats or open spots are never
//! stored; they are derived from the log whenever they are read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Verified user identifier supplied by the identity collaborator
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Role attached to a verified identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular attendee
    Student,
    /// May create and manage their own events
    Organizer,
    /// Full access, including operational triggers
    Admin,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" | "user" => Ok(Self::Student),
            "organizer" => Ok(Self::Organizer),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Caller identity, trusted as supplied by the upstream identity collaborator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Verified user id
    pub user_id: UserId,
    /// Verified role
    pub role: Role,
}

impl Identity {
    /// Build an identity
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// Whether this caller is an administrator
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

// ============================================================================
// Registrations
// ============================================================================

/// Event lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Being prepared by the organizer, not visible for registration
    Draft,
    /// Open for registration until the deadline
    Published,
    /// Called off by the organizer
    Cancelled,
    /// Took place
    Completed,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Status of one registration record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Holds a seat
    Confirmed,
    /// Queued behind the limit
    Waitlisted,
    /// Withdrawn; kept for the audit trail
    Cancelled,
}

impl RegistrationStatus {
    /// Confirmed and waitlisted records are active
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Confirmed | Self::Waitlisted)
    }

    /// Metric label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Waitlisted => "waitlisted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A user's attempt to attend an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Attendee
    pub user_id: UserId,
    /// Current status
    pub status: RegistrationStatus,
    /// Arrival time; orders the waitlist
    pub registered_at: DateTime<Utc>,
}

/// Append-only registration records with an index over the active ones.
///
/// Only the record list is persisted. The index (active record per user,
/// FIFO waitlist, confirmed count) is rebuilt when the log is loaded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Registration>", into = "Vec<Registration>")]
pub struct RegistrationLog {
    entries: Vec<Registration>,
    active: HashMap<UserId, usize>,
    waitlist: BTreeSet<(DateTime<Utc>, usize)>,
    confirmed: u32,
}

impl RegistrationLog {
    /// Empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records ever appended
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no record was ever appended
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All records in arrival order
    pub fn iter(&self) -> std::slice::Iter<'_, Registration> {
        self.entries.iter()
    }

    /// Record at `position`
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Registration> {
        self.entries.get(position)
    }

    /// The user's confirmed or waitlisted record, if any
    #[must_use]
    pub fn active_for(&self, user_id: &UserId) -> Option<&Registration> {
        self.active.get(user_id).and_then(|&i| self.entries.get(i))
    }

    /// Count of confirmed records
    #[must_use]
    pub const fn confirmed_count(&self) -> u32 {
        self.confirmed
    }

    /// Count of waitlisted records
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn waitlist_count(&self) -> u32 {
        self.waitlist.len() as u32
    }

    /// Confirmed records in arrival order
    pub fn confirmed(&self) -> impl Iterator<Item = &Registration> {
        self.entries
            .iter()
            .filter(|r| r.status == RegistrationStatus::Confirmed)
    }

    /// Waitlisted records, earliest first
    pub fn waitlisted(&self) -> impl Iterator<Item = &Registration> {
        self.waitlist.iter().filter_map(|&(_, i)| self.entries.get(i))
    }

    /// Append a new active record and index it.
    ///
    /// Returns the record's position. Callers must have checked that the
    /// user holds no active record.
    pub fn append(&mut self, registration: Registration) -> usize {
        let position = self.entries.len();
        self.index(position, &registration);
        self.entries.push(registration);
        position
    }

    /// Mark the user's active record cancelled.
    ///
    /// Returns the record's position and its status before cancelling.
    pub fn cancel(&mut self, user_id: &UserId) -> Option<(usize, RegistrationStatus)> {
        let position = self.active.remove(user_id)?;
        let record = self.entries.get_mut(position)?;
        let previous = record.status;
        match previous {
            RegistrationStatus::Confirmed => {
                self.confirmed = self.confirmed.saturating_sub(1);
            },
            RegistrationStatus::Waitlisted => {
                self.waitlist.remove(&(record.registered_at, position));
            },
            RegistrationStatus::Cancelled => {},
        }
        record.status = RegistrationStatus::Cancelled;
        Some((position, previous))
    }

    /// Promote the earliest waitlisted record to confirmed.
    ///
    /// Returns the promoted record's position.
    pub fn promote_next(&mut self) -> Option<usize> {
        let (_, position) = self.waitlist.pop_first()?;
        let record = self.entries.get_mut(position)?;
        record.status = RegistrationStatus::Confirmed;
        self.confirmed += 1;
        Some(position)
    }

    fn index(&mut self, position: usize, registration: &Registration) {
        match registration.status {
            RegistrationStatus::Confirmed => {
                self.confirmed += 1;
            },
            RegistrationStatus::Waitlisted => {
                self.waitlist.insert((registration.registered_at, position));
            },
            RegistrationStatus::Cancelled => return,
        }
        self.active.insert(registration.user_id.clone(), position);
    }
}

impl PartialEq for RegistrationLog {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for RegistrationLog {}

impl From<Vec<Registration>> for RegistrationLog {
    fn from(entries: Vec<Registration>) -> Self {
        let mut log = Self::new();
        for (position, registration) in entries.iter().enumerate() {
            log.index(position, registration);
        }
        log.entries = entries;
        log
    }
}

impl From<RegistrationLog> for Vec<Registration> {
    fn from(log: RegistrationLog) -> Self {
        log.entries
    }
}

// ============================================================================
// Events
// ============================================================================

/// A campus event with its attendee list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Identifier
    pub id: EventId,
    /// Owner; the only non-admin allowed to change event fields
    pub organizer_id: UserId,
    /// Display title
    pub title: String,
    /// Free-form category (e.g. "workshop", "sports")
    pub category: String,
    /// When the event takes place
    pub starts_at: DateTime<Utc>,
    /// Hard ceiling, fixed at creation
    pub capacity: u32,
    /// Optional lower bound on confirmed seats, never above `capacity`
    pub registration_limit: Option<u32>,
    /// Last moment registrations are accepted
    pub registration_deadline: DateTime<Utc>,
    /// Lifecycle status
    pub status: EventStatus,
    /// Registration records
    pub registrations: RegistrationLog,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last field or registration change
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// The single authoritative bound on confirmed seats
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        self.registration_limit
            .map_or(self.capacity, |limit| limit.min(self.capacity))
    }

    /// Confirmed seats
    #[must_use]
    pub const fn confirmed_count(&self) -> u32 {
        self.registrations.confirmed_count()
    }

    /// Waitlisted registrations
    #[must_use]
    pub fn waitlist_count(&self) -> u32 {
        self.registrations.waitlist_count()
    }

    /// Seats left under the effective limit
    #[must_use]
    pub fn available_spots(&self) -> u32 {
        self.effective_limit().saturating_sub(self.confirmed_count())
    }

    /// Whether every seat under the effective limit is taken
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.available_spots() == 0
    }

    /// Derived counts
    #[must_use]
    pub fn counts(&self) -> RsvpCounts {
        RsvpCounts {
            confirmed_count: self.confirmed_count(),
            waitlist_count: self.waitlist_count(),
            available_spots: self.available_spots(),
        }
    }
}

/// Counts derived from an event's registration log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpCounts {
    /// Confirmed seats
    pub confirmed_count: u32,
    /// Waitlisted registrations
    pub waitlist_count: u32,
    /// Seats left
    pub available_spots: u32,
}

/// Read model returned by the HTTP API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    /// Identifier
    pub id: EventId,
    /// Owner
    pub organizer_id: UserId,
    /// Display title
    pub title: String,
    /// Category
    pub category: String,
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// Hard ceiling
    pub capacity: u32,
    /// Effective limit on confirmed seats
    pub registration_limit: u32,
    /// Registration deadline
    pub registration_deadline: DateTime<Utc>,
    /// Lifecycle status
    pub status: EventStatus,
    /// Derived counts
    #[serde(flatten)]
    pub counts: RsvpCounts,
    /// Whether the limit is reached
    pub is_full: bool,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            organizer_id: event.organizer_id.clone(),
            title: event.title.clone(),
            category: event.category.clone(),
            starts_at: event.starts_at,
            capacity: event.capacity,
            registration_limit: event.effective_limit(),
            registration_deadline: event.registration_deadline,
            status: event.status,
            counts: event.counts(),
            is_full: event.is_full(),
        }
    }
}

/// Input for creating an event
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    /// Display title
    pub title: String,
    /// Category
    #[serde(default)]
    pub category: String,
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// Hard ceiling
    pub capacity: u32,
    /// Optional lower limit on confirmed seats
    #[serde(default)]
    pub registration_limit: Option<u32>,
    /// Defaults to `starts_at`
    #[serde(default)]
    pub registration_deadline: Option<DateTime<Utc>>,
}

/// Partial update of organizer-owned fields
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    /// New title
    #[serde(default)]
    pub title: Option<String>,
    /// New start time
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// New deadline
    #[serde(default)]
    pub registration_deadline: Option<DateTime<Utc>>,
    /// New limit on confirmed seats
    #[serde(default)]
    pub registration_limit: Option<u32>,
}

impl EventPatch {
    /// Whether the patch changes nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.starts_at.is_none()
            && self.registration_deadline.is_none()
            && self.registration_limit.is_none()
    }
}
