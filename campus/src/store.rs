//! Event store access layer.
//!
//! Every mutation of an event, whether it comes from a request or from the
//! background jobs, goes through [`EventRepository::atomic_update`]: read the
//! current version, apply the mutator to a private copy, and write it back with
//! compare-and-swap. A lost race re-reads and re-applies the mutator, up to the
//! configured attempt budget.

use crate::error::RsvpError;
use crate::metrics;
use crate::types::{Event, EventId};
use campus_core::store::{DocumentStore, StoreError, Version};
use campus_runtime::retry::{RetryError, RetryPolicy, retry_if};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a committed update
#[derive(Debug, Clone)]
pub struct Committed<R> {
    /// The event as written
    pub event: Event,
    /// Version after the write
    pub version: Version,
    /// Mutator result
    pub output: R,
}

/// Failure of a single update attempt
#[derive(Debug)]
enum AttemptError {
    Store(StoreError),
    Rejected(RsvpError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Rejected(err) => write!(f, "{err}"),
        }
    }
}

/// Typed access to persisted events
#[derive(Clone)]
pub struct EventRepository {
    store: Arc<dyn DocumentStore<EventId, Event>>,
    retry: RetryPolicy,
}

impl EventRepository {
    /// Creates a new `EventRepository`
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore<EventId, Event>>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Load an event.
    ///
    /// # Errors
    ///
    /// `EventNotFound` or `Persistence`.
    pub async fn get(&self, id: EventId) -> Result<Event, RsvpError> {
        self.store
            .get(id)
            .await
            .map(|versioned| versioned.document)
            .map_err(|err| RsvpError::from_store(id, err))
    }

    /// Persist a new event.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store fails or the id is taken.
    pub async fn insert(&self, event: Event) -> Result<Version, RsvpError> {
        let id = event.id;
        self.store
            .insert(id, event)
            .await
            .map_err(|err| RsvpError::from_store(id, err))
    }

    /// Snapshot of every event.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store fails.
    pub async fn list(&self) -> Result<Vec<Event>, RsvpError> {
        self.store
            .list()
            .await
            .map(|docs| docs.into_iter().map(|v| v.document).collect())
            .map_err(|err| RsvpError::Persistence(err.to_string()))
    }

    /// Apply `mutator` to the current event and commit it atomically.
    ///
    /// The mutator runs against a fresh copy on every attempt, so it must be
    /// deterministic given the event. When it returns `Err`, nothing is written
    /// and the error is returned as is.
    ///
    /// # Errors
    ///
    /// - Whatever the mutator returns
    /// - `RegistrationConflict` once the retry budget is exhausted
    /// - `EventNotFound` / `Persistence` from the store
    pub async fn atomic_update<R, F>(&self, id: EventId, mutator: F) -> Result<Committed<R>, RsvpError>
    where
        F: FnMut(&mut Event) -> Result<R, RsvpError> + Send,
        R: Send,
    {
        let mutator = &Mutex::new(mutator);
        let result = retry_if(
            &self.retry,
            |attempt| async move {
                let current = self.store.get(id).await.map_err(AttemptError::Store)?;
                let mut draft = current.document;
                let output = {
                    let mut apply = mutator.lock();
                    (*apply)(&mut draft).map_err(AttemptError::Rejected)?
                };
                let version = self
                    .store
                    .compare_and_swap(id, current.version, draft.clone())
                    .await
                    .map_err(AttemptError::Store)?;
                if attempt > 1 {
                    debug!(event_id = %id, attempt, version = %version, "Update committed after retry");
                }
                Ok::<_, AttemptError>(Committed {
                    event: draft,
                    version,
                    output,
                })
            },
            |err: &AttemptError| matches!(err, AttemptError::Store(store_err) if store_err.is_conflict()),
        )
        .await;

        match result {
            Ok(committed) => Ok(committed),
            Err(RetryError::Exhausted { attempts, .. }) => {
                warn!(event_id = %id, attempts, "Optimistic retry budget exhausted");
                metrics::record_conflict();
                Err(RsvpError::RegistrationConflict { attempts })
            },
            Err(RetryError::Permanent(AttemptError::Rejected(err))) => Err(err),
            Err(RetryError::Permanent(AttemptError::Store(err))) => Err(RsvpError::from_store(id, err)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::published_event;
    use campus_runtime::InMemoryDocumentStore;
    use campus_testing::FlakyStore;
    use std::time::Duration;

    fn policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    #[tokio::test]
    async fn update_commits_and_bumps_version() {
        let repo = EventRepository::new(Arc::new(InMemoryDocumentStore::<EventId, Event>::new()), policy(3));
        let event = published_event(4);
        let id = event.id;
        repo.insert(event).await.unwrap();

        let committed = repo
            .atomic_update(id, |event| {
                event.title = "Renamed".to_string();
                Ok(event.title.len())
            })
            .await
            .unwrap();

        assert_eq!(committed.version, Version::new(2));
        assert_eq!(committed.output, 7);
        assert_eq!(repo.get(id).await.unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn rejected_mutation_writes_nothing() {
        let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::<EventId, Event>::new()));
        let repo = EventRepository::new(store.clone(), policy(3));
        let event = published_event(4);
        let id = event.id;
        repo.insert(event).await.unwrap();

        let err = repo
            .atomic_update(id, |_| Err::<(), _>(RsvpError::Validation("nope".into())))
            .await
            .unwrap_err();

        assert_eq!(err, RsvpError::Validation("nope".into()));
        assert_eq!(store.cas_calls(), 0);
    }

    #[tokio::test]
    async fn conflicts_are_retried_with_a_fresh_read() {
        let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::<EventId, Event>::new()));
        let repo = EventRepository::new(store.clone(), policy(3));
        let event = published_event(4);
        let id = event.id;
        repo.insert(event).await.unwrap();
        store.conflict_next(2);

        let mut calls = 0;
        repo.atomic_update(id, |_| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(store.cas_calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_registration_conflict() {
        let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::<EventId, Event>::new()));
        let repo = EventRepository::new(store.clone(), policy(3));
        let event = published_event(4);
        let id = event.id;
        repo.insert(event).await.unwrap();
        store.conflict_next(usize::MAX);

        let err = repo.atomic_update(id, |_| Ok(())).await.unwrap_err();
        assert_eq!(err, RsvpError::RegistrationConflict { attempts: 3 });
    }

    #[tokio::test]
    async fn missing_event_and_outage_map_to_taxonomy() {
        let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::<EventId, Event>::new()));
        let repo = EventRepository::new(store.clone(), policy(3));
        let id = EventId::new();

        assert_eq!(repo.get(id).await.unwrap_err(), RsvpError::EventNotFound(id));

        store.set_unavailable(true);
        let err = repo.atomic_update(id, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, RsvpError::Persistence(_)));
    }
}
