//! # Campus Testing
//!
//! Testing utilities and helpers for the campus events platform.
//!
//! This crate provides:
//! - Mock implementations of Environment traits
//! - Fault-injecting wrappers around the document store
//! - The Given-When-Then [`ReducerTest`] harness
//!
//! ## Example
//!
//! ```ignore
//! use campus_testing::{RecordingNotifier, test_clock};
//!
//! #[tokio::test]
//! async fn registration_sends_confirmation() {
//!     let notifier = Arc::new(RecordingNotifier::new());
//!     let service = test_service(test_clock(), notifier.clone());
//!
//!     service.add_registration(event_id, "u1".into()).await.unwrap();
//!     assert_eq!(notifier.sent().len(), 1);
//! }
//! ```

use campus_core::environment::{Clock, NotificationTarget, Notifier, NotifyError, NotifyFuture, TemplateKind};
use campus_core::store::{DocumentStore, StoreError, StoreFuture, Version, Versioned};
use chrono::{DateTime, Duration, Utc};


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations for testing.
pub mod mocks {
    use super::{
        Clock, DateTime, DocumentStore, Duration, NotificationTarget, Notifier, NotifyError,
        NotifyFuture, StoreError, StoreFuture, TemplateKind, Utc, Version, Versioned,
    };
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::set`] or
    /// [`FixedClock::advance`].
    ///
    /// # Example
    ///
    /// ```
    /// use campus_testing::mocks::FixedClock;
    /// use campus_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(Duration::hours(1));
    /// assert_eq!(clock.now() - time1, Duration::hours(1));
    /// ```
    #[derive(Debug)]
    pub struct FixedClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock() = time;
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock();
            *time += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// One notification captured by [`RecordingNotifier`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct SentNotification {
        /// Recipient
        pub target: NotificationTarget,
        /// Template
        pub kind: TemplateKind,
        /// Template variables
        pub payload: serde_json::Value,
    }

    /// Notifier that records every call and can be told to fail.
    ///
    /// Calls for failing targets are still recorded, then answered with
    /// [`NotifyError::Delivery`]. A configured delay is applied before answering.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<SentNotification>>,
        failing: Mutex<HashSet<NotificationTarget>>,
        fail_all: AtomicBool,
        delay: Mutex<Option<std::time::Duration>>,
    }

    impl RecordingNotifier {
        /// Create a notifier that accepts everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail every call addressed to `target`.
        pub fn fail_for(&self, target: NotificationTarget) {
            self.failing.lock().insert(target);
        }

        /// Fail every call.
        pub fn fail_always(&self) {
            self.fail_all.store(true, Ordering::SeqCst);
        }

        /// Sleep for `delay` before answering each call.
        pub fn with_delay(&self, delay: std::time::Duration) {
            *self.delay.lock() = Some(delay);
        }

        /// Snapshot of all recorded calls, oldest first.
        #[must_use]
        pub fn sent(&self) -> Vec<SentNotification> {
            self.sent.lock().clone()
        }

        /// Recorded calls with the given template.
        #[must_use]
        pub fn sent_of(&self, kind: TemplateKind) -> Vec<SentNotification> {
            self.sent
                .lock()
                .iter()
                .filter(|n| n.kind == kind)
                .cloned()
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(
            &self,
            target: NotificationTarget,
            kind: TemplateKind,
            payload: serde_json::Value,
        ) -> NotifyFuture<'_> {
            Box::pin(async move {
                let delay = *self.delay.lock();
                let fail = self.fail_all.load(Ordering::SeqCst) || self.failing.lock().contains(&target);

                self.sent.lock().push(SentNotification {
                    target: target.clone(),
                    kind,
                    payload,
                });

                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                if fail {
                    Err(NotifyError::Delivery(format!("{kind} to {target} rejected")))
                } else {
                    Ok(())
                }
            })
        }
    }

    /// Document store wrapper that injects failures.
    ///
    /// - [`FlakyStore::conflict_next`] makes the next `n` compare-and-swap calls
    ///   report a conflict without touching the inner store
    /// - [`FlakyStore::set_unavailable`] makes every call fail with
    ///   [`StoreError::Unavailable`]
    /// - [`FlakyStore::fail_after_next_commit`] lets one write through and
    ///   then takes the backend down
    #[derive(Debug)]
    pub struct FlakyStore<S> {
        inner: S,
        forced_conflicts: AtomicUsize,
        unavailable: AtomicBool,
        outage_after_commit: AtomicBool,
        cas_calls: AtomicUsize,
    }

    impl<S> FlakyStore<S> {
        /// Wrap `inner` with no faults enabled.
        #[must_use]
        pub const fn new(inner: S) -> Self {
            Self {
                inner,
                forced_conflicts: AtomicUsize::new(0),
                unavailable: AtomicBool::new(false),
                outage_after_commit: AtomicBool::new(false),
                cas_calls: AtomicUsize::new(0),
            }
        }

        /// Force conflicts on the next `n` compare-and-swap calls.
        pub fn conflict_next(&self, n: usize) {
            self.forced_conflicts.store(n, Ordering::SeqCst);
        }

        /// Toggle backend unavailability.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Become unavailable right after the next successful compare-and-swap.
        pub fn fail_after_next_commit(&self) {
            self.outage_after_commit.store(true, Ordering::SeqCst);
        }

        /// Number of compare-and-swap calls observed so far.
        #[must_use]
        pub fn cas_calls(&self) -> usize {
            self.cas_calls.load(Ordering::SeqCst)
        }

        /// The wrapped store.
        #[must_use]
        pub const fn inner(&self) -> &S {
            &self.inner
        }

        fn check_available(&self) -> Result<(), StoreError> {
            if self.unavailable.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("injected outage".to_string()))
            } else {
                Ok(())
            }
        }

        fn take_forced_conflict(&self) -> bool {
            self.forced_conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl<K, T, S> DocumentStore<K, T> for FlakyStore<S>
    where
        K: Send + 'static,
        T: Send + 'static,
        S: DocumentStore<K, T>,
    {
        fn get(&self, key: K) -> StoreFuture<'_, Versioned<T>> {
            if let Err(err) = self.check_available() {
                return Box::pin(async move { Err(err) });
            }
            self.inner.get(key)
        }

        fn insert(&self, key: K, document: T) -> StoreFuture<'_, Version> {
            if let Err(err) = self.check_available() {
                return Box::pin(async move { Err(err) });
            }
            self.inner.insert(key, document)
        }

        fn compare_and_swap(&self, key: K, expected: Version, document: T) -> StoreFuture<'_, Version> {
            self.cas_calls.fetch_add(1, Ordering::SeqCst);
            if let Err(err) = self.check_available() {
                return Box::pin(async move { Err(err) });
            }
            if self.take_forced_conflict() {
                return Box::pin(async move {
                    Err(StoreError::Conflict {
                        expected,
                        actual: expected.next(),
                    })
                });
            }
            let commit = self.inner.compare_and_swap(key, expected, document);
            Box::pin(async move {
                let result = commit.await;
                if result.is_ok() && self.outage_after_commit.swap(false, Ordering::SeqCst) {
                    self.unavailable.store(true, Ordering::SeqCst);
                }
                result
            })
        }

        fn list(&self) -> StoreFuture<'_, Vec<Versioned<T>>> {
            if let Err(err) = self.check_available() {
                return Box::pin(async move { Err(err) });
            }
            self.inner.list()
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a compact tracing subscriber for test output.
    ///
    /// Safe to call from many tests; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::init_test_tracing;
pub use mocks::{FixedClock, FlakyStore, RecordingNotifier, SentNotification, test_clock};
