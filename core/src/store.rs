//! Versioned document store with optimistic concurrency control.
//!
//! Every document carries a monotonically increasing [`Version`]. Writers read a
//! document, compute the replacement from that snapshot, and submit it together
//! with the version they read. The store applies the write only when the version
//! still matches; otherwise it reports a [`StoreError::Conflict`] and the caller
//! re-reads and tries again.
//!
//! # Example
//!
//! ```ignore
//! use campus_core::store::{DocumentStore, StoreError};
//!
//! async fn rename<S>(store: &S, id: u32) -> Result<(), StoreError>
//! where
//!     S: DocumentStore<u32, String>,
//! {
//!     let current = store.get(id).await?;
//!     let renamed = format!("{} (renamed)", current.document);
//!     store.compare_and_swap(id, current.version, renamed).await?;
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Version of a stored document.
///
/// Versions start at [`Version::INITIAL`] when a document is inserted and
/// increment by one on every successful write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly inserted document.
    pub const INITIAL: Self = Self(1);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document together with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Version at read time
    pub version: Version,
    /// The stored document
    pub document: T,
}

/// Errors that can occur during document store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the document changed since it was read.
    #[error("Concurrency conflict: expected version {expected}, found {actual}")]
    Conflict {
        /// The version the writer read.
        expected: Version,
        /// The version currently stored.
        actual: Version,
    },

    /// No document is stored under the key.
    #[error("Document not found")]
    NotFound,

    /// A document is already stored under the key.
    #[error("Document already exists")]
    AlreadyExists,

    /// The backing store could not be reached or failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the error is an optimistic concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Future returned by [`DocumentStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Keyed document persistence with compare-and-swap writes.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so that
/// services can hold an `Arc<dyn DocumentStore<K, T>>`.
pub trait DocumentStore<K, T>: Send + Sync {
    /// Read the current document and its version.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no document under `key`
    /// - `Unavailable`: backend failure
    fn get(&self, key: K) -> StoreFuture<'_, Versioned<T>>;

    /// Store a new document at [`Version::INITIAL`].
    ///
    /// # Errors
    ///
    /// - `AlreadyExists`: a document is already stored under `key`
    /// - `Unavailable`: backend failure
    fn insert(&self, key: K, document: T) -> StoreFuture<'_, Version>;

    /// Replace the document if it is still at `expected`.
    ///
    /// Returns the new version on success.
    ///
    /// # Errors
    ///
    /// - `Conflict`: the stored version differs from `expected`
    /// - `NotFound`: no document under `key`
    /// - `Unavailable`: backend failure
    fn compare_and_swap(&self, key: K, expected: Version, document: T) -> StoreFuture<'_, Version>;

    /// Snapshot every stored document.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn list(&self) -> StoreFuture<'_, Vec<Versioned<T>>>;
}
