//! In-memory [`DocumentStore`] implementation.
//!
//! Documents live in a `HashMap` behind a tokio `RwLock`. Each write takes the
//! write lock, so the version check and the replacement happen atomically with
//! respect to every other writer.

use campus_core::store::{DocumentStore, StoreError, StoreFuture, Version, Versioned};
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;

/// Process-local versioned document store.
#[derive(Debug)]
pub struct InMemoryDocumentStore<K, T> {
    documents: RwLock<HashMap<K, Versioned<T>>>,
}

impl<K, T> Default for InMemoryDocumentStore<K, T> {
    fn default() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, T> InMemoryDocumentStore<K, T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

impl<K, T> DocumentStore<K, T> for InMemoryDocumentStore<K, T>
where
    K: Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn get(&self, key: K) -> StoreFuture<'_, Versioned<T>> {
        Box::pin(async move {
            self.documents
                .read()
                .await
                .get(&key)
                .cloned()
                .ok_or(StoreError::NotFound)
        })
    }

    fn insert(&self, key: K, document: T) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            let mut documents = self.documents.write().await;
            if documents.contains_key(&key) {
                return Err(StoreError::AlreadyExists);
            }
            documents.insert(
                key,
                Versioned {
                    version: Version::INITIAL,
                    document,
                },
            );
            Ok(Version::INITIAL)
        })
    }

    fn compare_and_swap(&self, key: K, expected: Version, document: T) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            let mut documents = self.documents.write().await;
            let current = documents.get_mut(&key).ok_or(StoreError::NotFound)?;

            if current.version != expected {
                return Err(StoreError::Conflict {
                    expected,
                    actual: current.version,
                });
            }

            current.version = current.version.next();
            current.document = document;
            Ok(current.version)
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Versioned<T>>> {
        Box::pin(async move { Ok(self.documents.read().await.values().cloned().collect()) })
    }
}
