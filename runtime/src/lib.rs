//! # Campus Runtime
//!
//! Imperative shell pieces shared by the campus events services.
//!
//! ## Components
//!
//! - **Retry**: bounded exponential backoff for optimistic-concurrency loops
//! - **Scheduler**: recurring background tasks that stop on the shutdown broadcast
//! - **Memory**: in-process implementation of the versioned document store
//!
//! ## Example
//!
//! ```ignore
//! use campus_runtime::{memory::InMemoryDocumentStore, retry::RetryPolicy};
//!
//! let store = Arc::new(InMemoryDocumentStore::<EventId, Event>::new());
//! let policy = RetryPolicy::builder().max_attempts(3).build();
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Recurring background tasks
pub mod scheduler;

/// In-memory document store
pub mod memory;

pub use memory::InMemoryDocumentStore;
pub use retry::{RetryError, RetryPolicy, retry_if};
pub use scheduler::RecurringTask;
