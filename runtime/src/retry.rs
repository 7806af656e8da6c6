//! Bounded retry with exponential backoff and jitter.
//!
//! Used for optimistic-concurrency loops: an attempt that loses a
//! compare-and-swap race is retried after a short randomized pause, up to a
//! fixed number of attempts. Errors the predicate rejects fail immediately.
//!
//! # Example
//!
//! ```rust
//! use campus_runtime::retry::{RetryPolicy, retry_if};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(5))
//!     .max_delay(Duration::from_millis(100))
//!     .build();
//!
//! let value = retry_if(
//!     &policy,
//!     |_attempt| async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("conflict"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3 (first try included)
/// - `initial_delay`: 10ms
/// - `max_delay`: 1 second
/// - `multiplier`: 2.0
/// - `jitter`: enabled
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, first try included. Zero is treated as one.
    pub max_attempts: usize,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Cap for exponential backoff
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub multiplier: f64,
    /// Randomize each delay within `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: None,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::builder().max_attempts(1).build()
    }

    /// Backoff before the attempt following `attempt` (1-based), without jitter.
    ///
    /// `delay = initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        let spread = rand::thread_rng().gen_range(0..=half.as_micros().min(u128::from(u64::MAX)));
        #[allow(clippy::cast_possible_truncation)]
        let extra = Duration::from_micros(spread as u64);
        half + extra
    }

    const fn attempts(&self) -> usize {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Set total number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set delay before the second attempt.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(10)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(1)),
            multiplier: self.multiplier.unwrap_or(2.0),
            jitter: self.jitter.unwrap_or(true),
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted {
        /// Number of attempts made
        attempts: usize,
        /// Error from the final attempt
        last: E,
    },
    /// An attempt failed with an error the predicate rejected.
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The underlying error, whichever way the retry ended.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Permanent(last) => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            },
            Self::Permanent(err) => write!(f, "{err}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// The operation receives the 1-based attempt number.
///
/// # Errors
///
/// - [`RetryError::Permanent`] on the first non-retryable error
/// - [`RetryError::Exhausted`] when every attempt failed with a retryable error
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(RetryError::Permanent(err));
                }

                if attempt >= max_attempts {
                    tracing::warn!(attempt, error = %err, "Operation failed after max attempts");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }

                let delay = policy.jittered(policy.delay_for_attempt(attempt));
                tracing::debug!(
                    attempt,
                    delay_us = delay.as_micros(),
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            },
        }
    }
}
