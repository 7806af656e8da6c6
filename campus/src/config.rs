//! Configuration management for the campus events service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Values that are missing or fail to parse fall back to the default.

use campus_runtime::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// WebSocket and presence configuration
    pub realtime: RealtimeConfig,
    /// Background job configuration
    pub jobs: JobsConfig,
    /// RSVP update configuration
    pub rsvp: RsvpConfig,
    /// Notification dispatch configuration
    pub notifications: NotificationConfig,
    /// Prometheus exporter configuration
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Real-time layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Maximum concurrent WebSocket connections
    pub max_connections: usize,
    /// Per-connection outbox capacity (messages)
    pub outbox_capacity: usize,
    /// Seconds between heartbeat sweeps
    pub heartbeat_interval: u64,
    /// Seconds of silence after which a connection is evicted
    pub idle_timeout: u64,
    /// Seconds an offline user's last-seen time is kept
    pub presence_retention: u64,
}

/// Background job configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Whether the sweeps run on a schedule
    pub enabled: bool,
    /// Seconds between promotion sweeps
    pub promotion_interval: u64,
    /// Seconds between reminder sweeps
    pub reminder_interval: u64,
}

/// RSVP update configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvpConfig {
    /// Retries after the first attempt before surfacing a conflict
    pub max_retries: usize,
    /// Initial backoff between attempts in milliseconds
    pub retry_delay_ms: u64,
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

/// Metrics exporter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed
    pub enabled: bool,
    /// Metrics server host (for Prometheus scraping)
    pub host: String,
    /// Metrics server port
    pub port: u16,
}

impl Config {
    /// Load configuration from `.env` (if present) and environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        // A missing .env file is fine; real environment variables still apply.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).and_then(|value| value.trim().parse::<Flag>().ok());
        let num = |key: &str, default: u64| parse_or(&lookup, key, default);

        Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "PORT", 8080),
                shutdown_timeout: num("SHUTDOWN_TIMEOUT", 30),
            },
            realtime: RealtimeConfig {
                max_connections: parse_or(&lookup, "WS_MAX_CONNECTIONS", 1000),
                outbox_capacity: parse_or(&lookup, "WS_OUTBOX_CAPACITY", 256),
                heartbeat_interval: num("WS_HEARTBEAT_INTERVAL", 30),
                idle_timeout: num("WS_IDLE_TIMEOUT", 90),
                presence_retention: num("WS_PRESENCE_RETENTION", 86_400),
            },
            jobs: JobsConfig {
                enabled: flag("JOBS_ENABLED").is_none_or(|flag| flag.0),
                promotion_interval: num("PROMOTION_INTERVAL", 3600),
                reminder_interval: num("REMINDER_INTERVAL", 86_400),
            },
            rsvp: RsvpConfig {
                max_retries: parse_or(&lookup, "RSVP_MAX_RETRIES", 3),
                retry_delay_ms: num("RSVP_RETRY_DELAY_MS", 10),
            },
            notifications: NotificationConfig {
                timeout_ms: num("NOTIFY_TIMEOUT_MS", 5000),
            },
            metrics: MetricsConfig {
                enabled: flag("METRICS_ENABLED").is_some_and(|flag| flag.0),
                host: lookup("METRICS_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "METRICS_PORT", 9090),
            },
        }
    }

    /// Retry policy for optimistic event updates.
    ///
    /// One initial attempt plus `max_retries` retries.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.rsvp.max_retries.saturating_add(1))
            .initial_delay(Duration::from_millis(self.rsvp.retry_delay_ms))
            .build()
    }

    /// Graceful shutdown timeout
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }

    /// Notification timeout
    #[must_use]
    pub const fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notifications.timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean that also accepts `1`/`0`, `yes`/`no` and `on`/`off`
struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Self(true)),
            "false" | "0" | "no" | "off" => Ok(Self(false)),
            _ => Err(()),
        }
    }
}
