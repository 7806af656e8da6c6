//! Campus events HTTP and WebSocket server.
//!
//! RSVP capacity management with waitlist promotion and real-time updates.

use anyhow::Context;
use campus_core::environment::SystemClock;
use campus_events::{
    AppState, Application, Config, Event, EventId,
    notify::LogNotifier,
};
use campus_runtime::InMemoryDocumentStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campus_events=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Campus Events server");

    let config = Config::from_env();
    info!(
        host = %config.server.host,
        port = config.server.port,
        jobs_enabled = config.jobs.enabled,
        max_connections = config.realtime.max_connections,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        let address: SocketAddr = format!("{}:{}", config.metrics.host, config.metrics.port)
            .parse()
            .context("invalid metrics address")?;
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("failed to install Prometheus exporter")?;
        campus_events::metrics::register_metrics();
        info!(%address, "Prometheus exporter listening");
    }

    // In-process collaborators; swap for durable ones in a multi-node deployment.
    let store = Arc::new(InMemoryDocumentStore::<EventId, Event>::new());
    let notifier = Arc::new(LogNotifier);
    let clock = Arc::new(SystemClock);

    let state = AppState::new(&config, store, notifier, clock);
    let app = Application::bind(config, state).await?;
    app.run().await
}
