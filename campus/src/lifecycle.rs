//! Application lifecycle management and graceful shutdown.
//!
//! 1. **Startup**: Bind the listener, spawn the sweeps and the heartbeat
//! 2. **Runtime**: Serve HTTP and WebSocket traffic
//! 3. **Shutdown**: On Ctrl+C or SIGTERM
//!    - stop accepting connections
//!    - broadcast shutdown to background tasks
//!    - drain the presence registry, which closes every socket
//!    - wait for background tasks (bounded by the shutdown timeout)

use crate::api::websocket::spawn_heartbeat;
use crate::config::Config;
use crate::server::{AppState, build_router};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Running application with all background tasks.
pub struct Application {
    /// TCP listener for HTTP server
    listener: TcpListener,
    /// Shared handler state
    state: AppState,
    /// Application configuration
    config: Config,
    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,
}

impl Application {
    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound.
    pub async fn bind(config: Config, state: AppState) -> anyhow::Result<Self> {
        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&address).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener,
            state,
            config,
            shutdown_tx,
        })
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run_until<F>(self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(address = %self.local_addr()?, "Starting HTTP server");

        let handles = self.spawn_background();
        let router = build_router(self.state.clone());

        let shutdown_tx = self.shutdown_tx.clone();
        let registry = std::sync::Arc::clone(&self.state.registry);
        let graceful = async move {
            signal.await;
            info!("Shutdown requested, closing connections");
            let _ = shutdown_tx.send(());
            let drained = registry.drain();
            info!(connections = drained.len(), "Presence registry drained");
        };

        axum::serve(self.listener, router)
            .with_graceful_shutdown(graceful)
            .await?;

        info!("HTTP server stopped, waiting for background tasks");
        Self::await_shutdown(handles, self.config.shutdown_timeout()).await;
        info!("Graceful shutdown complete");
        Ok(())
    }

    fn spawn_background(&self) -> Vec<(&'static str, JoinHandle<()>)> {
        let realtime = &self.config.realtime;
        let mut handles = vec![(
            "heartbeat",
            spawn_heartbeat(
                std::sync::Arc::clone(&self.state.fanout),
                Duration::from_secs(realtime.heartbeat_interval.max(1)),
                Duration::from_secs(realtime.idle_timeout),
                Duration::from_secs(realtime.presence_retention),
                self.shutdown_tx.subscribe(),
            ),
        )];

        if self.state.jobs_enabled {
            let jobs = &self.config.jobs;
            handles.push((
                "promotion",
                self.state.promotion.clone().spawn(
                    Duration::from_secs(jobs.promotion_interval.max(1)),
                    self.shutdown_tx.subscribe(),
                ),
            ));
            handles.push((
                "reminders",
                self.state.reminders.clone().spawn(
                    Duration::from_secs(jobs.reminder_interval.max(1)),
                    self.shutdown_tx.subscribe(),
                ),
            ));
        } else {
            info!("Background sweeps disabled");
        }

        handles
    }

    /// Wait for all background tasks, each bounded by `timeout`.
    async fn await_shutdown(handles: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) {
        for (task, handle) in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task, error = %e, "Task failed"),
                Err(_) => warn!(task, "Task shutdown timed out"),
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(err) => {
                warn!(error = %err, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
