//! WebSocket endpoint for real-time updates.
//!
//! # Protocol
//!
//! ## Connection
//!
//! ```text
//! ws://localhost:8080/api/ws
//! X-User-Id: <verified id>
//! ```
//!
//! On connect the session joins the caller's private room (`user:<id>`) and
//! `global`. Further rooms are joined explicitly.
//!
//! ## Client → Server
//!
//! ```json
//! {"type": "join", "room": "event:550e8400-..."}
//! {"type": "leave", "room": "event:550e8400-..."}
//! {"type": "ping"}
//! ```
//!
//! ## Server → Client
//!
//! ```json
//! {
//!   "event": "rsvp_updated",
//!   "data": {"eventId": "550e8400-...", "confirmedCount": 3, "waitlistCount": 1, "availableSpots": 0},
//!   "timestamp": "2025-01-01T00:00:00Z"
//! }
//! ```
//!
//! ## Liveness
//!
//! Every inbound frame refreshes the session's last activity. The server
//! pings on the heartbeat interval, and a periodic sweep evicts sessions
//! that stayed silent past the idle timeout.

use crate::api::error::AppError;
use crate::api::identity::Caller;
use crate::fanout::{Envelope, FanOut, ServerMessage};
use crate::metrics;
use crate::presence::{ConnectionId, Outbox, PresenceRegistry, Room};
use crate::server::state::AppState;
use crate::types::Identity;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
};
use campus_runtime::RecurringTask;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// WebSocket message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a room
    Join {
        /// Room name
        room: Room,
    },
    /// Unsubscribe from a room
    Leave {
        /// Room name
        room: Room,
    },
    /// Application-level keep-alive
    Ping,
}

// ============================================================================
// Handler
// ============================================================================

/// Upgrade to a WebSocket session.
///
/// Returns 503 Service Unavailable once the connection cap is reached.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn connect(Caller(identity): Caller, ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(slot) = state.try_acquire_connection() else {
        warn!(
            current_connections = state.active_connections(),
            "WebSocket connection limit exceeded"
        );
        return AppError::unavailable("Too many concurrent connections. Please try again later.").into_response();
    };

    debug!(user_id = %identity.user_id, "WebSocket connection requested");
    ws.on_upgrade(move |socket| async move {
        let _slot = slot;
        handle_socket(socket, identity, state).await;
    })
}

// ============================================================================
// Session
// ============================================================================

/// Inbound dispatcher for one connection
struct Session {
    connection_id: ConnectionId,
    identity: Identity,
    registry: Arc<PresenceRegistry>,
    fanout: Arc<FanOut>,
    /// Weak, so eviction (dropping the registry's sender) closes the writer
    reply: mpsc::WeakSender<Arc<Envelope>>,
}

impl Session {
    /// Process one text frame and reply to this connection only.
    fn on_text(&self, text: &str) {
        let reply = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.dispatch(message),
            Err(err) => ServerMessage::Error {
                message: format!("invalid message: {err}"),
            },
        };
        self.send(reply);
    }

    fn dispatch(&self, message: ClientMessage) -> ServerMessage {
        match message {
            ClientMessage::Join { room } => match self.registry.join(self.connection_id, room.clone()) {
                Ok(_) => {
                    debug!(connection_id = %self.connection_id, room = %room, "Joined room");
                    ServerMessage::Joined { room }
                },
                Err(err) => ServerMessage::Error {
                    message: err.to_string(),
                },
            },
            ClientMessage::Leave { room } => match self.registry.leave(self.connection_id, &room) {
                Ok(_) => ServerMessage::Left { room },
                Err(err) => ServerMessage::Error {
                    message: err.to_string(),
                },
            },
            ClientMessage::Ping => ServerMessage::Pong,
        }
    }

    fn send(&self, message: ServerMessage) {
        let Some(outbox) = self.reply.upgrade() else {
            return;
        };
        if outbox.try_send(self.fanout.envelope(message)).is_err() {
            debug!(connection_id = %self.connection_id, user_id = %self.identity.user_id, "Reply dropped");
        }
    }
}

async fn handle_socket(socket: WebSocket, identity: Identity, state: AppState) {
    let (outbox, outbox_rx): (Outbox, _) = mpsc::channel(state.limits.outbox_capacity);
    let reply = outbox.downgrade();
    let connection_id = state.registry.register(identity.user_id.clone(), outbox);
    for room in [Room::User(identity.user_id.clone()), Room::Global] {
        // Own private room and global never fail.
        let _ = state.registry.join(connection_id, room);
    }
    metrics::record_ws_connected();
    info!(
        connection_id = %connection_id,
        user_id = %identity.user_id,
        total_connections = state.active_connections(),
        "WebSocket connection established"
    );

    let (sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(write_loop(sender, outbox_rx, state.limits.ping_interval));

    let user_id = identity.user_id.clone();
    let session = Session {
        connection_id,
        identity,
        registry: Arc::clone(&state.registry),
        fanout: Arc::clone(&state.fanout),
        reply,
    };
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            session.registry.touch(session.connection_id);
            match frame {
                Message::Text(text) => session.on_text(&text),
                Message::Close(_) => break,
                _ => {},
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if let Some(departure) = state.registry.on_disconnect(connection_id) {
        state.fanout.announce_departure(&departure);
    }
    metrics::record_ws_disconnected();
    info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket connection closed"
    );
}

/// Drain the outbox into the socket and ping on an interval.
///
/// Ends when the outbox is closed (session evicted or drained) or the client
/// goes away.
async fn write_loop<S>(mut sender: S, mut outbox: mpsc::Receiver<Arc<Envelope>>, ping_every: Duration)
where
    S: futures::Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval(ping_every);
    ping.tick().await;

    loop {
        tokio::select! {
            envelope = outbox.recv() => {
                let Some(envelope) = envelope else { break };
                let text = match serde_json::to_string(&*envelope) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, event = envelope.message.name(), "Could not serialize message");
                        continue;
                    },
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ============================================================================
// Heartbeat sweep
// ============================================================================

/// Periodically evict sessions idle longer than `idle_timeout`.
///
/// Evicted sessions go through the same cleanup as a disconnect, and their
/// departure is announced to the rooms they were in. Last-seen times of
/// users offline for longer than `retention` are dropped.
#[must_use]
pub fn spawn_heartbeat(
    fanout: Arc<FanOut>,
    every: Duration,
    idle_timeout: Duration,
    retention: Duration,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let idle = chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::MAX);
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    RecurringTask::new("heartbeat", every, shutdown, move || {
        let fanout = Arc::clone(&fanout);
        async move {
            let evicted = fanout.registry().evict_stale(idle);
            for departure in &evicted {
                info!(
                    connection_id = %departure.connection_id,
                    user_id = %departure.user_id,
                    "Evicted idle WebSocket session"
                );
                fanout.announce_departure(departure);
            }
            let forgotten = fanout.registry().forget_offline(retention);
            if forgotten > 0 {
                debug!(forgotten, "Pruned last-seen entries");
            }
        }
    })
    .spawn()
}
