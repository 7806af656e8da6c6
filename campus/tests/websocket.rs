//! WebSocket integration tests.
//!
//! Boots the real server on an ephemeral port and talks to it with a
//! tungstenite client.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use campus_events::api::identity::USER_ID_HEADER;
use campus_events::{Application, UserId, build_router};
use common::{TestApp, config, published_event, test_app};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    app: TestApp,
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start(pairs: &[(&str, &str)]) -> Server {
    let mut vars = vec![("HOST", "127.0.0.1"), ("PORT", "0"), ("JOBS_ENABLED", "false")];
    vars.extend_from_slice(pairs);
    let config = config(&vars);
    let app = test_app(&config);

    let application = Application::bind(config, app.state.clone()).await.unwrap();
    let addr = application.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel();
    let handle = tokio::spawn(application.run_until(async move {
        let _ = stopped.await;
    }));

    Server { app, addr, stop, handle }
}

/// Connect and wait until the server-side session is registered
async fn connect(addr: SocketAddr, user: &str) -> Socket {
    let mut request = format!("ws://{addr}/api/ws").into_client_request().unwrap();
    request.headers_mut().insert("X-User-Id", user.parse().unwrap());
    let (mut socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    send(&mut socket, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut socket).await.unwrap()["event"], "pong");
    socket
}

/// Next text frame as JSON, skipping control frames
async fn next_json(socket: &mut Socket) -> Option<Value> {
    loop {
        match tokio::time::timeout(Duration::from_millis(500), socket.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(serde_json::from_str(&text).unwrap()),
            Ok(Some(Ok(Message::Close(_)) | Err(_)) | None) | Err(_) => return None,
            Ok(Some(Ok(_))) => {},
        }
    }
}

async fn send(socket: &mut Socket, message: Value) {
    socket.send(Message::Text(message.to_string())).await.unwrap();
}

/// Wait until the server has cleaned up every session of `user`
async fn wait_until_offline(app: &TestApp, user: &str) {
    let user = UserId::new(user);
    for _ in 0..100 {
        if !app.state.registry.is_online(&user) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{user} is still online");
}

#[tokio::test]
async fn room_members_receive_counts_and_others_do_not() {
    let server = start(&[]).await;
    let event_id = published_event(&server.app, 1).await;
    let service = &server.app.state.service;

    let mut watcher = connect(server.addr, "alice").await;
    let mut bystander = connect(server.addr, "carol").await;

    send(&mut watcher, json!({"type": "join", "room": format!("event:{event_id}")})).await;
    let joined = next_json(&mut watcher).await.unwrap();
    assert_eq!(joined["event"], "joined");

    service.add_registration(event_id, &UserId::new("alice")).await.unwrap();

    let updated = next_json(&mut watcher).await.unwrap();
    assert_eq!(updated["event"], "rsvp_updated");
    assert_eq!(updated["data"]["eventId"], event_id.to_string());
    assert_eq!(updated["data"]["confirmedCount"], 1);
    assert_eq!(updated["data"]["availableSpots"], 0);
    assert!(updated["timestamp"].is_string());

    service.add_registration(event_id, &UserId::new("bob")).await.unwrap();
    let updated = next_json(&mut watcher).await.unwrap();
    assert_eq!(updated["data"]["waitlistCount"], 1);

    assert!(next_json(&mut bystander).await.is_none());

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn promoted_user_is_told_in_their_private_room() {
    let server = start(&[]).await;
    let event_id = published_event(&server.app, 1).await;
    let service = &server.app.state.service;

    service.add_registration(event_id, &UserId::new("alice")).await.unwrap();
    service.add_registration(event_id, &UserId::new("bob")).await.unwrap();

    let mut promoted = connect(server.addr, "bob").await;
    let mut bystander = connect(server.addr, "carol").await;

    service.cancel_registration(event_id, &UserId::new("alice")).await.unwrap();

    let notification = next_json(&mut promoted).await.unwrap();
    assert_eq!(notification["event"], "notification");
    assert_eq!(notification["data"]["type"], "rsvp_promoted");
    assert_eq!(notification["data"]["read"], false);

    assert!(next_json(&mut bystander).await.is_none());

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn bad_requests_get_errors_and_shutdown_closes() {
    let server = start(&[]).await;
    let mut socket = connect(server.addr, "dave").await;

    send(&mut socket, json!({"type": "join", "room": "user:someone-else"})).await;
    assert_eq!(next_json(&mut socket).await.unwrap()["event"], "error");

    send(&mut socket, json!({"type": "dance"})).await;
    assert_eq!(next_json(&mut socket).await.unwrap()["event"], "error");

    assert_eq!(server.app.state.registry.connection_count(), 1);
    assert!(server.app.state.registry.is_online(&UserId::new("dave")));

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();

    // Draining closes the socket from the server side.
    assert!(next_json(&mut socket).await.is_none());
}

#[tokio::test]
async fn connection_cap_rejects_extra_sessions() {
    let server = start(&[("WS_MAX_CONNECTIONS", "1")]).await;
    let _first = connect(server.addr, "erin").await;

    let mut request = format!("ws://{}/api/ws", server.addr).into_client_request().unwrap();
    request.headers_mut().insert("X-User-Id", "frank".parse().unwrap());
    assert!(tokio_tungstenite::connect_async(request).await.is_err());

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn upgrade_requires_identity() {
    let server = start(&[]).await;

    let request = format!("ws://{}/api/ws", server.addr).into_client_request().unwrap();
    assert!(tokio_tungstenite::connect_async(request).await.is_err());

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnecting_client_gets_no_replay_and_pulls_state() {
    let server = start(&[]).await;
    let event_id = published_event(&server.app, 2).await;
    let join = json!({"type": "join", "room": format!("event:{event_id}")});

    let mut watcher = connect(server.addr, "alice").await;
    send(&mut watcher, join.clone()).await;
    assert_eq!(next_json(&mut watcher).await.unwrap()["event"], "joined");
    watcher.close(None).await.unwrap();
    drop(watcher);
    wait_until_offline(&server.app, "alice").await;

    // Published while alice is away.
    server
        .app
        .state
        .service
        .add_registration(event_id, &UserId::new("bob"))
        .await
        .unwrap();

    let mut watcher = connect(server.addr, "alice").await;
    send(&mut watcher, join).await;
    assert_eq!(next_json(&mut watcher).await.unwrap()["event"], "joined");
    assert!(next_json(&mut watcher).await.is_none());

    let request = Request::builder()
        .uri(format!("/api/events/{event_id}/rsvp"))
        .header(USER_ID_HEADER, "alice")
        .body(Body::empty())
        .unwrap();
    let response = build_router(server.app.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["confirmedCount"], 1);
    assert_eq!(body["availableSpots"], 1);
    assert!(body["registration"].is_null());

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}
