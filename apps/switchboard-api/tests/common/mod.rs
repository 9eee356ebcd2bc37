#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, http::HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use switchboard_api::config::Config;
use switchboard_api::hub::{Hub, HubSettings};
use switchboard_api::identity::memory::MemoryIdentityStore;
use switchboard_api::identity::{Identity, IdentityResolver};
use switchboard_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_config() -> Config {
    Config {
        port: 0,
        broadcast_capacity: 64,
        write_timeout: Duration::from_millis(500),
        ..Config::default()
    }
}

/// Build an [`AppState`] with an in-memory identity store and a fresh hub.
///
/// Must run inside a tokio runtime (the hub spawns its dispatcher).
pub fn test_state() -> AppState {
    let config = test_config();
    let hub = Hub::start(HubSettings::from(&config));
    let identity: Arc<dyn IdentityResolver> = Arc::new(MemoryIdentityStore::new());
    AppState {
        identity,
        hub,
        config: Arc::new(config),
    }
}

/// Build the full application router wired to a test state.
pub fn test_app() -> (Router, AppState) {
    let state = test_state();
    let app = switchboard_api::routes::router().with_state(state.clone());
    (app, state)
}

/// Register `<name>@x` and open a session for it.
pub async fn create_session(state: &AppState, name: &str) -> (Identity, String) {
    let identity = state
        .identity
        .register_identity(&format!("{name}@x"), name, "password-123")
        .await
        .expect("register test identity");
    let token = state
        .identity
        .create_session(&identity)
        .await
        .expect("create test session");
    (identity, token)
}

/// Start a real TCP server for WebSocket testing.
pub async fn start_ws_server() -> (SocketAddr, AppState) {
    let (app, state) = test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Open a WebSocket to `/ws`, presenting `token` as the session cookie.
pub async fn connect(addr: SocketAddr, token: Option<&str>) -> Result<WsClient, tungstenite::Error> {
    let mut request = format!("ws://{addr}/ws").into_client_request()?;
    if let Some(token) = token {
        request.headers_mut().insert(
            "cookie",
            HeaderValue::from_str(&format!("session={token}")).unwrap(),
        );
    }
    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

/// Connect and wait until the hub has registered the connection.
pub async fn connect_registered(addr: SocketAddr, state: &AppState, token: &str) -> WsClient {
    let before = state.hub.connection_count();
    let ws = connect(addr, Some(token)).await.expect("ws connect");
    wait_for_connections(state, before + 1).await;
    ws
}

pub async fn wait_for_connections(state: &AppState, expected: usize) {
    let deadline = time::Instant::now() + Duration::from_secs(5);
    while state.hub.connection_count() != expected {
        assert!(
            time::Instant::now() < deadline,
            "expected {expected} connections, have {}",
            state.hub.connection_count()
        );
        time::sleep(Duration::from_millis(10)).await;
    }
}

/// Read the next text frame as JSON, skipping control frames.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse frame");
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

/// Assert nothing but control frames arrive within `wait`.
pub async fn assert_silent(ws: &mut WsClient, wait: Duration) {
    let deadline = time::Instant::now() + wait;
    loop {
        match time::timeout_at(deadline, ws.next()).await {
            Err(_elapsed) => return,
            Ok(Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got: {other:?}"),
        }
    }
}
