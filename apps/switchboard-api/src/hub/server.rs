//! WebSocket upgrade handler: the admission boundary in front of the hub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time;

use crate::error::ApiError;
use crate::identity::{self, extract, Identity};
use crate::AppState;

use super::connection::{OutboundSink, TransportError};
use super::reader::InboundFrame;

/// Close code sent when the server drops a connection.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Upper bound on sending the close frame to a peer that may be gone.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// Resolve the session first; only an authenticated request is upgraded.
async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = extract::session_token(&headers, &state.config.session_cookie);
    let identity = match identity::admit(state.identity.as_ref(), token.as_deref()).await {
        Ok(identity) => identity,
        Err(denied) => {
            tracing::debug!(reason = %denied, "websocket admission denied");
            return ApiError::from(denied).into_response();
        }
    };

    if state.hub.is_shutting_down() {
        return ApiError::unavailable("Server is shutting down").into_response();
    }

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, identity))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Identity) {
    let (ws_tx, ws_rx) = socket.split();
    let sink = Arc::new(WebSocketSink::new(ws_tx));

    let handle = match state.hub.admit(identity, sink.clone()) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::debug!(%err, "connection refused by registry");
            sink.close().await;
            return;
        }
    };

    tracing::info!(
        connection_id = %handle.id(),
        email = %handle.connection().identity().email,
        connections = state.hub.connection_count(),
        "connection admitted"
    );

    let mut reader = state.hub.reader(&handle, ws_rx.map(inbound_frame));
    let exit = reader.run().await;

    tracing::info!(
        connection_id = %handle.id(),
        email = %handle.connection().identity().email,
        reason = %exit,
        connected_secs = (Utc::now() - handle.connection().registered_at()).num_seconds(),
        "connection ended"
    );
}

fn inbound_frame(msg: Result<Message, axum::Error>) -> Result<InboundFrame, TransportError> {
    match msg {
        Ok(Message::Text(text)) => Ok(InboundFrame::Text(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Ok(InboundFrame::Text(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Ok(InboundFrame::Control),
        Ok(Message::Close(_)) => Ok(InboundFrame::Close),
        Err(err) => Err(TransportError::Io(err.to_string())),
    }
}

/// Write half of an upgraded WebSocket.
pub struct WebSocketSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

impl WebSocketSink {
    pub fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

#[async_trait]
impl OutboundSink for WebSocketSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.tx
            .lock()
            .await
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&self) {
        let close = async {
            let mut tx = self.tx.lock().await;
            let frame = Message::Close(Some(CloseFrame {
                code: CLOSE_GOING_AWAY,
                reason: "connection closed".into(),
            }));
            // The peer may already be gone; either way we're done with it.
            let _ = tx.send(frame).await;
            let _ = tx.close().await;
        };
        if time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
            tracing::debug!("timed out closing websocket");
        }
    }
}
