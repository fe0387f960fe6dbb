//! WebSocket framing for the terminal protocol.
//!
//! Each frame is one JSON envelope in a text message. The socket halves
//! are wrapped as a transport sink/stream pair and handed to the bridge;
//! nothing protocol-specific lives here.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use server_core::{TransportError, TransportSink, TransportStream};
use sg_types::Envelope;
use tracing::debug;

use super::{AppState, Authenticated};

pub async fn terminal_ws(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<i64>,
    auth: Authenticated,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, target_id, auth.owner_id, socket))
}

async fn handle_socket(state: Arc<AppState>, target_id: i64, owner_id: i64, socket: WebSocket) {
    debug!(target_id, owner_id, "terminal socket opened");
    let (tx, rx) = socket.split();
    state
        .bridge
        .run_session(target_id, owner_id, WsSink { tx }, WsStream { rx })
        .await;
    debug!(target_id, owner_id, "terminal socket closed");
}

struct WsSink {
    tx: SplitSink<WebSocket, Message>,
}

struct WsStream {
    rx: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        self.tx
            .send(Message::Text(envelope.to_json().into()))
            .await
            .map_err(|err| TransportError::Failed(err.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.tx.send(Message::Close(None)).await;
        let _ = self.tx.close().await;
    }
}

#[async_trait]
impl TransportStream for WsStream {
    async fn next(&mut self) -> Result<Option<Envelope>, TransportError> {
        loop {
            match self.rx.next().await {
                None => return Ok(None),
                Some(Err(err)) => return Err(TransportError::Failed(err.to_string())),
                Some(Ok(Message::Text(text))) => {
                    return Envelope::from_json(&text)
                        .map(Some)
                        .map_err(|err| TransportError::Malformed(err.to_string()));
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                // axum answers pings itself; both directions are noise here.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Binary(_))) => {
                    return Err(TransportError::Malformed(
                        "binary frames are not part of the protocol".into(),
                    ));
                }
            }
        }
    }
}
