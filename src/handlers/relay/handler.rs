//! Relay WebSocket handler
//!
//! Upgrades the connection and hands both halves of the socket to the session
//! manager. The socket is wrapped in the session transport traits so the
//! manager never sees axum types.

use async_trait::async_trait;
use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::session::{TransportReceiver, TransportSender, WireMessage};
use crate::errors::{RelayError, RelayResult};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Query parameters accepted on upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct RelayParams {
    /// Resumable identifier issued by a previous session
    pub session_id: Option<String>,
}

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection to a relay session. A `session_id` query
/// parameter asks the upstream to resume that session.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<RelayParams>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let resume = params.session_id.filter(|id| !id.trim().is_empty());
    let client_ip = client_ip.map(|Extension(ip)| ip);
    info!(
        ip = ?client_ip.as_ref().map(|ip| ip.0),
        resume = resume.is_some(),
        "Relay WebSocket connection upgrade requested"
    );

    // Held until the session ends, or dropped with the callback if the upgrade fails
    let slot = client_ip.map(|ClientIp(ip)| ConnectionSlot {
        state: state.clone(),
        ip,
    });

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state, resume, slot))
}

async fn handle_relay_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    resume: Option<String>,
    _slot: Option<ConnectionSlot>,
) {
    let (sink, stream) = socket.split();
    let summary = state
        .sessions
        .run_session(
            Box::new(WsSender { sink }),
            Box::new(WsReceiver { stream }),
            resume,
        )
        .await;

    debug!(
        connection_id = %summary.connection_id,
        close_reason = summary.close_reason,
        "Relay WebSocket connection closed"
    );
}

/// Releases the connection-limit slot when the session ends.
struct ConnectionSlot {
    state: Arc<AppState>,
    ip: std::net::IpAddr,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

struct WsSender {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl TransportSender for WsSender {
    async fn send(&mut self, message: WireMessage) -> RelayResult<()> {
        let message = match message {
            WireMessage::Binary(data) => Message::Binary(data),
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Close => Message::Close(None),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| RelayError::TransportClosed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

struct WsReceiver {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportReceiver for WsReceiver {
    async fn recv(&mut self) -> Option<RelayResult<WireMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(RelayError::TransportClosed(e.to_string()))),
            };
            return Some(Ok(match message {
                Message::Binary(data) => WireMessage::Binary(data),
                Message::Text(text) => WireMessage::Text(text.as_str().to_owned()),
                Message::Close(_) => WireMessage::Close,
                // axum answers pings itself
                Message::Ping(_) | Message::Pong(_) => continue,
            }));
        }
    }
}
