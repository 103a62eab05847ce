//! Client transport interface driven by the session manager.
//!
//! The relay only needs two frame kinds plus close. The axum WebSocket adapter
//! lives in `handlers::relay`; tests drive sessions through [`channel_transport`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::{RelayError, RelayResult};

/// A transport-level message, already stripped of ping/pong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Binary(Bytes),
    Text(String),
    Close,
}

/// Write half of a client connection.
#[async_trait]
pub trait TransportSender: Send {
    async fn send(&mut self, message: WireMessage) -> RelayResult<()>;

    /// Best-effort close.
    async fn close(&mut self);
}

/// Read half of a client connection.
#[async_trait]
pub trait TransportReceiver: Send {
    /// Next message; `None` once the peer is gone.
    async fn recv(&mut self) -> Option<RelayResult<WireMessage>>;
}

/// In-memory transport backed by channels.
pub struct ChannelSender {
    tx: mpsc::Sender<WireMessage>,
}

pub struct ChannelReceiver {
    rx: mpsc::Receiver<WireMessage>,
}

/// Build a connected transport pair.
///
/// Returns the session-side halves plus the peer's ends: messages sent to the
/// returned `Sender` arrive at the session, and everything the session sends
/// arrives on the returned `Receiver`.
pub fn channel_transport(
    capacity: usize,
) -> (
    ChannelSender,
    ChannelReceiver,
    mpsc::Sender<WireMessage>,
    mpsc::Receiver<WireMessage>,
) {
    let (to_client, from_session) = mpsc::channel(capacity);
    let (to_session, from_client) = mpsc::channel(capacity);
    (
        ChannelSender { tx: to_client },
        ChannelReceiver { rx: from_client },
        to_session,
        from_session,
    )
}

#[async_trait]
impl TransportSender for ChannelSender {
    async fn send(&mut self, message: WireMessage) -> RelayResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| RelayError::TransportClosed("peer dropped".to_string()))
    }

    async fn close(&mut self) {
        let _ = self.tx.send(WireMessage::Close).await;
    }
}

#[async_trait]
impl TransportReceiver for ChannelReceiver {
    async fn recv(&mut self) -> Option<RelayResult<WireMessage>> {
        self.rx.recv().await.map(Ok)
    }
}
