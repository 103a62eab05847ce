//! Gemini Live API client implementation.
//!
//! # API Reference
//!
//! - Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<key>`
//! - Protocol: WebSocket with JSON messages (text or binary frames)
//! - Audio in: PCM 16-bit, 16kHz, mono, little-endian, base64 encoded
//! - Audio out: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! Each [`GeminiLiveConnector::open_session`] call performs its own connect and
//! setup handshake and spawns two tasks that own the socket halves. Both tasks
//! stop when the handle is closed or dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::config::GeminiLiveConfig;
use super::messages::{ClientMessage, ServerMessage};
use crate::core::audio::AudioFrame;
use crate::core::upstream::{
    OpenSessionRequest, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamHandle,
    UpstreamResult, UpstreamSession,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channel capacity for messages queued toward the socket.
const OUTGOING_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for events queued toward the relay session.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Bound on sending the close frame during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Connector
// =============================================================================

/// Opens Gemini Live sessions. Holds configuration only.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    config: Arc<GeminiLiveConfig>,
}

impl GeminiLiveConnector {
    pub fn new(config: GeminiLiveConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GeminiLiveConfig {
        &self.config
    }

    fn build_ws_url(&self) -> UpstreamResult<url::Url> {
        let mut url = url::Url::parse(&self.config.endpoint)
            .map_err(|e| UpstreamError::ConnectionFailed(format!("Invalid endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("key", &self.config.api_key);
        Ok(url)
    }

    /// Connect, send `setup` and wait for `setupComplete`.
    async fn handshake(&self, resume_handle: Option<String>) -> UpstreamResult<WsStream> {
        let resuming = resume_handle.is_some();
        let url = self.build_ws_url()?;

        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| UpstreamError::ConnectionFailed(e.to_string()))?;

        let setup = serde_json::to_string(&ClientMessage::setup(&self.config, resume_handle))
            .map_err(|e| UpstreamError::Serialization(e.to_string()))?;
        ws.send(Message::Text(setup.into()))
            .await
            .map_err(|e| UpstreamError::SendFailed(e.to_string()))?;

        let refused = |reason: String| {
            if resuming {
                UpstreamError::ResumeRejected(reason)
            } else {
                UpstreamError::ConnectionFailed(reason)
            }
        };

        loop {
            let parsed = match ws.next().await {
                Some(Ok(Message::Text(text))) => serde_json::from_str::<ServerMessage>(&text),
                Some(Ok(Message::Binary(data))) => serde_json::from_slice::<ServerMessage>(&data),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed during setup ({}): {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed during setup".to_string());
                    return Err(refused(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(refused(e.to_string())),
                None => return Err(refused("stream ended during setup".to_string())),
            };

            match parsed {
                Ok(message) if message.is_setup_complete() => return Ok(ws),
                Ok(_) => {
                    tracing::debug!("Ignoring Gemini message received before setupComplete");
                }
                Err(e) => {
                    tracing::warn!("Failed to parse Gemini setup response: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl UpstreamConnector for GeminiLiveConnector {
    async fn open_session(&self, request: OpenSessionRequest) -> UpstreamResult<UpstreamSession> {
        let timeout = self.config.connect_timeout;
        let ws = tokio::time::timeout(timeout, self.handshake(request.resume_handle))
            .await
            .map_err(|_| {
                UpstreamError::Timeout(format!("Gemini setup not completed within {timeout:?}"))
            })??;

        tracing::info!(model = %self.config.model, "Connected to Gemini Live API");

        let (sink, stream) = ws.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(
            sink,
            outgoing_rx,
            pending.clone(),
            cancel.clone(),
        ));
        tokio::spawn(read_loop(stream, events_tx, cancel.clone()));

        Ok(UpstreamSession {
            handle: Box::new(GeminiLiveHandle {
                outgoing: outgoing_tx,
                pending,
                cancel,
            }),
            events: events_rx,
        })
    }

    fn name(&self) -> &'static str {
        "gemini-live"
    }
}

// =============================================================================
// Connection tasks
// =============================================================================

/// A serialized client message plus the audio bytes it carries.
#[derive(Debug)]
struct Outgoing {
    json: String,
    audio_bytes: usize,
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::Receiver<Outgoing>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let pump = async {
        while let Some(out) = outgoing.recv().await {
            let result = sink.send(Message::Text(out.json.into())).await;
            pending.fetch_sub(out.audio_bytes, Ordering::AcqRel);
            if let Err(e) = result {
                tracing::error!("Failed to send Gemini message: {}", e);
                return;
            }
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = pump => {}
    }
    cancel.cancel();

    if let Ok(Err(e)) = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        tracing::debug!("Gemini close frame not delivered: {}", e);
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
) {
    let pump = async {
        while let Some(msg) = stream.next().await {
            let parsed = match msg {
                Ok(Message::Text(text)) => serde_json::from_str::<ServerMessage>(&text),
                Ok(Message::Binary(data)) => serde_json::from_slice::<ServerMessage>(&data),
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Gemini connection closed by server");
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!("Gemini WebSocket error: {}", e);
                    let _ = events.send(UpstreamEvent::Error(e.to_string())).await;
                    return;
                }
            };

            let message = match parsed {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Failed to parse Gemini server message: {}", e);
                    continue;
                }
            };

            for event in message.into_events() {
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = pump => {}
    }
    cancel.cancel();
}

// =============================================================================
// Handle
// =============================================================================

/// Command side of one Gemini Live session.
#[derive(Debug)]
pub struct GeminiLiveHandle {
    outgoing: mpsc::Sender<Outgoing>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl GeminiLiveHandle {
    /// Queue a message for the writer task without waiting.
    ///
    /// A stalled socket surfaces as [`UpstreamError::QueueFull`] instead of
    /// blocking the caller.
    fn enqueue(&self, message: ClientMessage, audio_bytes: usize) -> UpstreamResult<()> {
        if self.cancel.is_cancelled() {
            return Err(UpstreamError::Closed);
        }

        let json = serde_json::to_string(&message)
            .map_err(|e| UpstreamError::Serialization(e.to_string()))?;

        self.pending.fetch_add(audio_bytes, Ordering::AcqRel);
        if let Err(e) = self.outgoing.try_send(Outgoing { json, audio_bytes }) {
            self.pending.fetch_sub(audio_bytes, Ordering::AcqRel);
            return Err(match e {
                TrySendError::Full(_) => UpstreamError::QueueFull,
                TrySendError::Closed(_) => {
                    UpstreamError::SendFailed("writer task stopped".to_string())
                }
            });
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamHandle for GeminiLiveHandle {
    async fn send_audio(&mut self, frame: AudioFrame) -> UpstreamResult<()> {
        let len = frame.len();
        self.enqueue(ClientMessage::audio(frame.data()), len)
    }

    async fn send_text(&mut self, text: &str) -> UpstreamResult<()> {
        self.enqueue(ClientMessage::user_text(text), 0)
    }

    async fn end_user_turn(&mut self) -> UpstreamResult<()> {
        self.enqueue(ClientMessage::audio_stream_end(), 0)
    }

    async fn cancel_response(&mut self) -> UpstreamResult<()> {
        if self.cancel.is_cancelled() {
            return Err(UpstreamError::Closed);
        }
        // Gemini stops generating on its own once it hears the new user audio.
        tracing::debug!("Gemini has no explicit cancel; relying on server-side barge-in");
        Ok(())
    }

    fn pending_audio_bytes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    async fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for GeminiLiveHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn test_handle() -> (GeminiLiveHandle, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = GeminiLiveHandle {
            outgoing: tx,
            pending: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
        };
        (handle, rx)
    }

    #[test]
    fn test_build_ws_url() {
        let mut config = GeminiLiveConfig::new("test key");
        config.endpoint = "wss://example.com/live".to_string();
        let connector = GeminiLiveConnector::new(config);

        let url = connector.build_ws_url().unwrap();
        assert_eq!(url.as_str(), "wss://example.com/live?key=test+key");
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = GeminiLiveConfig::new("key");
        config.endpoint = "not a url".to_string();
        let connector = GeminiLiveConnector::new(config);

        assert!(matches!(
            connector.build_ws_url(),
            Err(UpstreamError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = GeminiLiveConfig::new("key");
        config.endpoint = format!("ws://{addr}");
        let connector = GeminiLiveConnector::new(config);

        let result = connector.open_session(OpenSessionRequest::fresh()).await;
        assert!(matches!(result, Err(UpstreamError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_setup_timeout() {
        // Accepts TCP but never completes the WebSocket upgrade
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut config = GeminiLiveConfig::new("key");
        config.endpoint = format!("ws://{addr}");
        config.connect_timeout = Duration::from_millis(100);
        let connector = GeminiLiveConnector::new(config);

        let result = connector.open_session(OpenSessionRequest::fresh()).await;
        assert!(matches!(result, Err(UpstreamError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_pending_audio_accounting() {
        let (mut handle, mut rx) = test_handle();

        handle
            .send_audio(AudioFrame::inbound(Bytes::from(vec![0u8; 640])))
            .await
            .unwrap();
        handle.end_user_turn().await.unwrap();
        assert_eq!(handle.pending_audio_bytes(), 640);

        let audio = rx.recv().await.unwrap();
        assert_eq!(audio.audio_bytes, 640);
        assert!(audio.json.contains("realtimeInput"));

        let end = rx.recv().await.unwrap();
        assert_eq!(end.audio_bytes, 0);
        assert!(end.json.contains("audioStreamEnd"));
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block() {
        // Writer never drains: capacity 8
        let (mut handle, _rx) = test_handle();

        for _ in 0..8 {
            handle
                .send_audio(AudioFrame::inbound(Bytes::from(vec![0u8; 320])))
                .await
                .unwrap();
        }
        assert_eq!(handle.pending_audio_bytes(), 8 * 320);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            handle.send_audio(AudioFrame::inbound(Bytes::from(vec![0u8; 320]))),
        )
        .await
        .expect("send must not wait for queue space");
        assert_eq!(result, Err(UpstreamError::QueueFull));
        // The refused frame is not counted as pending
        assert_eq!(handle.pending_audio_bytes(), 8 * 320);

        assert_eq!(handle.end_user_turn().await, Err(UpstreamError::QueueFull));
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_sends() {
        let (mut handle, _rx) = test_handle();
        handle.close().await;

        assert_eq!(
            handle.send_text("hello").await,
            Err(UpstreamError::Closed)
        );
        assert_eq!(handle.cancel_response().await, Err(UpstreamError::Closed));
    }

    #[tokio::test]
    async fn test_send_fails_when_writer_gone() {
        let (mut handle, rx) = test_handle();
        drop(rx);

        let result = handle
            .send_audio(AudioFrame::inbound(Bytes::from_static(&[0, 0])))
            .await;
        assert!(matches!(result, Err(UpstreamError::SendFailed(_))));
        assert_eq!(handle.pending_audio_bytes(), 0);
    }
}
