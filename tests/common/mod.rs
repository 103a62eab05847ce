//! Shared test infrastructure
//!
//! - [`ScriptedConnector`]: in-process upstream whose sessions are driven by the test
//! - [`spawn_relay`]: the real router on an ephemeral port
//! - [`RelayClient`]: a `tokio-tungstenite` client speaking the relay protocol

// Not every test binary uses every helper
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use audio_relay::core::upstream::{
    OpenSessionRequest, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamHandle,
    UpstreamResult, UpstreamSession,
};
use audio_relay::{AudioFrame, ServerConfig, routes, state::AppState};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// What the relay asked a scripted upstream to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    Audio(Bytes),
    Text(String),
    EndTurn,
    Cancel,
    Close,
}

/// Test-side end of one opened upstream session.
pub struct UpstreamProbe {
    pub request: OpenSessionRequest,
    pub events: mpsc::Sender<UpstreamEvent>,
    pub commands: mpsc::UnboundedReceiver<UpstreamCommand>,
    /// Reported as the handle's unacknowledged audio
    pub pending: Arc<AtomicUsize>,
}

impl UpstreamProbe {
    pub async fn emit(&self, event: UpstreamEvent) {
        self.events.send(event).await.unwrap();
    }

    pub async fn next_command(&mut self) -> UpstreamCommand {
        timeout(STEP_TIMEOUT, self.commands.recv())
            .await
            .expect("timed out waiting for upstream command")
            .expect("upstream command channel closed")
    }

    /// Assert nothing arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(command)) = timeout(window, self.commands.recv()).await {
            panic!("unexpected upstream command: {command:?}");
        }
    }
}

struct ScriptedHandle {
    commands: mpsc::UnboundedSender<UpstreamCommand>,
    pending: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamHandle for ScriptedHandle {
    async fn send_audio(&mut self, frame: AudioFrame) -> UpstreamResult<()> {
        self.commands
            .send(UpstreamCommand::Audio(frame.into_data()))
            .map_err(|_| UpstreamError::Closed)
    }

    async fn send_text(&mut self, text: &str) -> UpstreamResult<()> {
        self.commands
            .send(UpstreamCommand::Text(text.to_string()))
            .map_err(|_| UpstreamError::Closed)
    }

    async fn end_user_turn(&mut self) -> UpstreamResult<()> {
        self.commands
            .send(UpstreamCommand::EndTurn)
            .map_err(|_| UpstreamError::Closed)
    }

    async fn cancel_response(&mut self) -> UpstreamResult<()> {
        self.commands
            .send(UpstreamCommand::Cancel)
            .map_err(|_| UpstreamError::Closed)
    }

    fn pending_audio_bytes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        let _ = self.commands.send(UpstreamCommand::Close);
    }
}

/// Upstream connector scripted by the test.
#[derive(Default)]
pub struct ScriptedConnector {
    open_delay: Duration,
    /// Remaining opens that fail outright
    failures: AtomicUsize,
    reject_resume: AtomicBool,
    opens: AtomicUsize,
    probes: parking_lot::Mutex<Option<mpsc::UnboundedSender<UpstreamProbe>>>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<UpstreamProbe>) {
        Self::with_delay(Duration::ZERO)
    }

    /// Connector whose opens take `open_delay`.
    pub fn with_delay(open_delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<UpstreamProbe>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            open_delay,
            probes: parking_lot::Mutex::new(Some(tx)),
            ..Default::default()
        };
        (Arc::new(connector), rx)
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn reject_resumption(&self, reject: bool) {
        self.reject_resume.store(reject, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    async fn open_session(&self, request: OpenSessionRequest) -> UpstreamResult<UpstreamSession> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.open_delay).await;

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(UpstreamError::ConnectionFailed("scripted failure".to_string()));
        }
        if request.resume_handle.is_some() && self.reject_resume.load(Ordering::SeqCst) {
            return Err(UpstreamError::ResumeRejected("unknown handle".to_string()));
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        if let Some(probes) = self.probes.lock().as_ref() {
            let _ = probes.send(UpstreamProbe {
                request,
                events: event_tx,
                commands: command_rx,
                pending: pending.clone(),
            });
        }

        Ok(UpstreamSession {
            handle: Box::new(ScriptedHandle {
                commands: command_tx,
                pending,
            }),
            events: event_rx,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub async fn next_probe(probes: &mut mpsc::UnboundedReceiver<UpstreamProbe>) -> UpstreamProbe {
    timeout(STEP_TIMEOUT, probes.recv())
        .await
        .expect("timed out waiting for upstream open")
        .expect("connector dropped")
}

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.gemini_api_key = Some("test-key".to_string());
    config
}

/// Serve the relay on an ephemeral port.
pub async fn spawn_relay(
    config: ServerConfig,
    connector: Arc<ScriptedConnector>,
) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::with_connector(config, connector);
    let app = routes::create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

/// Relay protocol client.
pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    pub async fn connect(addr: SocketAddr, path: &str) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
        Self { ws }
    }

    pub async fn send_audio(&mut self, len: usize, fill: u8) {
        self.ws
            .send(Message::Binary(Bytes::from(vec![fill; len])))
            .await
            .unwrap();
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_raw_text(&value.to_string()).await;
    }

    pub async fn send_raw_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Next data frame, skipping ping/pong.
    pub async fn next_message(&mut self) -> Message {
        loop {
            let message = timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for relay message")
                .expect("relay closed the connection")
                .expect("websocket error");
            if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
                return message;
            }
        }
    }

    pub async fn expect_json(&mut self) -> Value {
        match self.next_message().await {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    pub async fn expect_binary(&mut self) -> Bytes {
        match self.next_message().await {
            Message::Binary(data) => data,
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    pub async fn expect_ready(&mut self) {
        assert_eq!(self.expect_json().await, serde_json::json!({"type": "ready"}));
    }

    /// Wait for the server to close the connection.
    pub async fn expect_closed(&mut self) {
        loop {
            match timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for close")
            {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    }
}
