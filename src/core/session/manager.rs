//! Session manager.
//!
//! Owns one set of pipelines per client connection and runs the session as a
//! single task: every client frame and upstream event is serialized through
//! one `select!` loop, so turn decisions never race. Outbound delivery runs in
//! a separate task that only ever touches the jitter buffer.
//!
//! # Lifecycle
//!
//! 1. Open the upstream (resuming when the client presented an identifier)
//!    while dropping anything the client sends early.
//! 2. Queue `ready` and start the delivery task. Client frames are accepted
//!    once `ready` has been handed to the transport.
//! 3. Relay until the client leaves, a send fails or the session idles out.
//! 4. Tear down best-effort: close the buffer and the upstream, no retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

use super::codec::{self, ControlMessage};
use super::inbound::InboundPipeline;
use super::jitter::{OutboundPipeline, run_delivery};
use super::router::{
    self, BARGE_IN_REASON, Payload, Route, TurnTranscript, UPSTREAM_ERROR_REASON,
};
use super::transport::{TransportReceiver, TransportSender, WireMessage};
use super::turn::{Effect, Trigger, TurnMachine, TurnState};
use crate::core::upstream::{
    OpenSessionRequest, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamHandle,
    UpstreamResult, UpstreamSession,
};
use crate::errors::{ProtocolError, RelayError, RelayResult};

/// Minimum delay between lazy upstream reopen attempts after one failed.
const REOPEN_BACKOFF: Duration = Duration::from_secs(1);

/// Bound on waiting for the delivery task to flush its close frame.
const DELIVERY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Forwarded-but-unacknowledged inbound audio ceiling, in bytes
    pub inbound_ceiling: usize,
    /// Jitter buffer audio ceiling, in bytes
    pub jitter_ceiling: usize,
    /// Maximum size of one outbound binary frame, in bytes
    pub outbound_chunk_bytes: usize,
    /// Bound on a single send to the client
    pub client_send_timeout: Duration,
    /// Session closes after this long without client traffic
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inbound_ceiling: 256 * 1024,
            // 10 s of 24 kHz PCM16
            jitter_ceiling: 480_000,
            // 200 ms of 24 kHz PCM16
            outbound_chunk_bytes: 9600,
            client_send_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// What happened over a session's lifetime.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub connection_id: Uuid,
    /// Last resumable identifier issued to the client
    pub session_id: Option<String>,
    pub final_state: TurnState,
    pub duration: Duration,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
    pub protocol_errors: u64,
    pub premature_frames: u64,
    pub upstream_failures: u64,
    pub close_reason: &'static str,
}

/// Creates and runs relay sessions. Shared across connections; sessions
/// themselves share nothing.
pub struct SessionManager {
    connector: Arc<dyn UpstreamConnector>,
    settings: SessionSettings,
    active: AtomicUsize,
    total: AtomicU64,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn UpstreamConnector>, settings: SessionSettings) -> Self {
        Self {
            connector,
            settings,
            active: AtomicUsize::new(0),
            total: AtomicU64::new(0),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.connector.name()
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Sessions started since the process began.
    pub fn total_sessions(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Run one session to completion over the given transport.
    pub async fn run_session(
        &self,
        sender: Box<dyn TransportSender>,
        mut receiver: Box<dyn TransportReceiver>,
        resume_session_id: Option<String>,
    ) -> SessionSummary {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        let _active = ActiveGuard(&self.active);

        let session = Session::new(self.connector.clone(), &self.settings);
        let span = tracing::info_span!(
            "relay_session",
            connection_id = %session.connection_id,
            session_id = tracing::field::Empty,
        );

        session
            .run(sender, receiver.as_mut(), resume_session_id)
            .instrument(span)
            .await
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Open an upstream session, falling back to a fresh one when resumption fails.
///
/// The flag reports whether the presented identifier was honoured.
async fn open_upstream(
    connector: &dyn UpstreamConnector,
    resume_handle: Option<String>,
) -> UpstreamResult<(UpstreamSession, bool)> {
    if let Some(handle) = resume_handle {
        match connector
            .open_session(OpenSessionRequest::resume(handle))
            .await
        {
            Ok(session) => return Ok((session, true)),
            Err(e) => warn!(error = %e, "Session resumption failed, starting fresh"),
        }
    }
    let session = connector.open_session(OpenSessionRequest::fresh()).await?;
    Ok((session, false))
}

async fn next_event(events: &mut Option<mpsc::Receiver<UpstreamEvent>>) -> Option<UpstreamEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct Session {
    connection_id: Uuid,
    created_at: Instant,
    session_id: Option<String>,
    connector: Arc<dyn UpstreamConnector>,
    settings: SessionSettings,

    turn: TurnMachine,
    inbound: InboundPipeline,
    outbound: OutboundPipeline,
    upstream: Option<Box<dyn UpstreamHandle>>,
    events: Option<mpsc::Receiver<UpstreamEvent>>,
    reopen_after: Option<Instant>,
    ready: Arc<AtomicBool>,
    transcript: TurnTranscript,

    protocol_errors: u64,
    premature_frames: u64,
    upstream_failures: u64,
}

impl Session {
    fn new(connector: Arc<dyn UpstreamConnector>, settings: &SessionSettings) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            created_at: Instant::now(),
            session_id: None,
            connector,
            settings: settings.clone(),
            turn: TurnMachine::new(),
            inbound: InboundPipeline::new(settings.inbound_ceiling),
            outbound: OutboundPipeline::new(
                settings.jitter_ceiling,
                settings.outbound_chunk_bytes,
            ),
            upstream: None,
            events: None,
            reopen_after: None,
            ready: Arc::new(AtomicBool::new(false)),
            transcript: TurnTranscript::default(),
            protocol_errors: 0,
            premature_frames: 0,
            upstream_failures: 0,
        }
    }

    async fn run(
        mut self,
        sender: Box<dyn TransportSender>,
        receiver: &mut dyn TransportReceiver,
        resume_session_id: Option<String>,
    ) -> SessionSummary {
        info!(resume = resume_session_id.is_some(), "Session started");

        let opened = match self.handshake(receiver, resume_session_id.clone()).await {
            Ok(opened) => opened,
            Err(e) => {
                info!(error = %e, "Client left during handshake");
                self.release_upstream().await;
                return self.summary("client_closed");
            }
        };

        // `ready` is always the first frame on the wire
        self.outbound.enqueue_control(ControlMessage::Ready);
        match opened {
            Ok((session, resumed)) => {
                if resumed {
                    self.set_session_id(resume_session_id);
                }
                self.install(session);
            }
            Err(e) => {
                error!(error = %e, "Upstream unavailable at connect");
                self.upstream_failures += 1;
                self.outbound.interrupt(UPSTREAM_ERROR_REASON);
            }
        }

        let mut delivery = tokio::spawn(
            run_delivery(
                self.outbound.buffer().clone(),
                sender,
                self.settings.client_send_timeout,
                self.ready.clone(),
            )
            .instrument(Span::current()),
        );

        let (reason, delivery_finished) = self.event_loop(receiver, &mut delivery).await;
        self.teardown(delivery, delivery_finished).await;
        self.summary(reason)
    }

    /// Open the upstream while discarding premature client traffic.
    ///
    /// Fails only if the client goes away first.
    async fn handshake(
        &mut self,
        receiver: &mut dyn TransportReceiver,
        resume_session_id: Option<String>,
    ) -> RelayResult<UpstreamResult<(UpstreamSession, bool)>> {
        let connector = self.connector.clone();
        let open = async move { open_upstream(connector.as_ref(), resume_session_id).await };
        tokio::pin!(open);

        loop {
            tokio::select! {
                opened = &mut open => return Ok(opened),
                message = receiver.recv() => match message {
                    None | Some(Ok(WireMessage::Close)) => {
                        return Err(RelayError::TransportClosed("closed during handshake".to_string()));
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(_)) => self.drop_premature(),
                },
            }
        }
    }

    async fn event_loop(
        &mut self,
        receiver: &mut dyn TransportReceiver,
        delivery: &mut JoinHandle<RelayResult<()>>,
    ) -> (&'static str, bool) {
        let idle_timeout = self.settings.idle_timeout;
        let mut last_activity = tokio::time::Instant::now();

        loop {
            tokio::select! {
                message = receiver.recv() => {
                    last_activity = tokio::time::Instant::now();
                    match message {
                        None | Some(Ok(WireMessage::Close)) => {
                            info!("Client closed connection");
                            return ("client_closed", false);
                        }
                        Some(Err(e)) if e.is_fatal() => {
                            warn!(error = %e, "Client transport error");
                            return ("transport_error", false);
                        }
                        Some(Err(e)) => {
                            debug!(error = %e, kind = e.kind(), "Ignoring client receive error");
                        }
                        Some(Ok(message)) => self.on_client_message(message).await,
                    }
                }

                event = next_event(&mut self.events), if !self.outbound.is_stalled() => {
                    match event {
                        Some(event) => self.on_upstream_event(event).await,
                        None => self.upstream_failed("upstream event stream closed").await,
                    }
                }

                _ = self.outbound.buffer().space_freed(), if self.outbound.is_stalled() => {
                    self.outbound.drain_stalled();
                }

                result = &mut *delivery => {
                    match result {
                        Ok(Ok(())) => debug!("Delivery task finished"),
                        Ok(Err(e)) => warn!(error = %e, kind = e.kind(), "Client delivery failed"),
                        Err(e) => error!(error = %e, "Delivery task aborted"),
                    }
                    return ("transport_closed", true);
                }

                _ = tokio::time::sleep_until(last_activity + idle_timeout) => {
                    warn!(idle_secs = idle_timeout.as_secs(), "Session idle, closing");
                    return ("idle_timeout", false);
                }
            }
        }
    }

    async fn on_client_message(&mut self, message: WireMessage) {
        if !self.ready.load(Ordering::Acquire) {
            self.drop_premature();
            return;
        }

        let frame = match codec::decode(message) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Ignoring control message of unknown type");
                return;
            }
            Err(e) => return self.protocol_error(e),
        };

        match router::route_client(frame) {
            Ok(Route::Turn(trigger, payload)) => self.drive(trigger, payload).await,
            Ok(Route::SessionId(_) | Route::UserTranscript(_) | Route::Ignore) => {}
            Err(e) => self.protocol_error(e),
        }
    }

    async fn on_upstream_event(&mut self, event: UpstreamEvent) {
        match router::route_upstream(event) {
            Route::Turn(trigger, payload) => self.drive(trigger, payload).await,
            Route::SessionId(id) => {
                info!(session_id = %id, "Upstream issued session id");
                self.set_session_id(Some(id.clone()));
                self.outbound.enqueue_control(ControlMessage::SessionId(id));
            }
            Route::UserTranscript(text) => self.transcript.push_user(&text),
            Route::Ignore => {}
        }
    }

    /// Apply a trigger and perform the resulting effect.
    async fn drive(&mut self, trigger: Trigger, payload: Payload) {
        if matches!(trigger, Trigger::InboundAudio | Trigger::ClientText)
            && !self.ensure_upstream().await
        {
            debug!(?trigger, "No upstream, dropping client input");
            return;
        }

        let from = self.turn.state();
        let effect = self.turn.apply(trigger);
        if self.turn.state() != from {
            debug!(
                ?trigger,
                from = %from,
                to = %self.turn.state(),
                abandoned = self.turn.is_abandoned(),
                "Turn transition"
            );
        }

        let result = match effect {
            Effect::ForwardAudio => self.forward_audio(payload).await,
            Effect::BargeIn => {
                self.log_transcript("interrupted");
                let discarded = self.outbound.interrupt(BARGE_IN_REASON);
                info!(discarded_bytes = discarded, "Barge-in, abandoning model response");
                if let Some(upstream) = self.upstream.as_mut()
                    && let Err(e) = upstream.cancel_response().await
                {
                    debug!(error = %e, "Upstream cancel failed");
                }
                self.forward_audio(payload).await
            }
            Effect::EndUserTurn => match self.upstream.as_mut() {
                Some(upstream) => upstream.end_user_turn().await,
                None => Err(UpstreamError::NotConnected),
            },
            Effect::SubmitText => match (self.upstream.as_mut(), payload) {
                (Some(upstream), Payload::Text(text)) => upstream.send_text(&text).await,
                (None, _) => Err(UpstreamError::NotConnected),
                (Some(_), _) => Ok(()),
            },
            Effect::Deliver => {
                match payload {
                    Payload::Audio(frame) => {
                        if !self.outbound.enqueue_audio(frame.into_data()) {
                            debug!(
                                buffered = self.outbound.buffer().audio_bytes(),
                                "Jitter buffer full, pausing upstream reads"
                            );
                        }
                    }
                    Payload::Text(text) => {
                        self.transcript.push_model(&text);
                        self.outbound.enqueue_control(ControlMessage::Text(text))
                    }
                    Payload::None => {}
                }
                Ok(())
            }
            Effect::CompleteTurn => {
                self.log_transcript("complete");
                self.outbound.enqueue_control(ControlMessage::TurnComplete);
                Ok(())
            }
            Effect::Interrupt => {
                self.log_transcript("interrupted");
                let discarded = self.outbound.interrupt(BARGE_IN_REASON);
                info!(discarded_bytes = discarded, "Upstream interrupted its response");
                Ok(())
            }
            Effect::Fail => {
                let reason = match payload {
                    Payload::Text(reason) => reason,
                    _ => "upstream error".to_string(),
                };
                self.fail_upstream(&reason).await;
                Ok(())
            }
            Effect::Discard => {
                debug!(?trigger, "Discarding output of abandoned response");
                Ok(())
            }
            Effect::Ignore => Ok(()),
            Effect::Reject(e) => {
                self.protocol_error(e);
                Ok(())
            }
        };

        if let Err(e) = result {
            self.upstream_failed(&e.to_string()).await;
        }
    }

    async fn forward_audio(&mut self, payload: Payload) -> UpstreamResult<()> {
        let Payload::Audio(frame) = payload else {
            return Ok(());
        };
        let Some(upstream) = self.upstream.as_mut() else {
            return Err(UpstreamError::NotConnected);
        };

        match self.inbound.forward(frame, upstream.as_mut()).await {
            Ok(()) => Ok(()),
            Err(RelayError::ResourceExhausted { buffered, ceiling }) => {
                debug!(buffered, ceiling, "Inbound ceiling reached, dropping capture frame");
                Ok(())
            }
            Err(RelayError::Upstream(e)) => Err(e),
            Err(e) => {
                warn!(error = %e, "Unexpected inbound error");
                Ok(())
            }
        }
    }

    /// Reopen the upstream if it was lost. Returns whether one is available.
    async fn ensure_upstream(&mut self) -> bool {
        if self.upstream.is_some() {
            return true;
        }
        if let Some(after) = self.reopen_after
            && Instant::now() < after
        {
            return false;
        }

        info!(resume = self.session_id.is_some(), "Reopening upstream session");
        let resume = self.session_id.clone();
        match open_upstream(self.connector.as_ref(), resume.clone()).await {
            Ok((session, resumed)) => {
                if resume.is_some() && !resumed {
                    self.set_session_id(None);
                }
                self.reopen_after = None;
                self.install(session);
                true
            }
            Err(e) => {
                error!(error = %e, "Upstream reopen failed");
                self.upstream_failures += 1;
                self.reopen_after = Some(Instant::now() + REOPEN_BACKOFF);
                self.outbound.interrupt(UPSTREAM_ERROR_REASON);
                false
            }
        }
    }

    fn install(&mut self, session: UpstreamSession) {
        self.upstream = Some(session.handle);
        self.events = Some(session.events);
        info!(provider = self.connector.name(), "Upstream session open");
    }

    /// Route an upstream failure through the turn machine.
    async fn upstream_failed(&mut self, reason: &str) {
        let effect = self.turn.apply(Trigger::UpstreamFailure);
        debug_assert_eq!(effect, Effect::Fail);
        self.fail_upstream(reason).await;
    }

    async fn fail_upstream(&mut self, reason: &str) {
        error!(reason, "Upstream failure");
        self.log_transcript("upstream_failed");
        self.upstream_failures += 1;
        let discarded = self.outbound.interrupt(UPSTREAM_ERROR_REASON);
        debug!(discarded_bytes = discarded, "Cleared jitter buffer after upstream failure");
        self.release_upstream().await;
    }

    async fn release_upstream(&mut self) {
        self.events = None;
        if let Some(mut upstream) = self.upstream.take() {
            upstream.close().await;
        }
    }

    fn set_session_id(&mut self, id: Option<String>) {
        if let Some(id) = &id {
            Span::current().record("session_id", id.as_str());
        }
        self.session_id = id;
    }

    fn log_transcript(&mut self, outcome: &'static str) {
        if self.transcript.is_empty() {
            return;
        }
        let (user, model) = self.transcript.take();
        info!(outcome, user = %user, model = %model, "Turn transcript");
    }

    fn drop_premature(&mut self) {
        self.premature_frames += 1;
        debug!(error = %ProtocolError::PrematureData, "Dropping client message");
    }

    fn protocol_error(&mut self, error: ProtocolError) {
        self.protocol_errors += 1;
        warn!(error = %error, state = %self.turn.state(), "Dropping client message");
    }

    async fn teardown(&mut self, delivery: JoinHandle<RelayResult<()>>, delivery_finished: bool) {
        self.log_transcript("session_end");
        self.outbound.close();
        self.release_upstream().await;

        if !delivery_finished {
            let abort = delivery.abort_handle();
            if tokio::time::timeout(DELIVERY_SHUTDOWN_TIMEOUT, delivery)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
    }

    fn summary(&self, close_reason: &'static str) -> SessionSummary {
        let summary = SessionSummary {
            connection_id: self.connection_id,
            session_id: self.session_id.clone(),
            final_state: self.turn.state(),
            duration: self.created_at.elapsed(),
            inbound_bytes: self.inbound.forwarded_bytes(),
            outbound_bytes: self.outbound.enqueued_bytes(),
            protocol_errors: self.protocol_errors,
            premature_frames: self.premature_frames,
            upstream_failures: self.upstream_failures,
            close_reason,
        };
        info!(
            close_reason,
            duration_ms = summary.duration.as_millis() as u64,
            inbound_bytes = summary.inbound_bytes,
            outbound_bytes = summary.outbound_bytes,
            protocol_errors = summary.protocol_errors,
            premature_frames = summary.premature_frames,
            upstream_failures = summary.upstream_failures,
            inbound_frames = self.inbound.forwarded_frames(),
            inbound_refused = self.inbound.refused_frames(),
            jitter_high_water = self.outbound.buffer().high_water_mark(),
            "Session ended"
        );
        summary
    }
}
