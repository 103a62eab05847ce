//! Outbound audio pipeline: upstream audio to the client through a jitter buffer.
//!
//! # Architecture
//!
//! ```text
//! session loop ── OutboundPipeline ──► JitterBuffer ──► delivery task ──► client
//!                   (stall queue)      (Mutex<VecDeque>)  (one per session)
//! ```
//!
//! The [`JitterBuffer`] is the single point of mutation shared between the
//! session loop and the delivery task. Control frames and audio share one FIFO
//! so `turn_complete` is always delivered after the audio it follows; only
//! audio counts against the byte ceiling.
//!
//! When the buffer is full the [`OutboundPipeline`] parks frames in its stall
//! queue and the session stops reading upstream events until space frees up.
//! Memory is therefore bounded by the ceiling plus one upstream message.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::codec::{ControlMessage, OutboundFrame, encode};
use super::transport::TransportSender;
use crate::core::audio::AudioFrame;
use crate::errors::{RelayError, RelayResult};

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<OutboundFrame>,
    audio_bytes: usize,
    high_water_mark: usize,
    closed: bool,
}

/// Bounded FIFO of frames awaiting delivery to the client.
#[derive(Debug)]
pub struct JitterBuffer {
    state: Mutex<BufferState>,
    ceiling: usize,
    items: Notify,
    space: Notify,
}

impl JitterBuffer {
    pub fn new(ceiling: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            ceiling,
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Audio bytes currently queued.
    pub fn audio_bytes(&self) -> usize {
        self.state.lock().audio_bytes
    }

    /// Largest audio byte count ever queued.
    pub fn high_water_mark(&self) -> usize {
        self.state.lock().high_water_mark
    }

    /// Frames currently queued, control frames included.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn push_control(&self, message: ControlMessage) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.queue.push_back(OutboundFrame::Control(message));
        }
        self.items.notify_one();
    }

    /// Queue an audio frame, or hand it back if it would exceed the ceiling.
    ///
    /// Frames pushed after [`close`](Self::close) are discarded.
    pub fn try_push_audio(&self, frame: AudioFrame) -> Result<(), AudioFrame> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            if state.audio_bytes + frame.len() > self.ceiling {
                return Err(frame);
            }
            state.audio_bytes += frame.len();
            state.high_water_mark = state.high_water_mark.max(state.audio_bytes);
            state.queue.push_back(OutboundFrame::Audio(frame));
        }
        self.items.notify_one();
        Ok(())
    }

    /// Remove every queued audio frame and append `interrupted`, atomically.
    ///
    /// Control frames already queued keep their order ahead of the notice.
    /// Returns the number of audio bytes discarded.
    pub fn interrupt(&self, reason: impl Into<String>) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state
                .queue
                .retain(|frame| matches!(frame, OutboundFrame::Control(_)));
            let discarded = std::mem::take(&mut state.audio_bytes);
            state
                .queue
                .push_back(OutboundFrame::Control(ControlMessage::Interrupted(
                    reason.into(),
                )));
            discarded
        };
        self.items.notify_one();
        if discarded > 0 {
            self.space.notify_one();
        }
        discarded
    }

    /// Stop delivery. Queued frames are discarded and `pop` returns `None`.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.queue.clear();
            state.audio_bytes = 0;
        }
        self.items.notify_one();
        self.space.notify_one();
    }

    /// Next frame in FIFO order; waits while the buffer is empty.
    pub async fn pop(&self) -> Option<OutboundFrame> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.queue.pop_front() {
                    let len = frame.audio_len();
                    state.audio_bytes -= len;
                    drop(state);
                    if len > 0 {
                        self.space.notify_one();
                    }
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.items.notified().await;
        }
    }

    /// Resolves after audio has been removed from the buffer.
    ///
    /// May resolve spuriously; callers re-check by retrying their push.
    pub async fn space_freed(&self) {
        self.space.notified().await;
    }
}

/// Session-side half of the outbound pipeline.
///
/// Re-chunks upstream audio and parks whatever does not fit in the jitter
/// buffer, preserving order with control frames queued behind it.
#[derive(Debug)]
pub struct OutboundPipeline {
    buffer: Arc<JitterBuffer>,
    stalled: VecDeque<OutboundFrame>,
    chunk_bytes: usize,
    enqueued_bytes: u64,
}

impl OutboundPipeline {
    pub fn new(ceiling: usize, chunk_bytes: usize) -> Self {
        Self {
            buffer: Arc::new(JitterBuffer::new(ceiling)),
            stalled: VecDeque::new(),
            chunk_bytes: chunk_bytes.min(ceiling),
            enqueued_bytes: 0,
        }
    }

    pub fn buffer(&self) -> &Arc<JitterBuffer> {
        &self.buffer
    }

    /// Whether frames are waiting for buffer space.
    pub fn is_stalled(&self) -> bool {
        !self.stalled.is_empty()
    }

    /// Total upstream audio bytes accepted for delivery.
    pub fn enqueued_bytes(&self) -> u64 {
        self.enqueued_bytes
    }

    /// Accept an upstream audio chunk.
    ///
    /// Returns `false` if part of it is stalled behind the ceiling.
    pub fn enqueue_audio(&mut self, data: Bytes) -> bool {
        if data.is_empty() {
            return !self.is_stalled();
        }
        self.enqueued_bytes += data.len() as u64;
        for chunk in AudioFrame::outbound(data).rechunk(self.chunk_bytes) {
            self.stalled.push_back(OutboundFrame::Audio(chunk));
        }
        self.drain_stalled()
    }

    /// Queue a control frame behind any stalled audio.
    pub fn enqueue_control(&mut self, message: ControlMessage) {
        if self.is_stalled() {
            self.stalled.push_back(OutboundFrame::Control(message));
        } else {
            self.buffer.push_control(message);
        }
    }

    /// Move stalled frames into the buffer until it is full.
    ///
    /// Returns `true` when nothing remains stalled.
    pub fn drain_stalled(&mut self) -> bool {
        while let Some(frame) = self.stalled.pop_front() {
            match frame {
                OutboundFrame::Control(message) => self.buffer.push_control(message),
                OutboundFrame::Audio(audio) => {
                    if let Err(audio) = self.buffer.try_push_audio(audio) {
                        self.stalled.push_front(OutboundFrame::Audio(audio));
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Discard all undelivered audio and queue `interrupted`.
    ///
    /// Returns the number of audio bytes discarded.
    pub fn interrupt(&mut self, reason: impl Into<String>) -> usize {
        let mut discarded = 0;
        // Stalled control frames predate the interruption and stay ahead of it
        for frame in self.stalled.drain(..) {
            match frame {
                OutboundFrame::Control(message) => self.buffer.push_control(message),
                OutboundFrame::Audio(audio) => discarded += audio.len(),
            }
        }
        discarded + self.buffer.interrupt(reason)
    }

    pub fn close(&mut self) {
        self.stalled.clear();
        self.buffer.close();
    }
}

/// Drain the jitter buffer to the client until it is closed.
///
/// Each send is bounded by `send_timeout`; a timeout or send error means the
/// client is gone. `ready` is raised as the `ready` frame is handed to the
/// transport, so nothing the client sends in reply can be judged premature.
pub async fn run_delivery(
    buffer: Arc<JitterBuffer>,
    mut sender: Box<dyn TransportSender>,
    send_timeout: Duration,
    ready: Arc<AtomicBool>,
) -> RelayResult<()> {
    let result = async {
        while let Some(frame) = buffer.pop().await {
            if matches!(frame, OutboundFrame::Control(ControlMessage::Ready)) {
                ready.store(true, Ordering::Release);
            }
            match tokio::time::timeout(send_timeout, sender.send(encode(frame))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(RelayError::TransportClosed(format!("send failed: {e}")));
                }
                Err(_) => {
                    return Err(RelayError::TransportClosed(format!(
                        "send timed out after {send_timeout:?}"
                    )));
                }
            }
        }
        Ok(())
    }
    .await;

    if result.is_ok() {
        sender.close().await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::transport::{WireMessage, channel_transport};

    fn audio(len: usize, fill: u8) -> AudioFrame {
        AudioFrame::outbound(Bytes::from(vec![fill; len]))
    }

    fn drain_now(buffer: &JitterBuffer) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        let mut state = buffer.state.lock();
        while let Some(frame) = state.queue.pop_front() {
            state.audio_bytes -= frame.audio_len();
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_ceiling_is_never_exceeded() {
        let buffer = JitterBuffer::new(1000);
        assert!(buffer.try_push_audio(audio(600, 1)).is_ok());
        assert!(buffer.try_push_audio(audio(400, 2)).is_ok());

        let rejected = buffer.try_push_audio(audio(2, 3)).unwrap_err();
        assert_eq!(rejected.len(), 2);
        assert_eq!(buffer.audio_bytes(), 1000);
        assert_eq!(buffer.high_water_mark(), 1000);

        // Control frames do not count
        buffer.push_control(ControlMessage::TurnComplete);
        assert_eq!(buffer.audio_bytes(), 1000);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_interrupt_clears_audio_and_appends_notice() {
        let buffer = JitterBuffer::new(10_000);
        buffer.push_control(ControlMessage::SessionId("s1".to_string()));
        buffer.try_push_audio(audio(100, 1)).unwrap();
        buffer.try_push_audio(audio(100, 2)).unwrap();

        assert_eq!(buffer.interrupt("Response interrupted by user input"), 200);
        assert_eq!(buffer.audio_bytes(), 0);
        assert_eq!(
            drain_now(&buffer),
            vec![
                OutboundFrame::Control(ControlMessage::SessionId("s1".to_string())),
                OutboundFrame::Control(ControlMessage::Interrupted(
                    "Response interrupted by user input".to_string()
                )),
            ]
        );
    }

    #[tokio::test]
    async fn test_pop_is_fifo_and_waits() {
        let buffer = Arc::new(JitterBuffer::new(10_000));

        let consumer = {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut frames = Vec::new();
                while let Some(frame) = buffer.pop().await {
                    frames.push(frame);
                }
                frames
            })
        };

        buffer.try_push_audio(audio(4, 1)).unwrap();
        buffer.push_control(ControlMessage::TurnComplete);
        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.try_push_audio(audio(4, 2)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.close();

        let frames = consumer.await.unwrap();
        assert_eq!(
            frames,
            vec![
                OutboundFrame::Audio(audio(4, 1)),
                OutboundFrame::Control(ControlMessage::TurnComplete),
                OutboundFrame::Audio(audio(4, 2)),
            ]
        );
    }

    #[test]
    fn test_closed_buffer_discards_pushes() {
        let buffer = JitterBuffer::new(100);
        buffer.close();
        assert!(buffer.try_push_audio(audio(10, 0)).is_ok());
        buffer.push_control(ControlMessage::Ready);
        assert!(buffer.is_empty());
        assert_eq!(buffer.interrupt("x"), 0);
    }

    #[test]
    fn test_pipeline_rechunks_and_stalls() {
        let mut pipeline = OutboundPipeline::new(1000, 400);

        // 1200 bytes -> 400 + 400 fit, the last 400 stalls
        assert!(!pipeline.enqueue_audio(Bytes::from(vec![7u8; 1200])));
        assert!(pipeline.is_stalled());
        assert_eq!(pipeline.buffer().audio_bytes(), 800);

        // turn_complete waits behind the stalled audio
        pipeline.enqueue_control(ControlMessage::TurnComplete);
        assert_eq!(pipeline.buffer().len(), 2);

        let delivered = drain_now(pipeline.buffer());
        assert_eq!(delivered.len(), 2);
        assert!(pipeline.drain_stalled());
        assert_eq!(
            drain_now(pipeline.buffer()),
            vec![
                OutboundFrame::Audio(audio(400, 7)),
                OutboundFrame::Control(ControlMessage::TurnComplete),
            ]
        );
    }

    #[test]
    fn test_pipeline_interrupt_discards_stalled_audio() {
        let mut pipeline = OutboundPipeline::new(1000, 500);
        pipeline.enqueue_audio(Bytes::from(vec![1u8; 1500]));
        pipeline.enqueue_control(ControlMessage::SessionId("s2".to_string()));
        assert!(pipeline.is_stalled());

        assert_eq!(pipeline.interrupt("upstream_error"), 1500);
        assert!(!pipeline.is_stalled());
        assert_eq!(
            drain_now(pipeline.buffer()),
            vec![
                OutboundFrame::Control(ControlMessage::SessionId("s2".to_string())),
                OutboundFrame::Control(ControlMessage::Interrupted("upstream_error".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_delivery_sets_ready_and_preserves_order() {
        let (sender, _receiver, _to_session, mut from_session) = channel_transport(16);
        let buffer = Arc::new(JitterBuffer::new(10_000));
        let ready = Arc::new(AtomicBool::new(false));

        buffer.push_control(ControlMessage::Ready);
        buffer.try_push_audio(audio(4, 9)).unwrap();

        let task = tokio::spawn(run_delivery(
            buffer.clone(),
            Box::new(sender),
            Duration::from_secs(1),
            ready.clone(),
        ));

        assert_eq!(
            from_session.recv().await.unwrap(),
            WireMessage::Text(r#"{"type":"ready"}"#.to_string())
        );
        assert_eq!(
            from_session.recv().await.unwrap(),
            WireMessage::Binary(Bytes::from(vec![9u8; 4]))
        );
        assert!(ready.load(Ordering::Acquire));

        buffer.close();
        task.await.unwrap().unwrap();
        assert_eq!(from_session.recv().await.unwrap(), WireMessage::Close);
    }

    #[tokio::test]
    async fn test_delivery_fails_when_client_gone() {
        let (sender, _receiver, _to_session, from_session) = channel_transport(1);
        drop(from_session);
        let buffer = Arc::new(JitterBuffer::new(100));
        buffer.push_control(ControlMessage::Ready);

        let err = run_delivery(
            buffer,
            Box::new(sender),
            Duration::from_secs(1),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_delivery_times_out_on_stuck_client() {
        // Capacity 1 and nobody reading: the second send never completes
        let (sender, _receiver, _to_session, _from_session) = channel_transport(1);
        let buffer = Arc::new(JitterBuffer::new(100));
        buffer.push_control(ControlMessage::Ready);
        buffer.push_control(ControlMessage::TurnComplete);

        let err = run_delivery(
            buffer,
            Box::new(sender),
            Duration::from_millis(50),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::TransportClosed(msg) if msg.contains("timed out")));
    }
}
