//! Inbound audio pipeline: capture frames from the client to the upstream.
//!
//! Sample content is not validated; bytes are forwarded as received. The only
//! check is the forwarded-but-unacknowledged ceiling, measured on the upstream
//! handle. Once it would be exceeded, or the handle's outgoing queue is full,
//! the frame is refused with [`RelayError::ResourceExhausted`] and nothing is
//! buffered locally.

use crate::core::audio::AudioFrame;
use crate::core::upstream::{UpstreamError, UpstreamHandle};
use crate::errors::{RelayError, RelayResult};

/// Per-session inbound counters and ceiling.
#[derive(Debug)]
pub struct InboundPipeline {
    ceiling: usize,
    forwarded_bytes: u64,
    forwarded_frames: u64,
    refused_frames: u64,
}

impl InboundPipeline {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            forwarded_bytes: 0,
            forwarded_frames: 0,
            refused_frames: 0,
        }
    }

    /// Total bytes forwarded upstream over the session lifetime.
    pub fn forwarded_bytes(&self) -> u64 {
        self.forwarded_bytes
    }

    pub fn forwarded_frames(&self) -> u64 {
        self.forwarded_frames
    }

    /// Frames refused because the ceiling would have been exceeded.
    pub fn refused_frames(&self) -> u64 {
        self.refused_frames
    }

    /// Forward one capture frame.
    ///
    /// Returns `ResourceExhausted` without sending when the upstream still
    /// holds too many unacknowledged bytes; the caller drops the frame.
    pub async fn forward(
        &mut self,
        frame: AudioFrame,
        upstream: &mut dyn UpstreamHandle,
    ) -> RelayResult<()> {
        let buffered = upstream.pending_audio_bytes();
        if buffered + frame.len() > self.ceiling {
            self.refused_frames += 1;
            return Err(RelayError::ResourceExhausted {
                buffered,
                ceiling: self.ceiling,
            });
        }

        let len = frame.len() as u64;
        match upstream.send_audio(frame).await {
            Ok(()) => {}
            Err(UpstreamError::QueueFull) => {
                self.refused_frames += 1;
                return Err(RelayError::ResourceExhausted {
                    buffered,
                    ceiling: self.ceiling,
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.forwarded_bytes += len;
        self.forwarded_frames += 1;
        Ok(())
    }
}
