//! Audio frame types shared by the inbound and outbound pipelines.
//!
//! All audio is mono PCM, 16-bit signed little-endian. Frames are immutable
//! and never shared across sessions; the payload is a reference-counted
//! [`Bytes`] so re-chunking and forwarding do not copy.

use bytes::Bytes;

/// Sample rate of client capture audio forwarded upstream.
pub const INBOUND_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized audio sent back to the client.
pub const OUTBOUND_SAMPLE_RATE: u32 = 24000;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Direction of an audio frame relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client microphone → upstream model
    Inbound,
    /// Upstream model → client speaker
    Outbound,
}

impl Direction {
    /// Nominal sample rate for this direction.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Direction::Inbound => INBOUND_SAMPLE_RATE,
            Direction::Outbound => OUTBOUND_SAMPLE_RATE,
        }
    }
}

/// An immutable chunk of PCM16 mono audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Bytes,
    direction: Direction,
}

impl AudioFrame {
    pub fn inbound(data: Bytes) -> Self {
        Self {
            data,
            direction: Direction::Inbound,
        }
    }

    pub fn outbound(data: Bytes) -> Self {
        Self {
            data,
            direction: Direction::Outbound,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn sample_rate(&self) -> u32 {
        self.direction.sample_rate()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback duration in milliseconds, rounded down.
    pub fn duration_ms(&self) -> u64 {
        let samples = (self.data.len() / BYTES_PER_SAMPLE) as u64;
        samples * 1000 / self.sample_rate() as u64
    }

    /// Split into frames of at most `max_bytes` each, preserving byte order.
    ///
    /// `max_bytes` is rounded down to a whole number of samples (minimum one
    /// sample) so that no sample straddles two frames.
    pub fn rechunk(self, max_bytes: usize) -> Vec<AudioFrame> {
        let step = (max_bytes - max_bytes % BYTES_PER_SAMPLE).max(BYTES_PER_SAMPLE);
        if self.data.len() <= step {
            return vec![self];
        }

        let direction = self.direction;
        let mut rest = self.data;
        let mut frames = Vec::with_capacity(rest.len().div_ceil(step));
        while !rest.is_empty() {
            let take = step.min(rest.len());
            frames.push(AudioFrame {
                data: rest.split_to(take),
                direction,
            });
        }
        frames
    }
}
