//! Media buffers handed from producers to consumers.
//!
//! A [`Buffer`] is immutable once built. It moves by value through the slot,
//! the backend channel and the event channel, so exactly one owner holds it at
//! any time. Cloning deep-copies the payload.

use std::time::Duration;

use media_tap_types::{AudioFormat, MediaFormat};

/// Owned sample or pixel data.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Interleaved `f32` audio samples.
    F32(Vec<f32>),
    /// Interleaved `i16` audio samples.
    I16(Vec<i16>),
    /// Raw bytes (video planes, compressed data).
    Bytes(Vec<u8>),
}

impl Payload {
    /// Number of scalar elements (samples or bytes).
    pub fn len(&self) -> usize {
        match self {
            Payload::F32(v) => v.len(),
            Payload::I16(v) => v.len(),
            Payload::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One unit of media: audio samples or a video frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer {
    payload: Payload,
    format: MediaFormat,
    start_time: Duration,
}

impl Buffer {
    pub fn new(payload: Payload, format: impl Into<MediaFormat>, start_time: Duration) -> Self {
        Self {
            payload,
            format: format.into(),
            start_time,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the buffer and keep only its data.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn format(&self) -> MediaFormat {
        self.format
    }

    /// Audio layout, `None` for video buffers.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.format.audio()
    }

    /// Presentation/start time on the producing pipeline's clock.
    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    /// A buffer is valid when its format is usable and it carries data.
    pub fn is_valid(&self) -> bool {
        self.format.is_valid() && !self.payload.is_empty()
    }

    /// Audio frames for audio buffers, `1` for a video frame.
    pub fn frame_count(&self) -> usize {
        match self.format {
            MediaFormat::Audio(f) if f.channels > 0 => self.payload.len() / f.channels as usize,
            MediaFormat::Audio(_) => 0,
            MediaFormat::Video(_) => 1,
        }
    }

    /// Playback duration covered by an audio buffer (zero for video).
    pub fn duration(&self) -> Duration {
        match self.format {
            MediaFormat::Audio(f) => f.duration_of_frames(self.frame_count() as u64),
            MediaFormat::Video(_) => Duration::ZERO,
        }
    }
}
