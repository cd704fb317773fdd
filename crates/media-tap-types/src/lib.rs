use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sample representation carried by decoded audio buffers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    /// 32-bit float, nominal range `-1.0..=1.0`.
    F32,
    /// Signed 16-bit integer.
    I16,
}

impl SampleType {
    /// Size of a single sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::F32 => 4,
            SampleType::I16 => 2,
        }
    }
}

/// Channel/sample layout of an audio stream.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Sample representation.
    pub sample_type: SampleType,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_type: SampleType) -> Self {
        Self {
            sample_rate,
            channels,
            sample_type,
        }
    }

    /// A format is usable when both rate and channel count are non-zero.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    /// Bytes occupied by one interleaved frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_type.bytes_per_sample()
    }

    /// Playback duration of `frames` frames at this rate.
    ///
    /// Returns zero for invalid formats.
    pub fn duration_of_frames(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let rate = self.sample_rate as u64;
        let secs = frames / rate;
        let rem = frames % rate;
        Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / rate)
    }
}

/// Pixel layouts a pipeline may hand to a video probe.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Nv12,
    Yuyv,
    Uyvy,
    Bgra32,
    Rgb24,
}

/// Plane layout of a video frame.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl VideoFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Which half of a pipeline a probe observes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Format descriptor attached to every buffer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaFormat {
    Audio(AudioFormat),
    Video(VideoFormat),
}

impl MediaFormat {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaFormat::Audio(_) => MediaKind::Audio,
            MediaFormat::Video(_) => MediaKind::Video,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            MediaFormat::Audio(f) => f.is_valid(),
            MediaFormat::Video(f) => f.is_valid(),
        }
    }

    /// Audio layout, if this describes an audio buffer.
    pub fn audio(&self) -> Option<AudioFormat> {
        match self {
            MediaFormat::Audio(f) => Some(*f),
            MediaFormat::Video(_) => None,
        }
    }
}

impl From<AudioFormat> for MediaFormat {
    fn from(value: AudioFormat) -> Self {
        MediaFormat::Audio(value)
    }
}

impl From<VideoFormat> for MediaFormat {
    fn from(value: VideoFormat) -> Self {
        MediaFormat::Video(value)
    }
}

/// Decode session lifecycle state.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecoderState {
    /// Idle; the initial state and the state after stop, error or end of stream.
    #[default]
    Stopped,
    /// A backend is producing buffers.
    Decoding,
}

/// Error codes surfaced through decode error events.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorCode {
    /// `start()` was called without a filename or stream device.
    NoSource,
    /// The source could not be opened or read.
    Resource,
    /// The source is not in a decodable format, or the requested format is unsupported.
    Format,
    /// The source exists but access was refused.
    AccessDenied,
    /// No backend is able to handle the source.
    ServiceMissing,
}

/// Reason why a decode run ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecodeEndReason {
    /// The backend reached end of stream and every buffer was read.
    Finished,
    /// The run was stopped by the application.
    Stopped,
    /// A backend error terminated the run.
    Error,
}

/// Point-in-time view of a decode session, suitable for logging or JSON output.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    /// Current lifecycle state.
    pub state: DecoderState,
    /// Source description (filename or stream name), if set.
    pub source: Option<String>,
    /// Effective audio format, if known.
    pub format: Option<AudioFormat>,
    /// Start time of the most recent buffer, in milliseconds.
    pub position_ms: u64,
    /// Total duration in milliseconds when the backend knows it.
    pub duration_ms: Option<u64>,
    /// Buffers waiting to be read.
    pub queued_buffers: usize,
    /// `true` when `read()` would return a buffer.
    pub buffer_available: bool,
    /// Code of the last reported error.
    pub error: Option<DecodeErrorCode>,
    /// How the previous run ended.
    pub end_reason: Option<DecodeEndReason>,
}

/// Counters maintained by a probe bridge.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeStats {
    /// Buffers installed into the slot.
    pub installed: u64,
    /// Pending buffers overwritten before the consumer took them.
    pub replaced: u64,
    /// Buffers handed to the consumer.
    pub delivered: u64,
    /// Buffers dropped because they arrived inside a flush window.
    pub discarded: u64,
    /// Notifications ignored because a flush invalidated them.
    pub stale: u64,
    /// Flushes processed.
    pub flushes: u64,
}
