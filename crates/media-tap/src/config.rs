use serde::Deserialize;

/// Tuning parameters shared by probes, decode sessions and backends.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Capacity of the producer → consumer notification channel of a probe.
    pub notify_capacity: usize,
    /// Max decoded buffers held by a session (and in flight from its backend).
    pub queue_capacity: usize,
    /// Frames per decoded buffer and resampler chunk size.
    pub chunk_frames: usize,
}

impl Default for TapConfig {
    /// Defaults sized for interactive consumers polling at UI rates.
    fn default() -> Self {
        Self {
            notify_capacity: 64,
            queue_capacity: 16,
            chunk_frames: 1024,
        }
    }
}

impl TapConfig {
    /// Clamp every knob to at least one so channels and chunks stay usable.
    pub fn normalized(mut self) -> Self {
        self.notify_capacity = self.notify_capacity.max(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.chunk_frames = self.chunk_frames.max(1);
        self
    }
}
