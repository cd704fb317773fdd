//! Test doubles shared by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use media_tap_types::{AudioFormat, DecodeErrorCode, MediaKind, SampleType};

use crate::buffer::{Buffer, Payload};
use crate::decode::backend::{DecodeBackend, DecodeRequest, DecodeSink};
use crate::decode::source::DecodeSource;
use crate::error::TapError;
use crate::registry::{ProbeBackend, SourceId, SourceRegistry};

/// Probe-only registry that counts backend grants and releases.
pub struct CountingRegistry {
    live: Mutex<HashSet<SourceId>>,
    requests: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingRegistry {
    /// Registry whose probeable sources are the given raw ids.
    pub fn with_probe_sources(ids: &[u64]) -> Self {
        Self {
            live: Mutex::new(ids.iter().copied().map(SourceId::from_raw).collect()),
            requests: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Simulate the source being torn down.
    pub fn destroy(&self, source: SourceId) {
        self.live.lock().unwrap().remove(&source);
    }
}

impl SourceRegistry for CountingRegistry {
    fn request_probe_backend(&self, source: SourceId, kind: MediaKind) -> Option<ProbeBackend> {
        if !self.contains(source) {
            return None;
        }
        self.requests.fetch_add(1, Ordering::SeqCst);
        Some(ProbeBackend::new(kind, 8))
    }

    fn release_probe_backend(&self, _source: SourceId, _backend: ProbeBackend) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn contains(&self, source: SourceId) -> bool {
        self.live.lock().unwrap().contains(&source)
    }

    fn request_decode_backend(
        &self,
        _source: &DecodeSource,
    ) -> Result<Box<dyn DecodeBackend>, TapError> {
        Err(TapError::backend(DecodeErrorCode::ServiceMissing, "probe-only registry"))
    }
}

/// What a [`ScriptedBackend`] produces for each run.
#[derive(Clone, Debug)]
pub struct Script {
    /// Buffers produced before end of stream.
    pub buffers: usize,
    /// Frames per buffer.
    pub frames: usize,
    /// Format used when the session does not request one.
    pub native: AudioFormat,
    pub duration: Option<Duration>,
    /// Report an error instead of the buffer at this index.
    pub fail_after: Option<(usize, DecodeErrorCode)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            buffers: 0,
            frames: 4,
            native: AudioFormat::new(8_000, 1, SampleType::F32),
            duration: None,
            fail_after: None,
        }
    }
}

/// Backend that plays a [`Script`] from its own thread.
pub struct ScriptedBackend {
    script: Script,
    cancel: Arc<AtomicBool>,
}

impl DecodeBackend for ScriptedBackend {
    fn start(&mut self, request: DecodeRequest, sink: DecodeSink) -> Result<(), TapError> {
        let script = self.script.clone();
        let cancel = self.cancel.clone();
        thread::spawn(move || {
            let format = request.format.unwrap_or(script.native);
            if !sink.format(format) || !sink.duration(script.duration) {
                return;
            }
            for n in 0..script.buffers {
                if cancel.load(Ordering::Acquire) {
                    return;
                }
                if let Some((at, code)) = script.fail_after {
                    if n == at {
                        sink.error(TapError::backend(code, "scripted failure"));
                        return;
                    }
                }
                let samples = script.frames * format.channels as usize;
                let payload = match format.sample_type {
                    SampleType::F32 => Payload::F32(vec![0.25; samples]),
                    SampleType::I16 => Payload::I16(vec![64; samples]),
                };
                let start = format.duration_of_frames((n * script.frames) as u64);
                if !sink.buffer(Buffer::new(payload, format, start)) {
                    return;
                }
            }
            sink.end_of_stream();
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.store(true, Ordering::Release);
    }
}

/// Decode-only registry handing out [`ScriptedBackend`]s.
pub struct ScriptedRegistry {
    script: Script,
    fail_create: Option<DecodeErrorCode>,
    requested: Mutex<Vec<DecodeSource>>,
}

impl ScriptedRegistry {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            fail_create: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Registry whose backend creation always fails with `code`.
    pub fn failing(code: DecodeErrorCode) -> Self {
        Self {
            fail_create: Some(code),
            ..Self::new(Script::default())
        }
    }

    pub fn decode_requests(&self) -> usize {
        self.requested.lock().unwrap().len()
    }

    pub fn requested_sources(&self) -> Vec<DecodeSource> {
        self.requested.lock().unwrap().clone()
    }
}

impl SourceRegistry for ScriptedRegistry {
    fn request_probe_backend(&self, _source: SourceId, _kind: MediaKind) -> Option<ProbeBackend> {
        None
    }

    fn release_probe_backend(&self, _source: SourceId, _backend: ProbeBackend) {}

    fn contains(&self, _source: SourceId) -> bool {
        false
    }

    fn request_decode_backend(
        &self,
        source: &DecodeSource,
    ) -> Result<Box<dyn DecodeBackend>, TapError> {
        self.requested.lock().unwrap().push(source.clone());
        if let Some(code) = self.fail_create {
            return Err(TapError::backend(code, "no decoder available"));
        }
        Ok(Box::new(ScriptedBackend {
            script: self.script.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// 16-bit PCM WAV holding a quiet sine of `frames` frames.
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let block_align = channels * 2;
    let data_len = (frames * block_align as usize) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for n in 0..frames {
        let value = ((n as f32 * 0.1).sin() * 8_000.0) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}
