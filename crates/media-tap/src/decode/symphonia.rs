//! Symphonia-backed decode backend for files and stream handles.
//!
//! Each run probes the source, decodes packets to interleaved `f32` on a
//! background thread, then shapes the samples into the negotiated format:
//! - channel remap (mono fan-out, down-mix to mono, truncate/zero-fill otherwise)
//! - sample-rate conversion through [`RateConverter`] when the rate differs
//! - sample type conversion (`F32` / `I16`)
//! - chunking into [`Buffer`]s of `chunk_frames` frames

use std::fs::File;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use ::symphonia::core::audio::SampleBuffer;
use ::symphonia::core::codecs::{CodecParameters, DecoderOptions};
use ::symphonia::core::errors::Error as SymphoniaError;
use ::symphonia::core::formats::FormatOptions;
use ::symphonia::core::io::{MediaSource, MediaSourceStream};
use ::symphonia::core::meta::MetadataOptions;
use ::symphonia::core::probe::Hint;
use media_tap_types::{AudioFormat, DecodeErrorCode, SampleType};

use crate::buffer::{Buffer, Payload};
use crate::config::TapConfig;
use crate::decode::backend::{DecodeBackend, DecodeRequest, DecodeSink};
use crate::decode::source::DecodeSource;
use crate::error::{DecodeError, TapError};
use crate::resample::RateConverter;

/// Decode backend built on symphonia's default codec and format registries.
pub struct SymphoniaBackend {
    source: DecodeSource,
    config: TapConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl SymphoniaBackend {
    pub fn new(source: DecodeSource, config: TapConfig) -> Self {
        Self {
            source,
            config: config.normalized(),
            cancel: None,
        }
    }
}

impl DecodeBackend for SymphoniaBackend {
    fn start(&mut self, request: DecodeRequest, sink: DecodeSink) -> Result<(), TapError> {
        self.stop();
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Some(cancel.clone());

        let source = self.source.clone();
        let chunk_frames = self.config.chunk_frames;
        thread::Builder::new()
            .name("media-tap-decode".to_string())
            .spawn(move || {
                let label = source.describe();
                tracing::debug!(source = %label, "decode thread started");
                let run = DecodeRun {
                    sink: &sink,
                    cancel: &cancel,
                    chunk_frames,
                };
                match run.execute(&source, request.format) {
                    Ok(true) => tracing::debug!(source = %label, "decode thread finished"),
                    Ok(false) => tracing::debug!(source = %label, "decode thread cancelled"),
                    Err(err) => {
                        tracing::warn!(source = %label, code = ?err.code, "decode failed: {}", err.message);
                        sink.error(err);
                    }
                }
            })
            .map_err(|e| {
                TapError::backend(DecodeErrorCode::Resource, format!("spawn decode thread: {e}"))
            })?;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::Release);
        }
    }
}

impl Drop for SymphoniaBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DecodeRun<'a> {
    sink: &'a DecodeSink,
    cancel: &'a AtomicBool,
    chunk_frames: usize,
}

impl DecodeRun<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire) || self.sink.is_cancelled()
    }

    /// Returns `Ok(false)` when the run was cancelled before end of stream.
    fn execute(&self, source: &DecodeSource, requested: Option<AudioFormat>) -> Result<bool, DecodeError> {
        let media = open_source(source)?;
        let mut hint = Hint::new();
        if let Some(ext) = source.extension_hint() {
            hint.with_extension(&ext);
        }

        let mss = MediaSourceStream::new(media, Default::default());
        let probed = ::symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| format_error(format!("probe: {e}")))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| format_error("no default audio track"))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let src_channels = codec_params
            .channels
            .ok_or_else(|| format_error("unknown channel layout"))?
            .count();
        let src_rate = codec_params
            .sample_rate
            .ok_or_else(|| format_error("unknown sample rate"))?;

        let native = AudioFormat::new(src_rate, src_channels as u16, SampleType::F32);
        let out_format = match requested {
            Some(format) if !format.is_valid() => {
                return Err(format_error(format!("unsupported output format {format:?}")));
            }
            Some(format) => format,
            None => native,
        };
        tracing::info!(
            codec = codec_name_from_params(&codec_params).unwrap_or("unknown"),
            src_rate,
            src_channels,
            out_rate = out_format.sample_rate,
            out_channels = out_format.channels,
            "decode stream opened"
        );

        let mut decoder = ::symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| format_error(format!("decoder: {e}")))?;

        if !self.sink.format(out_format) || !self.sink.duration(duration_from_codec_params(&codec_params)) {
            return Ok(false);
        }

        let mut stage = OutputStage::new(src_channels, src_rate, out_format, self.chunk_frames)?;
        loop {
            if self.cancelled() {
                return Ok(false);
            }
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(format_error(format!("read packet: {e}"))),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(format_error(format!("decode: {e}"))),
            };
            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            samples.copy_interleaved_ref(decoded);
            for buffer in stage.push(samples.samples())? {
                if !self.sink.buffer(buffer) {
                    return Ok(false);
                }
            }
        }

        for buffer in stage.finish()? {
            if !self.sink.buffer(buffer) {
                return Ok(false);
            }
        }
        Ok(self.sink.end_of_stream())
    }
}

fn open_source(source: &DecodeSource) -> Result<Box<dyn MediaSource>, DecodeError> {
    let opened = match source {
        DecodeSource::File(path) => File::open(path).map(|f| Box::new(f) as Box<dyn MediaSource>),
        DecodeSource::Device(handle) => handle.open(),
    };
    opened.map_err(|e| {
        let code = match e.kind() {
            io::ErrorKind::PermissionDenied => DecodeErrorCode::AccessDenied,
            _ => DecodeErrorCode::Resource,
        };
        DecodeError {
            code,
            message: format!("open {}: {e}", source.describe()),
        }
    })
}

fn format_error(message: impl Into<String>) -> DecodeError {
    DecodeError {
        code: DecodeErrorCode::Format,
        message: message.into(),
    }
}

/// Shapes decoded source samples into negotiated-format buffers.
struct OutputStage {
    src_channels: usize,
    format: AudioFormat,
    chunk_frames: usize,
    converter: Option<RateConverter>,
    pending: Vec<f32>,
    emitted_frames: u64,
}

impl OutputStage {
    fn new(
        src_channels: usize,
        src_rate: u32,
        format: AudioFormat,
        chunk_frames: usize,
    ) -> Result<Self, DecodeError> {
        let out_channels = format.channels as usize;
        let converter = if src_rate != format.sample_rate {
            let conv = RateConverter::new(src_rate, format.sample_rate, out_channels, chunk_frames)
                .map_err(|e| format_error(format!("{e:#}")))?;
            tracing::info!(from = src_rate, to = format.sample_rate, "resampling enabled");
            Some(conv)
        } else {
            None
        };
        Ok(Self {
            src_channels,
            format,
            chunk_frames: chunk_frames.max(1),
            converter,
            pending: Vec::new(),
            emitted_frames: 0,
        })
    }

    fn push(&mut self, interleaved: &[f32]) -> Result<Vec<Buffer>, DecodeError> {
        let remapped = remap_channels(interleaved, self.src_channels, self.format.channels as usize);
        let converted = match self.converter.as_mut() {
            Some(conv) => conv
                .process(&remapped)
                .map_err(|e| format_error(format!("{e:#}")))?,
            None => remapped,
        };
        self.pending.extend_from_slice(&converted);
        Ok(self.drain(false))
    }

    fn finish(&mut self) -> Result<Vec<Buffer>, DecodeError> {
        if let Some(conv) = self.converter.as_mut() {
            let tail = conv.finish().map_err(|e| format_error(format!("{e:#}")))?;
            self.pending.extend_from_slice(&tail);
        }
        Ok(self.drain(true))
    }

    fn drain(&mut self, include_partial: bool) -> Vec<Buffer> {
        let channels = self.format.channels as usize;
        let chunk_samples = self.chunk_frames * channels;
        let mut out = Vec::new();
        while self.pending.len() >= chunk_samples
            || (include_partial && self.pending.len() >= channels && channels > 0)
        {
            let take = chunk_samples.min(self.pending.len() - self.pending.len() % channels);
            let samples: Vec<f32> = self.pending.drain(..take).collect();
            let frames = (take / channels) as u64;
            let start = self.format.duration_of_frames(self.emitted_frames);
            self.emitted_frames += frames;
            out.push(Buffer::new(to_payload(samples, self.format.sample_type), self.format, start));
        }
        out
    }
}

/// Map interleaved samples from `from` channels to `to` channels.
fn remap_channels(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return input.to_vec();
    }
    let frames = input.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in input.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat_n(frame[0], to));
        } else if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for ch in 0..to {
                out.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }
    out
}

fn to_payload(samples: Vec<f32>, sample_type: SampleType) -> Payload {
    match sample_type {
        SampleType::F32 => Payload::F32(samples),
        SampleType::I16 => Payload::I16(
            samples
                .into_iter()
                .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
                .collect(),
        ),
    }
}

/// Duration from codec metadata, when the container provides frame count and rate.
fn duration_from_codec_params(codec_params: &CodecParameters) -> Option<Duration> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(Duration::from_millis(frames.saturating_mul(1000) / rate))
}

/// Codec label used in logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use ::symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}
