//! Command runtimes.
//!
//! `decode` drives a [`DecodeSession`] over a file until it finishes; `tap`
//! feeds a synthetic video pipeline from a producer thread while a
//! [`ProbeController`] observes it on the calling thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use media_tap::{
    Buffer, DecodeEvent, DecodeSession, MediaRegistry, Payload, PipelineCaps, ProbeController,
    ProbeEvent, TapConfig,
};
use media_tap_types::{
    AudioFormat, DecoderState, PixelFormat, ProbeStats, SessionStatus, VideoFormat,
};
use serde::Serialize;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Clone, Debug)]
pub struct DecodeRunConfig {
    pub path: PathBuf,
    pub format: Option<AudioFormat>,
    pub tap: TapConfig,
}

/// Result of a `decode` run.
#[derive(Clone, Debug, Serialize)]
pub struct DecodeSummary {
    pub buffers: u64,
    pub frames: u64,
    pub status: SessionStatus,
}

/// Decode `cfg.path` to completion (or until `stop` is raised).
pub fn run_decode(cfg: DecodeRunConfig, stop: &AtomicBool) -> Result<DecodeSummary> {
    let registry = Arc::new(MediaRegistry::new(cfg.tap.clone()));
    let mut session = DecodeSession::new(registry, cfg.tap.clone());
    let events = session.events();
    session.set_source_filename(&cfg.path);
    session.set_audio_format(cfg.format);
    session.start();

    let mut buffers = 0u64;
    let mut frames = 0u64;
    let mut failure = None;
    loop {
        session.poll();
        while let Some(buffer) = session.read() {
            buffers += 1;
            frames += buffer.frame_count() as u64;
        }
        for event in events.try_iter() {
            match event {
                DecodeEvent::DurationChanged(Some(duration)) => {
                    tracing::info!(duration_ms = duration.as_millis() as u64, "duration known");
                }
                DecodeEvent::Error(err) => failure = Some(err),
                DecodeEvent::Finished => tracing::info!(buffers, frames, "decode finished"),
                _ => {}
            }
        }
        if session.state() == DecoderState::Stopped {
            break;
        }
        if stop.load(Ordering::Relaxed) {
            tracing::info!("decode interrupted");
            session.stop();
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    if let Some(err) = failure {
        bail!("decode {}: {err}", cfg.path.display());
    }
    Ok(DecodeSummary {
        buffers,
        frames,
        status: session.status(),
    })
}

#[derive(Clone, Debug)]
pub struct TapRunConfig {
    pub frames: u64,
    /// Flush every N produced frames; 0 disables.
    pub flush_every: u64,
    pub interval: Duration,
    pub tap: TapConfig,
}

/// Result of a `tap` run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TapSummary {
    pub produced: u64,
    pub delivered: u64,
    pub flushes_seen: u64,
    pub stats: Option<ProbeStats>,
}

/// Run a synthetic pipeline with a probe attached and report what it saw.
pub fn run_tap(cfg: TapRunConfig, stop: Arc<AtomicBool>) -> Result<TapSummary> {
    let registry = Arc::new(MediaRegistry::new(cfg.tap.clone()));
    let pipeline = registry.register_pipeline("synthetic-video", PipelineCaps::video());
    let mut probe = ProbeController::video(registry.clone());
    if !probe.set_source(Some(pipeline.id())) {
        bail!("pipeline {} refused the probe", pipeline.id());
    }
    let events = probe.events();

    let TapRunConfig {
        frames,
        flush_every,
        interval,
        ..
    } = cfg;
    let producer = thread::Builder::new()
        .name("tap-producer".to_string())
        .spawn(move || {
            let mut produced = 0u64;
            for n in 0..frames {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if flush_every > 0 && n > 0 && n % flush_every == 0 {
                    pipeline.start_flushing();
                    pipeline.stop_flushing();
                }
                pipeline.push(synthetic_frame(n, interval));
                produced += 1;
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
            }
            (pipeline, produced)
        })?;

    let mut summary = TapSummary::default();
    loop {
        let finished = producer.is_finished();
        probe.poll();
        for event in events.try_iter() {
            match event {
                ProbeEvent::BufferProbed(buffer) => {
                    summary.delivered += 1;
                    tracing::debug!(start_ms = buffer.start_time().as_millis() as u64, "frame");
                }
                ProbeEvent::Flush => {
                    summary.flushes_seen += 1;
                    tracing::info!(delivered = summary.delivered, "flush");
                }
            }
        }
        if finished {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let (pipeline, produced) = producer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))?;
    summary.produced = produced;
    summary.stats = probe.stats();
    drop(probe);
    drop(pipeline);
    Ok(summary)
}

/// Small NV12 frame whose luma encodes the frame number.
fn synthetic_frame(n: u64, interval: Duration) -> Buffer {
    let format = VideoFormat::new(PixelFormat::Nv12, 64, 48);
    let len = 64 * 48 * 3 / 2;
    let start = interval.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX));
    Buffer::new(Payload::Bytes(vec![(n % 256) as u8; len]), format, start)
}
