//! Config file loading and command-line overrides.

use std::path::Path;

use anyhow::{Context, Result};
use media_tap::TapConfig;
use media_tap_types::{AudioFormat, SampleType};

use crate::cli::{Args, SampleTypeArg};

const DEFAULT_RATE_HZ: u32 = 48_000;
const DEFAULT_CHANNELS: u16 = 2;

/// Load a [`TapConfig`] from TOML. Missing keys keep their defaults.
pub fn load(path: &Path) -> Result<TapConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
    parse(&raw).with_context(|| format!("parse config {:?}", path))
}

fn parse(raw: &str) -> Result<TapConfig> {
    Ok(toml::from_str::<TapConfig>(raw)?)
}

/// Resolve the effective config: file (if any), then flag overrides.
pub fn resolve(args: &Args) -> Result<TapConfig> {
    let mut cfg = match args.config.as_deref() {
        Some(path) => load(path)?,
        None => TapConfig::default(),
    };
    if let Some(v) = args.notify_capacity {
        cfg.notify_capacity = v;
    }
    if let Some(v) = args.queue_capacity {
        cfg.queue_capacity = v;
    }
    if let Some(v) = args.chunk_frames {
        cfg.chunk_frames = v;
    }
    Ok(cfg.normalized())
}

/// Requested decode format. `None` when no format flag was given; otherwise
/// unspecified parts fall back to 48 kHz, stereo, `f32`.
pub fn requested_format(
    rate: Option<u32>,
    channels: Option<u16>,
    sample_type: Option<SampleTypeArg>,
) -> Option<AudioFormat> {
    if rate.is_none() && channels.is_none() && sample_type.is_none() {
        return None;
    }
    Some(AudioFormat::new(
        rate.unwrap_or(DEFAULT_RATE_HZ),
        channels.unwrap_or(DEFAULT_CHANNELS),
        sample_type.map(SampleType::from).unwrap_or(SampleType::F32),
    ))
}
