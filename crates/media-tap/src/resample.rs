//! Sample-rate conversion used during format negotiation.
//!
//! Wraps Rubato's sinc resampler in a push-style converter: callers feed
//! interleaved `f32` in arbitrary amounts and get back whatever output the
//! completed input chunks produced. [`RateConverter::finish`] flushes the
//! partial tail at end of stream.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Streaming interleaved `f32` rate converter.
pub struct RateConverter {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    from_rate: u32,
    to_rate: u32,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl RateConverter {
    /// Build a converter from `from_rate` to `to_rate` for `channels`
    /// interleaved channels, consuming input in chunks of `chunk_frames`.
    pub fn new(from_rate: u32, to_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || channels == 0 {
            return Err(anyhow!(
                "invalid resampler setup: {from_rate} Hz -> {to_rate} Hz, {channels} channels"
            ));
        }
        let chunk_frames = chunk_frames.max(1);
        let ratio = to_rate as f64 / from_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler =
            Async::<f32>::new_sinc(ratio, 1.1, &params, chunk_frames, channels, FixedAsync::Input)
                .map_err(|e| anyhow!("resampler init: {e}"))?;

        let out_frames = (chunk_frames as f64 * ratio * 1.1).ceil() as usize + 64;
        Ok(Self {
            resampler: Box::new(resampler),
            channels,
            chunk_frames,
            from_rate,
            to_rate,
            pending: Vec::with_capacity(chunk_frames * channels),
            out: vec![0.0; out_frames * channels],
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Feed interleaved samples; returns converted samples for every full
    /// input chunk now available.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(interleaved);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut produced = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let input = &self.pending[consumed..consumed + chunk_samples];
            let n = run_chunk(
                self.resampler.as_mut(),
                input,
                self.channels,
                self.chunk_frames,
                &mut self.out,
                None,
            )?;
            produced.extend_from_slice(&self.out[..n * self.channels]);
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(produced)
    }

    /// Convert whatever partial chunk remains buffered.
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames == 0 {
            self.pending.clear();
            return Ok(Vec::new());
        }
        let tail = std::mem::take(&mut self.pending);
        let n = run_chunk(
            self.resampler.as_mut(),
            &tail[..tail_frames * self.channels],
            self.channels,
            tail_frames,
            &mut self.out,
            Some(tail_frames),
        )?;
        Ok(self.out[..n * self.channels].to_vec())
    }
}

fn run_chunk(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    channels: usize,
    frames: usize,
    out: &mut [f32],
    partial_len: Option<usize>,
) -> Result<usize> {
    let input_adapter = InterleavedSlice::new(input, channels, frames)
        .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
    let out_capacity_frames = out.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(out, channels, out_capacity_frames)
        .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;
    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };
    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| anyhow!("resampler process: {e}"))?;
    Ok(nbr_out)
}
