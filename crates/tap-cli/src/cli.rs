use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use media_tap_types::SampleType;

#[derive(Parser, Debug)]
#[command(name = "tap-cli", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML file with `notify_capacity`, `queue_capacity` and `chunk_frames`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Probe notification channel capacity (overrides the config file)
    #[arg(long, global = true)]
    pub notify_capacity: Option<usize>,

    /// Decoded buffers held by a session (overrides the config file)
    #[arg(long, global = true)]
    pub queue_capacity: Option<usize>,

    /// Frames per decoded buffer and resampler chunk (overrides the config file)
    #[arg(long, global = true)]
    pub chunk_frames: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode an audio file through a decode session and print a summary
    Decode {
        /// Path to the audio file
        path: PathBuf,

        /// Output sample rate in Hz
        #[arg(long)]
        rate: Option<u32>,

        /// Output channel count
        #[arg(long)]
        channels: Option<u16>,

        /// Output sample type
        #[arg(long, value_enum)]
        sample_type: Option<SampleTypeArg>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a synthetic video pipeline with a probe attached
    Tap {
        /// Frames to produce
        #[arg(long, default_value_t = 300)]
        frames: u64,

        /// Flush the pipeline every N frames (0 disables)
        #[arg(long, default_value_t = 100)]
        flush_every: u64,

        /// Delay between produced frames in milliseconds
        #[arg(long, default_value_t = 5)]
        interval_ms: u64,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SampleTypeArg {
    F32,
    I16,
}

impl From<SampleTypeArg> for SampleType {
    fn from(arg: SampleTypeArg) -> Self {
        match arg {
            SampleTypeArg::F32 => SampleType::F32,
            SampleTypeArg::I16 => SampleType::I16,
        }
    }
}
