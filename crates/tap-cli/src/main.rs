//! tap-cli: demo CLI for buffer probes and decode sessions.
//!
//! ## Commands
//! - `decode`: decode a file through a `DecodeSession` and print a summary.
//! - `tap`: run a synthetic video pipeline on a producer thread with a probe
//!   attached, printing what the probe delivered.
//!
//! Ctrl-C stops either loop and still prints the summary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tap_cli::{cli, config, runtime};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,media_tap=info,tap_cli=info")
        }))
        .init();

    let tap = config::resolve(&args)?;
    tracing::debug!(?tap, "effective config");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed)) {
            tracing::warn!("ctrl-c handler not installed: {e}");
        }
    }

    match args.cmd {
        cli::Command::Decode {
            path,
            rate,
            channels,
            sample_type,
            json,
        } => {
            let summary = runtime::run_decode(
                runtime::DecodeRunConfig {
                    path: path.clone(),
                    format: config::requested_format(rate, channels, sample_type),
                    tap,
                },
                &stop,
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let status = &summary.status;
                println!("source:   {}", path.display());
                match status.format {
                    Some(f) => println!(
                        "format:   {} Hz, {} ch, {:?}",
                        f.sample_rate, f.channels, f.sample_type
                    ),
                    None => println!("format:   unknown"),
                }
                println!("buffers:  {}", summary.buffers);
                println!("frames:   {}", summary.frames);
                if let Some(ms) = status.duration_ms {
                    println!("duration: {ms} ms");
                }
                println!("ended:    {:?}", status.end_reason);
            }
        }
        cli::Command::Tap {
            frames,
            flush_every,
            interval_ms,
            json,
        } => {
            let summary = runtime::run_tap(
                runtime::TapRunConfig {
                    frames,
                    flush_every,
                    interval: Duration::from_millis(interval_ms),
                    tap,
                },
                stop,
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("produced:  {}", summary.produced);
                println!("delivered: {}", summary.delivered);
                println!("flushes:   {}", summary.flushes_seen);
                if let Some(stats) = summary.stats {
                    println!(
                        "bridge:    installed={} replaced={} discarded={} stale={}",
                        stats.installed, stats.replaced, stats.discarded, stats.stale
                    );
                }
            }
        }
    }

    Ok(())
}
