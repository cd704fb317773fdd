//! Observe buffers flowing through live media pipelines and drive
//! asynchronous audio decode sessions.
//!
//! - [`probe`]: attach a [`ProbeController`] to a pipeline and receive its
//!   buffers on the consumer thread, with explicit flush signalling.
//! - [`decode`]: a [`DecodeSession`] yields decoded audio buffers from a file
//!   or stream through a bounded queue.
//! - [`registry`]: the [`SourceRegistry`] contract both sides are injected
//!   with, plus the bundled [`MediaRegistry`].

pub mod buffer;
pub mod config;
pub mod decode;
pub mod error;
pub mod probe;
pub mod registry;
pub mod resample;
pub mod slot;

#[cfg(test)]
mod testing;

pub use buffer::{Buffer, Payload};
pub use config::TapConfig;
pub use decode::{DecodeEvent, DecodeSession, DecodeSource, StreamHandle};
pub use error::{DecodeError, TapError};
pub use probe::{ProbeBridge, ProbeController, ProbeEvent};
pub use registry::{MediaRegistry, PipelineCaps, PipelineHandle, SourceId, SourceRegistry};
