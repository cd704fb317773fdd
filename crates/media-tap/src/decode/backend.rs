//! Contract between a decode session and the backend that feeds it.
//!
//! Backends run on their own thread. Format, duration, buffers and end of
//! stream travel as [`BackendMessage`]s over one bounded channel whose
//! capacity is the session's backpressure. A failure goes over a separate
//! single-slot channel so the session sees it even while buffers are backed
//! up behind a full queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use media_tap_types::AudioFormat;

use crate::buffer::Buffer;
use crate::error::{DecodeError, TapError};

/// Messages a backend sends to its session.
#[derive(Debug)]
pub enum BackendMessage {
    /// The format buffers will be delivered in.
    Format(AudioFormat),
    /// Total duration, when the source knows it.
    Duration(Option<Duration>),
    Buffer(Buffer),
    EndOfStream,
}

/// Parameters of one decode run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeRequest {
    /// Requested output format; `None` lets the source decide.
    pub format: Option<AudioFormat>,
}

/// Sending half handed to a backend for one run.
///
/// `send` blocks while the session's queue is full; it returns `false` once
/// the run has been stopped, which is the backend's cue to exit.
#[derive(Clone)]
pub struct DecodeSink {
    tx: Sender<BackendMessage>,
    failure_tx: Sender<DecodeError>,
    cancel: Arc<AtomicBool>,
}

/// Session-side receivers for one run.
pub(crate) struct RunInbox {
    pub messages: Receiver<BackendMessage>,
    pub failure: Receiver<DecodeError>,
}

impl RunInbox {
    pub fn try_failure(&self) -> Option<DecodeError> {
        self.failure.try_recv().ok()
    }
}

impl DecodeSink {
    /// Create a sink and the session-side receivers.
    pub(crate) fn channel(capacity: usize, cancel: Arc<AtomicBool>) -> (Self, RunInbox) {
        let (tx, messages) = crossbeam_channel::bounded(capacity.max(1));
        let (failure_tx, failure) = crossbeam_channel::bounded(1);
        let sink = Self {
            tx,
            failure_tx,
            cancel,
        };
        (sink, RunInbox { messages, failure })
    }

    /// Whether the session has stopped this run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn send(&self, msg: BackendMessage) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.tx.send(msg).is_ok()
    }

    pub fn format(&self, format: AudioFormat) -> bool {
        self.send(BackendMessage::Format(format))
    }

    pub fn duration(&self, duration: Option<Duration>) -> bool {
        self.send(BackendMessage::Duration(duration))
    }

    pub fn buffer(&self, buffer: Buffer) -> bool {
        self.send(BackendMessage::Buffer(buffer))
    }

    pub fn end_of_stream(&self) -> bool {
        self.send(BackendMessage::EndOfStream)
    }

    /// Report a failure. Never blocks; only the first failure of a run is kept.
    pub fn error(&self, err: impl Into<DecodeError>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.failure_tx.try_send(err.into()).is_ok()
    }
}

/// A source-specific decoder owned by exactly one session.
pub trait DecodeBackend: Send {
    /// Begin producing for `request`. Must return promptly; the work happens
    /// on a backend-owned thread that reports through `sink`.
    fn start(&mut self, request: DecodeRequest, sink: DecodeSink) -> Result<(), TapError>;

    /// Cancel outstanding work. Must not block and must be idempotent.
    fn stop(&mut self);
}
