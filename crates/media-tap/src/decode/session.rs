//! Asynchronous decode session.
//!
//! A [`DecodeSession`] owns one source binding, a bounded queue of decoded
//! buffers and at most one running backend. Everything observable happens on
//! the consumer thread: `start`, `stop`, `read` and `poll` are the only places
//! that change state or emit [`DecodeEvent`]s.
//!
//! ## Lifecycle
//! - `Stopped` → `Decoding` on `start()` when a source is set.
//! - `Decoding` → `Stopped` on `stop()`, on a backend error, or once end of
//!   stream has been reported *and* every queued buffer has been read.
//!
//! Changing the source while decoding is recorded immediately but only used
//! by the next `start()`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use media_tap_types::{AudioFormat, DecodeEndReason, DecodeErrorCode, DecoderState, SessionStatus};

use crate::buffer::Buffer;
use crate::config::TapConfig;
use crate::decode::backend::{BackendMessage, DecodeBackend, DecodeRequest, DecodeSink, RunInbox};
use crate::decode::queue::BufferQueue;
use crate::decode::source::{DecodeSource, StreamHandle};
use crate::error::{DecodeError, TapError};
use crate::registry::SourceRegistry;

/// Events emitted by a [`DecodeSession`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecodeEvent {
    /// A decoded buffer was queued and can be `read()`.
    BufferReady,
    BufferAvailableChanged(bool),
    StateChanged(DecoderState),
    DurationChanged(Option<Duration>),
    PositionChanged(Duration),
    /// End of stream reached and every buffer has been read.
    Finished,
    Error(DecodeError),
}

struct ActiveRun {
    backend: Box<dyn DecodeBackend>,
    inbox: RunInbox,
    cancel: Arc<AtomicBool>,
    end_of_stream: bool,
}

/// Drives a decode backend and exposes its output as a pull-style queue.
pub struct DecodeSession {
    registry: Arc<dyn SourceRegistry>,
    config: TapConfig,
    state: DecoderState,
    source: Option<DecodeSource>,
    requested: Option<AudioFormat>,
    negotiated: Option<AudioFormat>,
    position: Duration,
    duration: Option<Duration>,
    buffer_available: bool,
    error: Option<DecodeError>,
    end_reason: Option<DecodeEndReason>,
    queue: BufferQueue,
    run: Option<ActiveRun>,
    events_tx: Sender<DecodeEvent>,
    events_rx: Receiver<DecodeEvent>,
}

impl DecodeSession {
    pub fn new(registry: Arc<dyn SourceRegistry>, config: TapConfig) -> Self {
        let config = config.normalized();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            registry,
            queue: BufferQueue::new(config.queue_capacity),
            config,
            state: DecoderState::Stopped,
            source: None,
            requested: None,
            negotiated: None,
            position: Duration::ZERO,
            duration: None,
            buffer_available: false,
            error: None,
            end_reason: None,
            run: None,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Decode from `path`; an empty path clears the source.
    ///
    /// Clears any stream device.
    pub fn set_source_filename(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let source = if path.as_os_str().is_empty() {
            None
        } else {
            Some(DecodeSource::File(path))
        };
        self.replace_source(source);
    }

    /// Decode from a stream device; `None` clears the source.
    ///
    /// Clears any filename.
    pub fn set_source_device(&mut self, device: Option<StreamHandle>) {
        self.replace_source(device.map(DecodeSource::Device));
    }

    pub fn source(&self) -> Option<&DecodeSource> {
        self.source.as_ref()
    }

    pub fn source_filename(&self) -> Option<&Path> {
        match &self.source {
            Some(DecodeSource::File(path)) => Some(path),
            _ => None,
        }
    }

    pub fn source_device(&self) -> Option<&StreamHandle> {
        match &self.source {
            Some(DecodeSource::Device(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Request an output format for the next run. Ignored while decoding;
    /// returns whether the request was recorded.
    pub fn set_audio_format(&mut self, format: Option<AudioFormat>) -> bool {
        if self.state == DecoderState::Decoding {
            tracing::debug!(?format, "audio format change ignored while decoding");
            return false;
        }
        self.requested = format;
        true
    }

    /// Negotiated format while decoding; otherwise the requested format,
    /// falling back to the last negotiated one.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        match self.state {
            DecoderState::Decoding => self.negotiated,
            DecoderState::Stopped => self.requested.or(self.negotiated),
        }
    }

    pub fn buffer_available(&self) -> bool {
        self.buffer_available
    }

    /// Start time of the most recently decoded buffer.
    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Last reported error; cleared by a successful `start()`.
    pub fn error(&self) -> Option<&DecodeError> {
        self.error.as_ref()
    }

    pub fn events(&self) -> Receiver<DecodeEvent> {
        self.events_rx.clone()
    }

    /// Begin decoding the current source. No-op while already decoding.
    pub fn start(&mut self) {
        if self.state == DecoderState::Decoding {
            return;
        }
        let Some(source) = self.source.clone() else {
            self.fail(TapError::NoSource);
            return;
        };

        let mut backend = match self.registry.request_decode_backend(&source) {
            Ok(backend) => backend,
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let (sink, inbox) = DecodeSink::channel(self.config.queue_capacity, cancel.clone());
        let request = DecodeRequest {
            format: self.requested,
        };
        if let Err(err) = backend.start(request, sink) {
            backend.stop();
            self.fail(err);
            return;
        }

        self.error = None;
        self.end_reason = None;
        self.negotiated = self.requested;
        self.set_position(Duration::ZERO);
        self.set_duration(None);
        self.run = Some(ActiveRun {
            backend,
            inbox,
            cancel,
            end_of_stream: false,
        });
        self.state = DecoderState::Decoding;
        tracing::info!(source = %source.describe(), format = ?self.requested, "decode started");
        self.emit(DecodeEvent::StateChanged(DecoderState::Decoding));
    }

    /// Cancel the running decode and drop queued buffers. Idempotent.
    pub fn stop(&mut self) {
        if self.state == DecoderState::Stopped {
            return;
        }
        self.teardown_run();
        self.queue.clear();
        self.set_available(false);
        self.end_reason = Some(DecodeEndReason::Stopped);
        self.enter_stopped();
        tracing::info!("decode stopped");
    }

    /// Take the oldest decoded buffer. Never blocks.
    pub fn read(&mut self) -> Option<Buffer> {
        let buffer = self.queue.pop()?;
        self.pump();
        self.set_available(!self.queue.is_empty());
        self.finish_if_drained();
        Some(buffer)
    }

    /// Process pending backend messages. Call from the consumer thread.
    ///
    /// Returns the number of backend messages handled.
    pub fn poll(&mut self) -> usize {
        let handled = self.pump();
        self.finish_if_drained();
        handled
    }

    /// Serializable snapshot of the session.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            source: self.source.as_ref().map(DecodeSource::describe),
            format: self.audio_format(),
            position_ms: self.position.as_millis() as u64,
            duration_ms: self.duration.map(|d| d.as_millis() as u64),
            queued_buffers: self.queue.len(),
            buffer_available: self.buffer_available,
            error: self.error.as_ref().map(|e| e.code),
            end_reason: self.end_reason,
        }
    }

    fn replace_source(&mut self, source: Option<DecodeSource>) {
        if self.source == source {
            return;
        }
        if self.state == DecoderState::Decoding {
            tracing::debug!("source changed while decoding; applies to the next start");
        }
        self.source = source;
    }

    /// Surface a backend failure at once, then pull messages while the
    /// queue has room.
    fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let Some(run) = self.run.as_ref() else {
                break;
            };
            if let Some(err) = run.inbox.try_failure() {
                self.fail(err);
                return handled + 1;
            }
            if run.end_of_stream || self.queue.is_full() {
                break;
            }
            match run.inbox.messages.try_recv() {
                Ok(msg) => {
                    handled += 1;
                    self.handle(msg);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // A failure may have landed after the check above.
                    match run.inbox.try_failure() {
                        Some(err) => self.fail(err),
                        None => self.fail(TapError::backend(
                            DecodeErrorCode::Resource,
                            "decode backend exited without end of stream",
                        )),
                    }
                    return handled + 1;
                }
            }
        }
        handled
    }

    fn handle(&mut self, msg: BackendMessage) {
        match msg {
            BackendMessage::Format(format) => {
                if self.negotiated.is_none() {
                    tracing::debug!(?format, "decode format negotiated");
                    self.negotiated = Some(format);
                }
            }
            BackendMessage::Duration(duration) => self.set_duration(duration),
            BackendMessage::Buffer(buffer) => {
                let start = buffer.start_time();
                if let Err(dropped) = self.queue.push(buffer) {
                    tracing::warn!(start = ?dropped.start_time(), "decode queue full; buffer dropped");
                    return;
                }
                self.set_position(start);
                self.set_available(true);
                self.emit(DecodeEvent::BufferReady);
            }
            BackendMessage::EndOfStream => {
                tracing::debug!(queued = self.queue.len(), "decode end of stream");
                if let Some(run) = self.run.as_mut() {
                    run.end_of_stream = true;
                }
            }
        }
    }

    fn finish_if_drained(&mut self) {
        let ended = self.run.as_ref().is_some_and(|run| run.end_of_stream);
        if !ended || !self.queue.is_empty() {
            return;
        }
        self.teardown_run();
        self.set_available(false);
        self.end_reason = Some(DecodeEndReason::Finished);
        self.enter_stopped();
        tracing::info!(position = ?self.position, "decode finished");
        self.emit(DecodeEvent::Finished);
    }

    fn fail(&mut self, err: impl Into<DecodeError>) {
        let err = err.into();
        tracing::warn!(code = ?err.code, "decode error: {}", err.message);
        self.teardown_run();
        self.queue.clear();
        self.set_available(false);
        self.end_reason = Some(DecodeEndReason::Error);
        self.enter_stopped();
        self.error = Some(err.clone());
        self.emit(DecodeEvent::Error(err));
    }

    fn teardown_run(&mut self) {
        if let Some(mut run) = self.run.take() {
            run.cancel.store(true, Ordering::Release);
            run.backend.stop();
        }
    }

    fn enter_stopped(&mut self) {
        if self.state != DecoderState::Stopped {
            self.state = DecoderState::Stopped;
            self.emit(DecodeEvent::StateChanged(DecoderState::Stopped));
        }
    }

    fn set_available(&mut self, available: bool) {
        if self.buffer_available != available {
            self.buffer_available = available;
            self.emit(DecodeEvent::BufferAvailableChanged(available));
        }
    }

    fn set_position(&mut self, position: Duration) {
        if self.position != position {
            self.position = position;
            self.emit(DecodeEvent::PositionChanged(position));
        }
    }

    fn set_duration(&mut self, duration: Option<Duration>) {
        if self.duration != duration {
            self.duration = duration;
            self.emit(DecodeEvent::DurationChanged(duration));
        }
    }

    fn emit(&self, event: DecodeEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.teardown_run();
    }
}
