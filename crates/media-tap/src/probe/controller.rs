//! Consumer-thread side of a probe.
//!
//! A [`ProbeController`] binds to at most one source at a time, pumps the
//! bridge's notifications on the caller's thread, and republishes them as
//! [`ProbeEvent`]s. The source is referenced only by id; if it disappears the
//! controller detaches on its next `poll`.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use media_tap_types::{MediaKind, ProbeStats};

use crate::buffer::Buffer;
use crate::registry::{ProbeBackend, ProbeLease, SourceId, SourceRegistry};
use crate::slot::Notification;

/// Events delivered to the application.
#[derive(Debug)]
pub enum ProbeEvent {
    /// A buffer observed in the pipeline. The receiver owns it.
    BufferProbed(Buffer),
    /// Release every buffer received so far.
    Flush,
}

/// Observes buffers of one media kind flowing through a source.
pub struct ProbeController {
    kind: MediaKind,
    registry: Arc<dyn SourceRegistry>,
    binding: Option<ProbeLease>,
    events_tx: Sender<ProbeEvent>,
    events_rx: Receiver<ProbeEvent>,
}

impl ProbeController {
    pub fn new(kind: MediaKind, registry: Arc<dyn SourceRegistry>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            kind,
            registry,
            binding: None,
            events_tx,
            events_rx,
        }
    }

    /// Controller observing audio buffers.
    pub fn audio(registry: Arc<dyn SourceRegistry>) -> Self {
        Self::new(MediaKind::Audio, registry)
    }

    /// Controller observing video frames.
    pub fn video(registry: Arc<dyn SourceRegistry>) -> Self {
        Self::new(MediaKind::Video, registry)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Monitor `source`, or stop monitoring with `None`.
    ///
    /// Passing the current source is ignored and monitoring continues. Any
    /// other value detaches completely before the new attach is attempted.
    /// Returns `true` when `source` is `None` or a backend was obtained;
    /// `false` leaves the controller detached.
    pub fn set_source(&mut self, source: Option<SourceId>) -> bool {
        if source.is_some() && source == self.source() && self.is_active() {
            return true;
        }
        if source.is_none() && self.binding.is_none() {
            return true;
        }

        self.detach();

        let Some(source) = source else {
            return true;
        };
        match ProbeLease::acquire(self.registry.clone(), source, self.kind) {
            Some(lease) => {
                tracing::info!(source = %source, kind = ?self.kind, "probe attached");
                self.binding = Some(lease);
                true
            }
            None => {
                tracing::warn!(source = %source, kind = ?self.kind, "source does not support probing");
                false
            }
        }
    }

    /// Currently monitored source.
    pub fn source(&self) -> Option<SourceId> {
        self.binding.as_ref().map(ProbeLease::source)
    }

    /// `true` while attached to a backend whose source is alive, whether or
    /// not that source is producing anything.
    pub fn is_active(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|lease| self.registry.contains(lease.source()))
    }

    /// Backend currently held, if attached.
    pub fn backend(&self) -> Option<&ProbeBackend> {
        self.binding.as_ref().and_then(ProbeLease::backend)
    }

    /// Counters of the attached bridge.
    pub fn stats(&self) -> Option<ProbeStats> {
        self.backend().map(|backend| backend.bridge().stats())
    }

    /// Receiver for [`ProbeEvent`]s emitted by [`poll`](Self::poll).
    ///
    /// The channel is unbounded and each `BufferProbed` owns a whole buffer.
    /// The slot only keeps the latest buffer between polls; once an event is
    /// emitted it stays queued until read, so drain this receiver every time
    /// `poll` runs.
    pub fn events(&self) -> Receiver<ProbeEvent> {
        self.events_rx.clone()
    }

    /// Drain pending notifications and emit the resulting events.
    ///
    /// Call from the consumer thread (event-loop tick). Never blocks. Returns
    /// the number of events emitted.
    pub fn poll(&mut self) -> usize {
        let source = match self.binding.as_ref() {
            Some(lease) => lease.source(),
            None => return 0,
        };
        if !self.registry.contains(source) {
            tracing::info!(source = %source, "probe source destroyed; detaching");
            self.detach();
            return 0;
        }
        let Some(backend) = self.binding.as_ref().and_then(ProbeLease::backend) else {
            return 0;
        };

        let mut notes: Vec<Notification> = backend.notifications().try_iter().collect();
        notes.extend(backend.bridge().take_missed());

        let mut emitted = 0;
        for note in notes {
            let event = match note {
                Notification::Flush { .. } => Some(ProbeEvent::Flush),
                Notification::Buffer { .. } => backend
                    .bridge()
                    .take(note)
                    .map(|entry| ProbeEvent::BufferProbed(entry.buffer)),
            };
            if let Some(event) = event {
                if self.events_tx.send(event).is_ok() {
                    emitted += 1;
                }
            }
        }
        emitted
    }

    /// Stop forwarding, release the backend, then forget the source.
    fn detach(&mut self) {
        if let Some(lease) = self.binding.take() {
            let source = lease.source();
            drop(lease);
            tracing::info!(source = %source, kind = ?self.kind, "probe detached");
        }
    }
}

impl Drop for ProbeController {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Payload;
    use crate::registry::{MediaRegistry, PipelineCaps};
    use crate::testing::CountingRegistry;
    use media_tap_types::{PixelFormat, VideoFormat};
    use std::thread;
    use std::time::Duration;

    fn frame(ms: u64) -> Buffer {
        Buffer::new(
            Payload::Bytes(vec![1; 6]),
            VideoFormat::new(PixelFormat::Nv12, 2, 2),
            Duration::from_millis(ms),
        )
    }

    fn drain(rx: &Receiver<ProbeEvent>) -> Vec<ProbeEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn delivers_frames_and_flushes_in_order() {
        let registry = Arc::new(MediaRegistry::default());
        let pipeline = registry.register_pipeline("player", PipelineCaps::video());
        let mut probe = ProbeController::video(registry.clone());
        let events = probe.events();
        assert!(probe.set_source(Some(pipeline.id())));
        assert!(probe.is_active());

        pipeline.push(frame(1));
        assert_eq!(probe.poll(), 1);
        pipeline.push(frame(2));
        pipeline.flush();
        pipeline.push(frame(3));
        assert_eq!(probe.poll(), 2);

        let got = drain(&events);
        assert_eq!(got.len(), 3);
        assert!(matches!(&got[0], ProbeEvent::BufferProbed(b) if b.start_time() == Duration::from_millis(1)));
        assert!(matches!(got[1], ProbeEvent::Flush));
        assert!(matches!(&got[2], ProbeEvent::BufferProbed(b) if b.start_time() == Duration::from_millis(3)));
    }

    #[test]
    fn overflowed_flush_is_replayed_before_newer_frame() {
        let registry = Arc::new(MediaRegistry::new(crate::config::TapConfig {
            notify_capacity: 1,
            ..Default::default()
        }));
        let pipeline = registry.register_pipeline("player", PipelineCaps::video());
        let mut probe = ProbeController::video(registry.clone());
        let events = probe.events();
        assert!(probe.set_source(Some(pipeline.id())));

        pipeline.push(frame(1));
        pipeline.flush();
        pipeline.push(frame(2));
        assert_eq!(probe.poll(), 2);

        let got = drain(&events);
        assert_eq!(got.len(), 2);
        assert!(matches!(got[0], ProbeEvent::Flush));
        assert!(matches!(&got[1], ProbeEvent::BufferProbed(b) if b.start_time() == Duration::from_millis(2)));
        let stats = probe.stats().unwrap();
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.delivered, 1);

        pipeline.push(frame(3));
        assert_eq!(probe.poll(), 1);
        assert!(matches!(&drain(&events)[..], [ProbeEvent::BufferProbed(b)] if b.start_time() == Duration::from_millis(3)));
    }

    #[test]
    fn undrained_events_stay_queued_in_order() {
        let registry = Arc::new(MediaRegistry::default());
        let pipeline = registry.register_pipeline("player", PipelineCaps::video());
        let mut probe = ProbeController::video(registry.clone());
        let events = probe.events();
        assert!(probe.set_source(Some(pipeline.id())));

        for ms in 1..=3 {
            pipeline.push(frame(ms));
            assert_eq!(probe.poll(), 1);
        }
        let starts: Vec<u64> = drain(&events)
            .iter()
            .filter_map(|e| match e {
                ProbeEvent::BufferProbed(b) => Some(b.start_time().as_millis() as u64),
                ProbeEvent::Flush => None,
            })
            .collect();
        assert_eq!(starts, vec![1, 2, 3]);
    }

    #[test]
    fn same_source_twice_is_a_noop() {
        let registry = Arc::new(CountingRegistry::with_probe_sources(&[1]));
        let mut probe = ProbeController::video(registry.clone());
        let source = SourceId::from_raw(1);
        assert!(probe.set_source(Some(source)));
        let first = probe.backend().unwrap().bridge().clone();

        assert!(probe.set_source(Some(source)));
        assert!(probe.is_active());
        let second = probe.backend().unwrap().bridge().clone();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.requests(), 1);
        assert_eq!(registry.releases(), 0);
    }

    #[test]
    fn unsupported_source_returns_false_and_stays_detached() {
        let registry = Arc::new(MediaRegistry::default());
        let plain = registry.register_pipeline("file", PipelineCaps::none());
        let audio_only = registry.register_pipeline("mic", PipelineCaps::audio());
        let mut probe = ProbeController::video(registry.clone());
        assert!(!probe.set_source(Some(plain.id())));
        assert!(!probe.is_active());
        assert!(!probe.set_source(Some(audio_only.id())));
        assert!(!probe.is_active());
        assert!(probe.source().is_none());
    }

    #[test]
    fn failed_reassignment_releases_previous_source() {
        let registry = Arc::new(CountingRegistry::with_probe_sources(&[1]));
        let mut probe = ProbeController::video(registry.clone());
        assert!(probe.set_source(Some(SourceId::from_raw(1))));
        assert!(!probe.set_source(Some(SourceId::from_raw(2))));
        assert!(!probe.is_active());
        assert_eq!(registry.releases(), 1);
    }

    #[test]
    fn null_source_deactivates() {
        let registry = Arc::new(CountingRegistry::with_probe_sources(&[1]));
        let mut probe = ProbeController::video(registry.clone());
        assert!(probe.set_source(None));
        assert!(probe.set_source(Some(SourceId::from_raw(1))));
        assert!(probe.set_source(None));
        assert!(!probe.is_active());
        assert_eq!(registry.releases(), 1);
    }

    #[test]
    fn drop_releases_backend_exactly_once() {
        let registry = Arc::new(CountingRegistry::with_probe_sources(&[1]));
        {
            let mut probe = ProbeController::video(registry.clone());
            assert!(probe.set_source(Some(SourceId::from_raw(1))));
        }
        assert_eq!(registry.releases(), 1);
    }

    #[test]
    fn destroyed_source_detaches_without_release() {
        let registry = Arc::new(CountingRegistry::with_probe_sources(&[1]));
        let mut probe = ProbeController::video(registry.clone());
        assert!(probe.set_source(Some(SourceId::from_raw(1))));
        registry.destroy(SourceId::from_raw(1));
        assert!(!probe.is_active());
        assert_eq!(probe.poll(), 0);
        assert!(probe.source().is_none());
        drop(probe);
        assert_eq!(registry.releases(), 0);
    }

    #[test]
    fn dropped_pipeline_handle_detaches_probe() {
        let registry = Arc::new(MediaRegistry::default());
        let pipeline = registry.register_pipeline("cam", PipelineCaps::video());
        let mut probe = ProbeController::video(registry.clone());
        assert!(probe.set_source(Some(pipeline.id())));
        drop(pipeline);
        probe.poll();
        assert!(!probe.is_active());
        assert!(probe.source().is_none());
    }

    #[test]
    fn producer_thread_delivery_respects_flush() {
        let registry = Arc::new(MediaRegistry::new(crate::config::TapConfig {
            notify_capacity: 8,
            ..Default::default()
        }));
        let pipeline = registry.register_pipeline("cam", PipelineCaps::video());
        let mut probe = ProbeController::video(registry.clone());
        let events = probe.events();
        assert!(probe.set_source(Some(pipeline.id())));

        let producer = thread::spawn(move || {
            for n in 0..500u64 {
                if n == 250 {
                    pipeline.start_flushing();
                    pipeline.stop_flushing();
                }
                pipeline.push(frame(n));
            }
            pipeline
        });
        let mut seen = Vec::new();
        while !producer.is_finished() {
            probe.poll();
            seen.extend(drain(&events));
        }
        let pipeline = producer.join().unwrap();
        probe.poll();
        seen.extend(drain(&events));

        let flush_at = seen
            .iter()
            .position(|e| matches!(e, ProbeEvent::Flush))
            .expect("flush delivered");
        let mut last = None;
        for (idx, event) in seen.iter().enumerate() {
            if let ProbeEvent::BufferProbed(b) = event {
                let ms = b.start_time().as_millis() as u64;
                if idx > flush_at {
                    assert!(ms >= 250, "pre-flush frame {ms} delivered after flush");
                }
                if let Some(prev) = last {
                    assert!(ms > prev);
                }
                last = Some(ms);
            }
        }
        drop(pipeline);
    }
}
