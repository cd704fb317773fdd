//! Source registry: resolves logical sources to probe and decode backends.
//!
//! The registry is always injected into [`ProbeController`](crate::probe::ProbeController)
//! and [`DecodeSession`](crate::decode::DecodeSession); there is no process-wide
//! default. [`MediaRegistry`] is the bundled implementation:
//! - live pipelines register themselves and receive a [`PipelineHandle`]
//! - probes attach to pipelines by [`SourceId`]
//! - decode sources are served by the symphonia backend

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_channel::Receiver;
use media_tap_types::MediaKind;

use crate::buffer::Buffer;
use crate::config::TapConfig;
use crate::decode::backend::DecodeBackend;
use crate::decode::source::DecodeSource;
use crate::decode::symphonia::SymphoniaBackend;
use crate::error::TapError;
use crate::probe::ProbeBridge;
use crate::slot::Notification;

/// Non-owning identifier of a registered source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src:{}", self.0)
    }
}

/// Probe backend handed to a controller: the bridge the pipeline feeds plus
/// the consumer end of its notification channel.
pub struct ProbeBackend {
    bridge: Arc<ProbeBridge>,
    notifications: Receiver<Notification>,
}

impl ProbeBackend {
    pub fn new(kind: MediaKind, notify_capacity: usize) -> Self {
        let (bridge, notifications) = ProbeBridge::new(kind, notify_capacity);
        Self {
            bridge: Arc::new(bridge),
            notifications,
        }
    }

    /// Producer-side bridge; the pipeline keeps a clone of this.
    pub fn bridge(&self) -> &Arc<ProbeBridge> {
        &self.bridge
    }

    pub(crate) fn notifications(&self) -> &Receiver<Notification> {
        &self.notifications
    }
}

/// Contract between the tap core and whatever owns sources and backends.
pub trait SourceRegistry: Send + Sync {
    /// Obtain an exclusive probe backend for `source`, or `None` when the source
    /// is unknown or cannot be probed for `kind`. Called on the consumer thread.
    fn request_probe_backend(&self, source: SourceId, kind: MediaKind) -> Option<ProbeBackend>;

    /// Return a backend obtained from [`request_probe_backend`](Self::request_probe_backend).
    ///
    /// Must be idempotent and a no-op when the source is gone.
    fn release_probe_backend(&self, source: SourceId, backend: ProbeBackend);

    /// Whether `source` is still alive.
    fn contains(&self, source: SourceId) -> bool;

    /// Build a decode backend for `source`.
    fn request_decode_backend(
        &self,
        source: &DecodeSource,
    ) -> Result<Box<dyn DecodeBackend>, TapError>;
}

/// Scoped probe acquisition: the backend goes back to the registry exactly
/// once, when the lease is dropped, unless the source died first.
pub struct ProbeLease {
    registry: Arc<dyn SourceRegistry>,
    source: SourceId,
    backend: Option<ProbeBackend>,
}

impl ProbeLease {
    /// Request a backend and wrap it in a lease.
    pub fn acquire(
        registry: Arc<dyn SourceRegistry>,
        source: SourceId,
        kind: MediaKind,
    ) -> Option<Self> {
        let backend = registry.request_probe_backend(source, kind)?;
        Some(Self {
            registry,
            source,
            backend: Some(backend),
        })
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn backend(&self) -> Option<&ProbeBackend> {
        self.backend.as_ref()
    }
}

impl Drop for ProbeLease {
    fn drop(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        if self.registry.contains(self.source) {
            self.registry.release_probe_backend(self.source, backend);
        } else {
            tracing::debug!(source = %self.source, "source gone; probe release skipped");
        }
    }
}

/// Which media kinds a pipeline lets probes observe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineCaps {
    pub audio: bool,
    pub video: bool,
}

impl PipelineCaps {
    pub fn audio() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn video() -> Self {
        Self {
            audio: false,
            video: true,
        }
    }

    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }

    /// A source that exists but cannot be probed at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn supports(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

struct PipelineShared {
    id: SourceId,
    name: String,
    caps: PipelineCaps,
    taps: Mutex<Vec<Arc<ProbeBridge>>>,
}

impl PipelineShared {
    fn taps(&self) -> std::sync::MutexGuard<'_, Vec<Arc<ProbeBridge>>> {
        self.taps.lock().unwrap_or_else(|err| err.into_inner())
    }
}

struct RegistryInner {
    next_id: AtomicU64,
    pipelines: Mutex<HashMap<SourceId, Arc<PipelineShared>>>,
    config: TapConfig,
}

impl RegistryInner {
    fn pipeline(&self, id: SourceId) -> Option<Arc<PipelineShared>> {
        self.pipelines
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .get(&id)
            .cloned()
    }
}

/// Bundled [`SourceRegistry`]: live pipelines plus symphonia-backed decoding.
pub struct MediaRegistry {
    inner: Arc<RegistryInner>,
}

impl MediaRegistry {
    pub fn new(config: TapConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(1),
                pipelines: Mutex::new(HashMap::new()),
                config: config.normalized(),
            }),
        }
    }

    /// Register a live pipeline. The returned handle is its production side;
    /// dropping it destroys the source.
    pub fn register_pipeline(&self, name: impl Into<String>, caps: PipelineCaps) -> PipelineHandle {
        let id = SourceId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(PipelineShared {
            id,
            name: name.into(),
            caps,
            taps: Mutex::new(Vec::new()),
        });
        self.inner
            .pipelines
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(id, shared.clone());
        tracing::info!(source = %id, name = %shared.name, ?caps, "pipeline registered");
        PipelineHandle {
            shared,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live pipelines.
    pub fn len(&self) -> usize {
        self.inner
            .pipelines
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MediaRegistry {
    fn default() -> Self {
        Self::new(TapConfig::default())
    }
}

impl SourceRegistry for MediaRegistry {
    fn request_probe_backend(&self, source: SourceId, kind: MediaKind) -> Option<ProbeBackend> {
        let pipeline = self.inner.pipeline(source)?;
        if !pipeline.caps.supports(kind) {
            tracing::warn!(source = %source, ?kind, "pipeline does not support probing");
            return None;
        }
        let backend = ProbeBackend::new(kind, self.inner.config.notify_capacity);
        pipeline.taps().push(backend.bridge().clone());
        tracing::info!(source = %source, ?kind, "probe backend granted");
        Some(backend)
    }

    fn release_probe_backend(&self, source: SourceId, backend: ProbeBackend) {
        let Some(pipeline) = self.inner.pipeline(source) else {
            return;
        };
        let mut taps = pipeline.taps();
        let before = taps.len();
        taps.retain(|tap| !Arc::ptr_eq(tap, backend.bridge()));
        if taps.len() != before {
            tracing::info!(source = %source, "probe backend released");
        }
    }

    fn contains(&self, source: SourceId) -> bool {
        self.inner.pipeline(source).is_some()
    }

    fn request_decode_backend(
        &self,
        source: &DecodeSource,
    ) -> Result<Box<dyn DecodeBackend>, TapError> {
        Ok(Box::new(SymphoniaBackend::new(
            source.clone(),
            self.inner.config.clone(),
        )))
    }
}

/// Production side of a registered pipeline.
///
/// Move it to the streaming thread; every method is non-blocking apart from a
/// short lock on the tap list.
pub struct PipelineHandle {
    shared: Arc<PipelineShared>,
    registry: Weak<RegistryInner>,
}

impl PipelineHandle {
    pub fn id(&self) -> SourceId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether any probe is currently attached.
    pub fn has_taps(&self) -> bool {
        !self.shared.taps().is_empty()
    }

    /// Offer `buffer` to every attached probe of its media kind.
    ///
    /// Each probe receives its own copy; the last one takes the original.
    /// Returns the number of probes that were offered the buffer.
    pub fn push(&self, buffer: Buffer) -> usize {
        let kind = buffer.format().kind();
        // Bridges must not block: they are fed under the tap-list lock.
        let taps = self.shared.taps();
        let mut matching = taps.iter().filter(|tap| tap.kind() == kind).peekable();
        let mut offered = 0;
        while let Some(tap) = matching.next() {
            offered += 1;
            if matching.peek().is_none() {
                tap.buffer_probed(buffer);
                return offered;
            }
            tap.buffer_probed(buffer.clone());
        }
        offered
    }

    /// Open a flush window on every attached probe.
    pub fn start_flushing(&self) {
        for tap in self.shared.taps().iter() {
            tap.start_flushing();
        }
    }

    /// Close the flush window on every attached probe.
    pub fn stop_flushing(&self) {
        for tap in self.shared.taps().iter() {
            tap.stop_flushing();
        }
    }

    /// Tell every attached probe to drop what it holds (seek, reconfigure).
    pub fn flush(&self) {
        for tap in self.shared.taps().iter() {
            tap.flush();
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .pipelines
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .remove(&self.shared.id);
        }
        self.shared.taps().clear();
        tracing::info!(source = %self.shared.id, "pipeline destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Payload;
    use media_tap_types::{AudioFormat, PixelFormat, SampleType, VideoFormat};
    use std::time::Duration;

    fn frame() -> Buffer {
        Buffer::new(
            Payload::Bytes(vec![7; 6]),
            VideoFormat::new(PixelFormat::Nv12, 2, 2),
            Duration::ZERO,
        )
    }

    #[test]
    fn request_respects_pipeline_caps() {
        let registry = MediaRegistry::default();
        let audio_only = registry.register_pipeline("mic", PipelineCaps::audio());
        assert!(
            registry
                .request_probe_backend(audio_only.id(), MediaKind::Video)
                .is_none()
        );
        assert!(
            registry
                .request_probe_backend(audio_only.id(), MediaKind::Audio)
                .is_some()
        );
        assert!(
            registry
                .request_probe_backend(SourceId::from_raw(999), MediaKind::Audio)
                .is_none()
        );
    }

    #[test]
    fn push_fans_out_to_every_matching_tap() {
        let registry = MediaRegistry::default();
        let pipeline = registry.register_pipeline("cam", PipelineCaps::audio_video());
        let a = registry
            .request_probe_backend(pipeline.id(), MediaKind::Video)
            .unwrap();
        let b = registry
            .request_probe_backend(pipeline.id(), MediaKind::Video)
            .unwrap();
        let audio = registry
            .request_probe_backend(pipeline.id(), MediaKind::Audio)
            .unwrap();

        assert_eq!(pipeline.push(frame()), 2);
        assert!(a.notifications().try_recv().is_ok());
        assert!(b.notifications().try_recv().is_ok());
        assert!(audio.notifications().try_recv().is_err());

        let samples = Buffer::new(
            Payload::F32(vec![0.5; 2]),
            AudioFormat::new(8_000, 1, SampleType::F32),
            Duration::ZERO,
        );
        assert_eq!(pipeline.push(samples), 1);
        assert_eq!(pipeline.push(frame()), 2);
        let pushed = |backend: &ProbeBackend| {
            backend
                .notifications()
                .try_iter()
                .filter_map(|note| backend.bridge().take(note))
                .count()
        };
        assert_eq!(pushed(&a), 1);
        assert_eq!(pushed(&b), 1);
        assert_eq!(pushed(&audio), 1);
    }

    #[test]
    fn release_detaches_tap_and_is_idempotent() {
        let registry = MediaRegistry::default();
        let pipeline = registry.register_pipeline("cam", PipelineCaps::video());
        let backend = registry
            .request_probe_backend(pipeline.id(), MediaKind::Video)
            .unwrap();
        assert!(pipeline.has_taps());
        registry.release_probe_backend(pipeline.id(), backend);
        assert!(!pipeline.has_taps());
        assert_eq!(pipeline.push(frame()), 0);

        let other = ProbeBackend::new(MediaKind::Video, 4);
        registry.release_probe_backend(pipeline.id(), other);
        registry.release_probe_backend(SourceId::from_raw(42), ProbeBackend::new(MediaKind::Video, 4));
    }

    #[test]
    fn dropping_handle_destroys_source() {
        let registry = MediaRegistry::default();
        let pipeline = registry.register_pipeline("cam", PipelineCaps::video());
        let id = pipeline.id();
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);
        drop(pipeline);
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn lease_releases_on_drop_unless_source_is_gone() {
        let registry = Arc::new(MediaRegistry::default());
        let pipeline = registry.register_pipeline("cam", PipelineCaps::video());
        let lease = ProbeLease::acquire(registry.clone(), pipeline.id(), MediaKind::Video).unwrap();
        assert_eq!(lease.source(), pipeline.id());
        assert!(lease.backend().is_some());
        assert!(pipeline.has_taps());
        drop(lease);
        assert!(!pipeline.has_taps());

        let lease = ProbeLease::acquire(registry.clone(), pipeline.id(), MediaKind::Video).unwrap();
        drop(pipeline);
        drop(lease);
        assert!(registry.is_empty());
    }

    #[test]
    fn flush_reaches_every_tap() {
        let registry = MediaRegistry::default();
        let pipeline = registry.register_pipeline("cam", PipelineCaps::video());
        let backend = registry
            .request_probe_backend(pipeline.id(), MediaKind::Video)
            .unwrap();
        assert_eq!(pipeline.push(frame()), 1);
        pipeline.start_flushing();
        assert!(backend.bridge().is_flushing());
        assert_eq!(pipeline.push(frame()), 1);
        assert_eq!(backend.bridge().stats().discarded, 1);
        pipeline.stop_flushing();
        pipeline.flush();
        assert_eq!(backend.bridge().stats().flushes, 2);
    }
}
