//! Production-thread side of a probe.
//!
//! A [`ProbeBridge`] is what a pipeline calls into from its streaming thread.
//! It never blocks beyond the slot's short critical section, and it offers a
//! flush window (`start_flushing` .. `stop_flushing`) during which every
//! incoming buffer is dropped on the floor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::Receiver;
use media_tap_types::{MediaKind, ProbeStats};

use crate::buffer::Buffer;
use crate::slot::{BufferSlot, Notification, SlotEntry, Take};

/// Adapts a pipeline's buffer callback into [`BufferSlot`] operations.
pub struct ProbeBridge {
    kind: MediaKind,
    flushing: AtomicBool,
    /// A buffer was installed since the last flush.
    probed: AtomicBool,
    slot: BufferSlot,
    installed: AtomicU64,
    replaced: AtomicU64,
    delivered: AtomicU64,
    discarded: AtomicU64,
    stale: AtomicU64,
    flushes: AtomicU64,
}

impl ProbeBridge {
    /// Create a bridge for `kind` buffers and the consumer end of its notifications.
    pub fn new(kind: MediaKind, notify_capacity: usize) -> (Self, Receiver<Notification>) {
        let (slot, rx) = BufferSlot::new(notify_capacity);
        let bridge = Self {
            kind,
            flushing: AtomicBool::new(false),
            probed: AtomicBool::new(false),
            slot,
            installed: AtomicU64::new(0),
            replaced: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        };
        (bridge, rx)
    }

    /// Media kind this bridge accepts.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Called by the pipeline for every produced buffer.
    ///
    /// Buffers arriving inside a flush window, or of the wrong media kind, are
    /// discarded. A buffer that races with `start_flushing` may still be
    /// installed; the flush notification that follows tells the consumer to drop it.
    pub fn buffer_probed(&self, buffer: Buffer) {
        if self.flushing.load(Ordering::Acquire) || buffer.format().kind() != self.kind {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.installed.fetch_add(1, Ordering::Relaxed);
        self.probed.store(true, Ordering::SeqCst);
        if self.slot.install(buffer) {
            self.replaced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Open a flush window and discard everything until
    /// [`stop_flushing`](Self::stop_flushing).
    ///
    /// The pending buffer is dropped and the consumer notified only when a
    /// buffer has been probed since the last flush; opening a window on an
    /// idle pipeline, or one that is already open, sends nothing.
    pub fn start_flushing(&self) {
        if self.flushing.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.probed.load(Ordering::SeqCst) {
            self.flush_slot();
        }
    }

    /// Close the flush window; buffers are accepted again.
    pub fn stop_flushing(&self) {
        self.flushing.store(false, Ordering::Release);
    }

    /// One-shot flush that does not leave a window open.
    pub fn flush(&self) {
        self.flush_slot();
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Resolve a notification on the consumer thread.
    ///
    /// Returns the buffer for a current buffer notification, `None` otherwise.
    pub(crate) fn take(&self, note: Notification) -> Option<SlotEntry> {
        match self.slot.resolve(note) {
            Take::Entry(entry) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Take::Stale => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(?note, "stale probe notification dropped");
                None
            }
            Take::Empty => None,
        }
    }

    /// Notifications lost to a full channel, in replay order.
    pub(crate) fn take_missed(&self) -> Vec<Notification> {
        self.slot.take_missed()
    }

    /// Snapshot of the bridge counters.
    pub fn stats(&self) -> ProbeStats {
        ProbeStats {
            installed: self.installed.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }

    fn flush_slot(&self) {
        self.probed.store(false, Ordering::SeqCst);
        let generation = self.slot.flush();
        self.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(generation, kind = ?self.kind, "probe flushed");
    }
}
