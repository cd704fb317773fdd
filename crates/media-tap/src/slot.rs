//! Single-entry handoff slot between a production thread and a consumer thread.
//!
//! The producer installs buffers; each install schedules a [`Notification`] on a
//! bounded channel that the consumer drains on its own schedule. Flushes bump a
//! generation counter, so notifications queued before a flush are recognised as
//! stale when they are finally processed. Nothing here ever blocks:
//! - `install` / `flush` use `try_send` and record an overflow instead of waiting
//! - `take` only touches the mutex-protected state
//!
//! ## Overflow
//! When the channel is full the slot remembers a missed wake-up and/or a missed
//! flush. After a missed flush no further notifications are sent until the
//! consumer calls [`BufferSlot::take_missed`], which keeps flush-before-buffer
//! ordering intact.

use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::buffer::Buffer;

/// Wake-up sent from the producer side to the consumer side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// A buffer was installed under `generation` with the given sequence number.
    Buffer { generation: u64, sequence: u64 },
    /// The slot was flushed; `generation` is the generation after the flush.
    Flush { generation: u64 },
}

/// A buffer removed from the slot together with its stamps.
#[derive(Debug)]
pub struct SlotEntry {
    pub generation: u64,
    pub sequence: u64,
    pub buffer: Buffer,
}

/// Result of resolving a buffer notification against the slot.
#[derive(Debug)]
pub(crate) enum Take {
    Entry(SlotEntry),
    /// The notification predates the latest flush.
    Stale,
    /// The buffer was already taken through an earlier notification.
    Empty,
}

struct SlotInner {
    pending: Option<SlotEntry>,
    sequence: u64,
    generation: u64,
    missed_wake: bool,
    missed_flush: bool,
}

/// Holds at most one pending buffer plus its sequence/generation counters.
pub struct BufferSlot {
    inner: Mutex<SlotInner>,
    notify: Sender<Notification>,
}

impl BufferSlot {
    /// Create a slot and the receiving end of its notification channel.
    pub fn new(notify_capacity: usize) -> (Self, Receiver<Notification>) {
        let (notify, rx) = crossbeam_channel::bounded(notify_capacity.max(1));
        let slot = Self {
            inner: Mutex::new(SlotInner {
                pending: None,
                sequence: 0,
                generation: 0,
                missed_wake: false,
                missed_flush: false,
            }),
            notify,
        };
        (slot, rx)
    }

    /// Replace any pending buffer with `buffer` and schedule a notification.
    ///
    /// Returns `true` when an untaken buffer was overwritten.
    pub fn install(&self, buffer: Buffer) -> bool {
        let mut g = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        g.sequence += 1;
        let entry = SlotEntry {
            generation: g.generation,
            sequence: g.sequence,
            buffer,
        };
        let replaced = g.pending.replace(entry).is_some();
        let note = Notification::Buffer {
            generation: g.generation,
            sequence: g.sequence,
        };
        // Sent under the lock so buffer and flush notifications keep slot order.
        if g.missed_flush || !self.send(note) {
            g.missed_wake = true;
        }
        replaced
    }

    /// Drop the pending buffer, start a new generation and schedule a flush notification.
    ///
    /// Returns the new generation.
    pub fn flush(&self) -> u64 {
        let mut g = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        g.pending = None;
        g.generation += 1;
        g.missed_wake = false;
        let note = Notification::Flush {
            generation: g.generation,
        };
        if g.missed_flush || !self.send(note) {
            g.missed_flush = true;
        }
        g.generation
    }

    /// Remove the pending buffer if `note` is a buffer notification of the current generation.
    ///
    /// Flush notifications and stale buffer notifications yield `None`.
    pub fn take(&self, note: Notification) -> Option<SlotEntry> {
        match self.resolve(note) {
            Take::Entry(entry) => Some(entry),
            Take::Stale | Take::Empty => None,
        }
    }

    pub(crate) fn resolve(&self, note: Notification) -> Take {
        let Notification::Buffer { generation, .. } = note else {
            return Take::Empty;
        };
        let mut g = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        if generation != g.generation {
            return Take::Stale;
        }
        match g.pending.take() {
            Some(entry) => Take::Entry(entry),
            None => Take::Empty,
        }
    }

    /// Notifications that could not be queued because the channel was full.
    ///
    /// Call after draining the channel. A missed flush is replayed before a
    /// missed buffer wake-up; flushes collapse into one.
    pub fn take_missed(&self) -> Vec<Notification> {
        let mut g = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let mut out = Vec::new();
        if std::mem::take(&mut g.missed_flush) {
            out.push(Notification::Flush {
                generation: g.generation,
            });
        }
        if std::mem::take(&mut g.missed_wake) {
            if let Some(entry) = g.pending.as_ref() {
                out.push(Notification::Buffer {
                    generation: entry.generation,
                    sequence: entry.sequence,
                });
            }
        }
        out
    }

    /// Current generation (number of flushes so far).
    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|err| err.into_inner()).generation
    }

    /// Sequence number of the most recent install.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|err| err.into_inner()).sequence
    }

    /// Whether a buffer is waiting to be taken.
    pub fn has_pending(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .pending
            .is_some()
    }

    /// Queue `note`; `false` when the channel is full.
    ///
    /// A disconnected consumer counts as delivered: nobody is left to care.
    fn send(&self, note: Notification) -> bool {
        match self.notify.try_send(note) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => true,
            Err(TrySendError::Full(_)) => false,
        }
    }
}
