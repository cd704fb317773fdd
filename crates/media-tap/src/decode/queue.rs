//! Bounded FIFO of decoded buffers owned by a decode session.
//!
//! The queue lives entirely on the consumer thread; cross-thread transport is
//! the backend channel. Capacity is what turns a slow reader into
//! backpressure: the session stops pulling backend messages while the queue
//! is full, the channel fills, and the backend thread blocks in its sink.

use std::collections::VecDeque;

use crate::buffer::Buffer;

/// FIFO of decoded buffers with a fixed capacity in **buffers**.
#[derive(Debug)]
pub struct BufferQueue {
    queue: VecDeque<Buffer>,
    capacity: usize,
}

impl BufferQueue {
    /// Create an empty queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    /// Append a buffer. Returns it back when the queue is already full.
    pub fn push(&mut self, buffer: Buffer) -> Result<(), Buffer> {
        if self.is_full() {
            return Err(buffer);
        }
        self.queue.push_back(buffer);
        Ok(())
    }

    /// Remove the oldest buffer.
    pub fn pop(&mut self) -> Option<Buffer> {
        self.queue.pop_front()
    }

    /// Drop everything. Returns how many buffers were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "decode queue cleared");
        }
        dropped
    }
}
