//! Bounded frame store shared between the capture path and the client.
//!
//! The buffer is the single shared-mutable resource between the two execution
//! contexts: the capture task is the sole writer ([`FrameBuffer::push`]) and
//! the client path is the sole drainer ([`FrameBuffer::drain`]). One internal
//! mutex guards all state, so no frame is ever partially visible.
//!
//! # Retention policy
//!
//! Two pieces of state are kept:
//!
//! - a **ring** of transient payload slots, bounded by `buffer_size`,
//!   modelling the driver's fixed capture ring. When the ring wraps, the
//!   oldest slot is invalidated: any frame still referencing it, drained or
//!   not, answers `DataUnavailable` from then on. An unbounded buffer keeps
//!   no ring at all (nothing ever evicts, so there is nothing to invalidate
//!   and no reason to hold payloads beyond their frame handles).
//! - a **pending** queue of arrivals since the last drain. This queue is what
//!   `drain` returns; an entry whose slot was already overwritten still drains
//!   (the frame was delivered; only its data is gone).
//!
//! With `protect_data = true`, payloads are pinned at capture time: slots are
//! non-transient, never enter the ring, and survive any amount of overflow.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::frame::{Frame, FrameMetadata, FrameSlot};

/// One arrival awaiting drain. The `Frame` wrapper is only materialized for
/// entries actually returned to the client.
struct PendingFrame {
    slot: Arc<FrameSlot>,
    metadata: FrameMetadata,
}

struct BufferInner {
    /// Ring capacity in frames; `None` means unbounded (no natural driver limit).
    capacity: Option<usize>,
    /// Live transient slots, oldest first.
    ring: VecDeque<Arc<FrameSlot>>,
    /// Arrivals since the last drain, oldest first.
    pending: VecDeque<PendingFrame>,
}

/// Thread-safe frame store with transient/protected retention.
pub struct FrameBuffer {
    inner: Mutex<BufferInner>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FrameBuffer {
    /// Creates a buffer with the given ring capacity (`None` = unbounded).
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                capacity,
                ring: VecDeque::new(),
                pending: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reconfigures the ring capacity for the next acquisition run.
    ///
    /// Shrinking evicts (and invalidates) the oldest slots immediately.
    pub fn configure(&self, capacity: Option<usize>) {
        let mut inner = self.lock();
        inner.capacity = capacity;
        if let Some(cap) = capacity {
            while inner.ring.len() > cap {
                if let Some(evicted) = inner.ring.pop_front() {
                    evicted.invalidate();
                }
            }
        }
    }

    /// Appends one captured payload.
    ///
    /// `transient = false` (protect-data mode) pins the payload for the life of
    /// the frame. Returns a frame handle for event dispatch.
    pub fn push(&self, data: Bytes, transient: bool, metadata: FrameMetadata) -> Frame {
        let slot = Arc::new(FrameSlot::new(data, transient));
        let mut inner = self.lock();

        // Only a bounded ring can ever invalidate a slot; tracking transient
        // slots in an unbounded buffer would just pin their payloads forever.
        if transient {
            if let Some(cap) = inner.capacity {
                while inner.ring.len() >= cap.max(1) {
                    if let Some(evicted) = inner.ring.pop_front() {
                        evicted.invalidate();
                    }
                }
                inner.ring.push_back(slot.clone());
            }
        }

        inner.pending.push_back(PendingFrame {
            slot: slot.clone(),
            metadata: metadata.clone(),
        });

        Frame::new(slot, metadata)
    }

    /// Returns and removes all frames accumulated since the previous drain,
    /// oldest first.
    ///
    /// With `max_count = Some(m)` and a backlog larger than `m`, only the `m`
    /// most recent frames are returned; the older arrivals are discarded
    /// without constructing their `Frame` wrappers at all.
    pub fn drain(&self, max_count: Option<usize>) -> Vec<Frame> {
        let mut inner = self.lock();
        let backlog = std::mem::take(&mut inner.pending);
        drop(inner);

        let skip = match max_count {
            Some(m) if backlog.len() > m => backlog.len() - m,
            _ => 0,
        };

        backlog
            .into_iter()
            .skip(skip)
            .map(|p| Frame::new(p.slot, p.metadata))
            .collect()
    }

    /// Number of frames awaiting drain.
    pub fn backlog(&self) -> usize {
        self.lock().pending.len()
    }
}
