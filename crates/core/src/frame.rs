//! Live frames and the single-slot register that holds the newest one.
//!
//! ```text
//!   ingest task ──publish()──►  LatestFrameRegister  ◄──snapshot()── session 1
//!                               [ Arc<Frame> | empty ] ◄──snapshot()── session 2
//!                                                      ◄──snapshot()── session N
//! ```
//!
//! The register is last-writer-wins: every publish replaces the held frame
//! and nothing is queued, so a slow reader skips frames instead of
//! accumulating them. Frames are immutable and shared behind an [`Arc`];
//! readers clone the pointer and release the lock before doing any I/O.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::time::Instant;

/// One opaque still image from the live feed (conventionally JPEG).
#[derive(Debug)]
pub struct Frame {
    payload: Bytes,
    sequence: u64,
    received_at: Instant,
}

impl Frame {
    pub fn new(sequence: u64, payload: Bytes) -> Self {
        Self {
            payload,
            sequence,
            received_at: Instant::now(),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Monotonic, starting at 1 for the first frame of a register.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Process-wide holder of the most recently ingested [`Frame`].
///
/// One writer (the ingest task), any number of readers. The lock is held
/// only for the pointer swap or pointer clone, never across a network
/// write, so readers cannot stall the writer and vice versa.
#[derive(Debug, Default)]
pub struct LatestFrameRegister {
    slot: RwLock<Option<Arc<Frame>>>,
}

impl LatestFrameRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame with `payload`, assigning the next sequence number.
    ///
    /// Empty payloads are dropped and do not advance the sequence; `None`
    /// is returned for them. The previous frame is released after the lock
    /// is dropped, once no session still holds it.
    pub fn publish(&self, payload: Bytes) -> Option<u64> {
        if payload.is_empty() {
            return None;
        }

        let mut slot = self.slot.write();
        let sequence = slot.as_ref().map_or(1, |f| f.sequence + 1);
        let previous = slot.replace(Arc::new(Frame::new(sequence, payload)));
        drop(slot);
        drop(previous);

        tracing::trace!(sequence, "frame published");
        Some(sequence)
    }

    /// The current frame, or `None` if nothing has been published yet.
    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.slot.read().clone()
    }

    /// Sequence number of the held frame (0 while empty).
    pub fn last_sequence(&self) -> u64 {
        self.slot.read().as_ref().map_or(0, |f| f.sequence)
    }
}
