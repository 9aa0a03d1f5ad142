//! Fixed-capacity transmission ring shared by producers and delivery.
//!
//! Supports any number of concurrent read cursors and rejects writes that
//! would overrun the slowest live reader.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Errors emitted by the transmission buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The write would overwrite bytes a live cursor has not consumed yet.
    /// Nothing is dropped silently; the producer decides whether to retry,
    /// shed the message, or force the consumer's backlog onto disk first.
    #[error(
        "buffer overflow: {needed} byte write exceeds {free} free bytes (capacity {capacity})"
    )]
    Overflow {
        needed: usize,
        free: usize,
        capacity: usize,
    },
}

#[derive(Debug)]
struct CursorShared {
    /// Logical offset of the next unread byte. Stored atomically so the
    /// producer can compute backpressure without taking a cursor lock.
    offset: AtomicU64,
}

/// A reader's position in a [`TransmissionBuffer`].
///
/// Dropping the cursor deregisters it, releasing any backpressure it was
/// exerting. A cursor is only meaningful on the buffer that created it.
#[derive(Debug)]
pub struct BufferCursor {
    shared: Arc<CursorShared>,
}

impl BufferCursor {
    /// Logical offset of the next byte this cursor will read.
    pub fn offset(&self) -> u64 {
        self.shared.offset.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct RingState {
    storage: Box<[u8]>,
    /// Logical offset one past the newest committed byte. Monotonic; the
    /// physical slot is `offset % capacity`.
    tail: u64,
    cursors: Vec<Weak<CursorShared>>,
}

impl RingState {
    /// Smallest offset any live cursor still needs, pruning dead cursors
    /// along the way. `None` when no cursor is registered.
    fn min_live_offset(&mut self) -> Option<u64> {
        self.cursors.retain(|cursor| cursor.strong_count() > 0);
        self.cursors
            .iter()
            .filter_map(Weak::upgrade)
            .map(|cursor| cursor.offset.load(Ordering::Acquire))
            .min()
    }

    fn snapshot_from(&self, from: u64) -> Vec<u8> {
        let capacity = self.storage.len();
        // Writes never outrun a live cursor, so tail - from <= capacity.
        let len = (self.tail - from) as usize;
        let mut chunk = Vec::with_capacity(len);
        let start = (from % capacity as u64) as usize;
        let first = (capacity - start).min(len);
        chunk.extend_from_slice(&self.storage[start..start + first]);
        chunk.extend_from_slice(&self.storage[..len - first]);
        chunk
    }
}

/// Append-only byte ring with monotonically increasing logical offsets.
///
/// Writes are atomic: a slice is either committed whole or rejected whole
/// with [`BufferError::Overflow`]. Committed bytes stay in place until every
/// live cursor has moved past them, so a stalled reader exerts backpressure
/// instead of losing data.
#[derive(Debug)]
pub struct TransmissionBuffer {
    state: Mutex<RingState>,
}

impl TransmissionBuffer {
    /// Create a ring holding at most `capacity` unconsumed bytes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1); // Clamp to minimum 1
        Self {
            state: Mutex::new(RingState {
                storage: vec![0u8; capacity].into_boxed_slice(),
                tail: 0,
                cursors: Vec::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().storage.len()
    }

    /// Register a new reader at the current tail. The cursor observes only
    /// bytes committed after it was opened.
    pub fn open_cursor(&self) -> BufferCursor {
        let mut state = self.state.lock();
        let shared = Arc::new(CursorShared {
            offset: AtomicU64::new(state.tail),
        });
        state.cursors.push(Arc::downgrade(&shared));
        BufferCursor { shared }
    }

    /// Commit `bytes` to the ring, or reject the whole slice if it would
    /// overrun the slowest live reader.
    pub fn write(&self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let capacity = state.storage.len();
        let min = state.min_live_offset().unwrap_or(state.tail);
        let used = (state.tail - min) as usize;
        let free = capacity - used;
        if bytes.len() > free {
            return Err(BufferError::Overflow {
                needed: bytes.len(),
                free,
                capacity,
            });
        }

        let start = (state.tail % capacity as u64) as usize;
        let first = (capacity - start).min(bytes.len());
        state.storage[start..start + first].copy_from_slice(&bytes[..first]);
        if first < bytes.len() {
            let rest = bytes.len() - first;
            state.storage[..rest].copy_from_slice(&bytes[first..]);
        }
        state.tail += bytes.len() as u64;
        Ok(())
    }

    /// Stream every byte committed since `cursor` into `sink`, then advance
    /// the cursor past them.
    ///
    /// The cursor moves only after `sink` has accepted and flushed the whole
    /// chunk; on error it stays put and the bytes remain pending. Callers
    /// serialize `read_into` per cursor (the queue's paging lock does this),
    /// otherwise the same bytes could be streamed twice.
    pub fn read_into(&self, cursor: &BufferCursor, sink: &mut dyn Write) -> io::Result<u64> {
        let (chunk, tail) = {
            let state = self.state.lock();
            let from = cursor.shared.offset.load(Ordering::Acquire);
            (state.snapshot_from(from), state.tail)
        };
        if chunk.is_empty() {
            return Ok(0);
        }

        sink.write_all(&chunk)?;
        sink.flush()?;
        cursor.shared.offset.store(tail, Ordering::Release);
        Ok(chunk.len() as u64)
    }

    /// Bytes committed but not yet consumed through `cursor`.
    pub fn pending(&self, cursor: &BufferCursor) -> u64 {
        let state = self.state.lock();
        state.tail - cursor.shared.offset.load(Ordering::Acquire)
    }
}
