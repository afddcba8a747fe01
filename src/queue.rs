//! Sample hand-off between the driver callback and the writer
//!
//! The driver callback thread must never stall, so `push` is a non-blocking
//! send on an unbounded crossbeam channel. Depth beyond the soft watermark
//! is counted as an overflow but nothing is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

/// Default soft depth threshold, in chunks
pub const DEFAULT_WATERMARK: usize = 16;

/// One driver buffer of interleaved unsigned 8-bit I/Q bytes, as delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleChunk(Box<[u8]>);

impl SampleChunk {
    /// Copy a driver-owned buffer into an owned chunk.
    pub fn from_slice(buf: &[u8]) -> Self {
        Self(buf.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Complex samples in this chunk (two bytes per sample)
    pub fn sample_count(&self) -> usize {
        self.0.len() / 2
    }
}

impl From<Vec<u8>> for SampleChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

/// Strict FIFO queue, one producer and one consumer.
pub struct SampleQueue {
    tx: Sender<SampleChunk>,
    rx: Receiver<SampleChunk>,
    watermark: usize,
    overflows: AtomicU64,
}

impl SampleQueue {
    pub fn new(watermark: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            watermark,
            overflows: AtomicU64::new(0),
        }
    }

    /// Append a chunk. Never blocks and never drops.
    pub fn push(&self, chunk: SampleChunk) {
        // Both ends live in `self`, so the channel cannot be disconnected here.
        let _ = self.tx.send(chunk);

        if self.tx.len() > self.watermark {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove the head chunk, waiting at most `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<SampleChunk> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Chunks currently queued. May be stale by the time the caller reads it.
    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    /// Number of pushes that left the queue deeper than the watermark
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new(DEFAULT_WATERMARK)
    }
}
