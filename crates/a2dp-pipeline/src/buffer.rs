//! Flow-controlled byte buffer between the radio data path and the output writer.
//!
//! The producer (payload delivery) never blocks: a payload is either queued whole or
//! discarded. The consumer (output writer) drains with a timeout and parks on the
//! resume signal while the buffer refills.
//!
//! Mode transitions:
//! - `Processing → Dropping`: an append would exceed capacity.
//! - `Dropping → Processing`: an append observes occupancy at or below the low watermark
//!   (that payload is still discarded).
//! - `* → Prefetching`: a drain times out on an empty buffer.
//! - `Prefetching → Processing`: an append lifts occupancy to the high watermark; this
//!   wakes the writer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use a2dp_sink_types::BufferMode;

use crate::config::PipelineConfig;

/// Bounded byte queue with three-mode admission control.
///
/// Occupancy and mode live under one mutex so enqueue, dequeue and the mode checks
/// that depend on occupancy are atomic with respect to each other.
pub struct StreamBuffer {
    inner: Mutex<BufferInner>,
    cv: Condvar,
    capacity: usize,
    low_watermark: usize,
    high_watermark: usize,
}

struct BufferInner {
    queue: VecDeque<u8>,
    mode: BufferMode,
    closed: bool,
    stats: BufferStats,
}

/// Counters describing how often flow control kicked in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub appended_bytes: u64,
    pub dropped_payloads: u64,
    pub dropped_bytes: u64,
    pub overflows: u64,
    pub underruns: u64,
}

impl StreamBuffer {
    /// Create an empty buffer in `Processing` mode.
    ///
    /// Callers are expected to have validated `low_watermark < capacity` and
    /// `high_watermark < capacity` (see [`PipelineConfig::validate`]).
    pub fn new(capacity: usize, low_watermark: usize, high_watermark: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                queue: VecDeque::with_capacity(capacity),
                mode: BufferMode::Processing,
                closed: false,
                stats: BufferStats::default(),
            }),
            cv: Condvar::new(),
            capacity,
            low_watermark,
            high_watermark,
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(
            cfg.capacity_bytes,
            cfg.low_watermark_bytes,
            cfg.high_watermark_bytes,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered bytes (snapshot).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mode(&self) -> BufferMode {
        self.lock().mode
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the buffer and wake every waiter.
    ///
    /// Appends are refused afterwards and blocked drains/resume waits return
    /// immediately. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Offer a payload. Never blocks.
    ///
    /// Returns the number of bytes accepted: `data.len()` when queued, `0` when the
    /// payload was discarded (Dropping mode, overflow, or closed buffer).
    pub fn append(&self, data: &[u8]) -> usize {
        let mut g = self.lock();
        if g.closed || data.is_empty() {
            return 0;
        }

        if g.mode == BufferMode::Dropping {
            g.stats.dropped_payloads += 1;
            g.stats.dropped_bytes += data.len() as u64;
            tracing::debug!(bytes = data.len(), "buffer full, payload dropped");
            if g.queue.len() <= self.low_watermark {
                g.mode = BufferMode::Processing;
                tracing::info!(
                    buffered = g.queue.len(),
                    dropped_payloads = g.stats.dropped_payloads,
                    "buffer drained below low watermark; mode processing"
                );
            }
            return 0;
        }

        if g.queue.len() + data.len() > self.capacity {
            let was_prefetching = g.mode == BufferMode::Prefetching;
            g.mode = BufferMode::Dropping;
            g.stats.overflows += 1;
            g.stats.dropped_payloads += 1;
            g.stats.dropped_bytes += data.len() as u64;
            tracing::warn!(
                buffered = g.queue.len(),
                offered = data.len(),
                capacity = self.capacity,
                "buffer overflow; mode dropping"
            );
            drop(g);
            if was_prefetching {
                // A full buffer is as good a cushion as the watermark.
                self.cv.notify_all();
            }
            return 0;
        }

        g.queue.extend(data.iter().copied());
        g.stats.appended_bytes += data.len() as u64;

        if g.mode == BufferMode::Prefetching && g.queue.len() >= self.high_watermark {
            g.mode = BufferMode::Processing;
            tracing::info!(
                buffered = g.queue.len(),
                "buffer refilled to high watermark; mode processing"
            );
            drop(g);
            self.cv.notify_all();
        }
        data.len()
    }

    /// Move up to `out.len()` bytes into `out`, waiting up to `timeout` for data.
    ///
    /// Returns `0` on timeout (or when closed and empty). A timeout is the underrun
    /// signal and switches the buffer to `Prefetching`.
    pub fn drain_into(&self, out: &mut [u8], timeout: Duration) -> usize {
        if out.is_empty() {
            return 0;
        }
        let g = self.lock();
        let (mut g, _timeout) = self
            .cv
            .wait_timeout_while(g, timeout, |inner| inner.queue.is_empty() && !inner.closed)
            .unwrap_or_else(PoisonError::into_inner);

        if g.queue.is_empty() {
            if !g.closed && g.mode != BufferMode::Prefetching {
                g.mode = BufferMode::Prefetching;
                g.stats.underruns += 1;
                tracing::info!("buffer underflow; mode prefetching");
            }
            return 0;
        }

        let take = g.queue.len().min(out.len());
        for (dst, src) in out.iter_mut().zip(g.queue.drain(..take)) {
            *dst = src;
        }
        take
    }

    /// Block while the buffer is prefetching.
    ///
    /// Returns `false` once the buffer has been closed, `true` when the consumer may
    /// resume draining.
    pub fn wait_resume(&self) -> bool {
        let g = self.lock();
        let g = self
            .cv
            .wait_while(g, |inner| {
                inner.mode == BufferMode::Prefetching && !inner.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        !g.closed
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
