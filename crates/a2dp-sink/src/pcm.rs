//! Bounded interleaved `f32` queue between the sink's `write` and the CPAL callback.
//!
//! Writers block while the queue is full, which paces them at the device's real-time
//! consumption rate. The callback side never blocks.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub(crate) struct PcmQueue {
    channels: usize,
    max_samples: usize,
    inner: Mutex<PcmInner>,
    cv: Condvar,
}

struct PcmInner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// Queue capacity in samples for `millis` of audio.
pub(crate) fn samples_for_millis(rate_hz: u32, channels: usize, millis: u32) -> usize {
    let frames = (u64::from(rate_hz) * u64::from(millis.max(1))).div_ceil(1000) as usize;
    frames.max(1).saturating_mul(channels.max(1))
}

impl PcmQueue {
    pub(crate) fn new(channels: usize, max_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            max_samples: max_samples.max(channels),
            inner: Mutex::new(PcmInner {
                samples: VecDeque::with_capacity(max_samples),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    pub(crate) fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    /// Wake blocked writers; later pushes are refused.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Queue all of `samples`, waiting for room as needed.
    ///
    /// Returns `false` if the queue was closed before everything was queued.
    pub(crate) fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        let mut g = self.lock();
        while offset < samples.len() {
            while g.samples.len() >= self.max_samples && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.closed {
                return false;
            }
            let room = self.max_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
        }
        true
    }

    /// Move up to `max_frames` whole frames into `out`; never waits.
    pub(crate) fn pop_into(&self, out: &mut Vec<f32>, max_frames: usize) -> usize {
        let mut g = self.lock();
        let frames = (g.samples.len() / self.channels).min(max_frames);
        out.extend(g.samples.drain(..frames * self.channels));
        drop(g);
        if frames > 0 {
            self.cv.notify_all();
        }
        frames
    }

    fn lock(&self) -> MutexGuard<'_, PcmInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
