//! Bounded queue between the render thread and the device callback.
//!
//! The render thread pushes whole blocks (blocking while the queue is full, which paces
//! rendering to the device clock); the CPAL callback drains without ever blocking.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Thread-safe bounded queue for interleaved `f32` audio samples.
///
/// Samples are stored interleaved and the channel count is fixed for the lifetime of the
/// queue. A single [`Condvar`] signals every state change; the `done` flag lives under the
/// same mutex as the samples.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct SharedInner {
    queue: VecDeque<f32>,
    done: bool,
}

/// Queue capacity in samples for `(rate, channels, seconds)`.
///
/// Non-finite or non-positive `buffer_seconds` falls back to 2 seconds.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SharedAudio {
    /// `max_buffered_samples` is a cap in samples, not frames.
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.inner.lock().queue.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.inner.lock().done
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.inner.lock().done = true;
        self.cv.notify_all();
    }

    /// Drop everything buffered so the next pop sees fresh audio.
    pub fn clear(&self) {
        self.inner.lock().queue.clear();
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking while the queue is full.
    ///
    /// Returns early (dropping the remainder) if the queue is closed while waiting.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock();

            while g.queue.len() >= self.max_buffered_samples && !g.done {
                self.cv.wait(&mut g);
            }
            if g.done {
                return;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
    }

    /// Move up to `max_frames` whole frames into `out` without blocking.
    ///
    /// Returns the number of frames moved; `0` when the queue is currently empty.
    pub fn pop_up_to(&self, max_frames: usize, out: &mut Vec<f32>) -> usize {
        let mut g = self.inner.lock();
        let take_frames = (g.queue.len() / self.channels).min(max_frames);
        if take_frames == 0 {
            return 0;
        }
        out.extend(g.queue.drain(..take_frames * self.channels));
        drop(g);
        self.cv.notify_all();
        take_frames
    }
}
