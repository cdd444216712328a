//! Render thread and output sinks.
//!
//! The [`Speaker`] owns one render thread. Every block period it locks the
//! [`SessionSlot`], renders one block from the active session, releases the lock and hands
//! the block to the [`Sink`]. The sink is created on the render thread itself because a
//! CPAL stream cannot move between threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::PlaybackConfig;
use crate::error::{PlayerError, Result};
use crate::playback::map_channels;
use crate::session::{Completion, PlaybackSession, SessionSlot};
use crate::stream::Format;

/// Audio output consumed by the render thread.
pub trait Sink {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    /// Hand one interleaved block (with `channels` channels) to the device.
    ///
    /// May block until the device has room; that is what paces rendering.
    fn write(&mut self, block: &[f32], channels: usize) -> anyhow::Result<()>;

    /// Drop audio that was written but not yet played.
    fn clear(&mut self);

    /// Hold (or release) whatever is queued on the device; while held the device plays
    /// silence and nothing queued is consumed.
    fn set_paused(&mut self, paused: bool);
}

/// Builds the sink on the render thread.
pub type SinkFactory = Box<dyn FnOnce() -> anyhow::Result<Box<dyn Sink>> + Send>;

struct Shared {
    slot: Mutex<SessionSlot>,
    wake: Condvar,
    clear: AtomicBool,
    stop: AtomicBool,
}

pub struct Speaker {
    shared: Arc<Shared>,
    format: Format,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Speaker {
    /// Claim the output and start rendering.
    ///
    /// Fails with [`PlayerError::Device`] when the sink cannot be created.
    pub fn init(cfg: &PlaybackConfig, make_sink: SinkFactory) -> Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(SessionSlot::new(cfg.initial_volume)),
            wake: Condvar::new(),
            clear: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        });

        let (init_tx, init_rx) =
            crossbeam_channel::bounded::<std::result::Result<Format, String>>(1);
        let thread_shared = shared.clone();
        let buffer_ms = cfg.buffer_ms;
        let cfg = cfg.clone();
        let handle = thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || {
                let sink = match make_sink() {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = init_tx.send(Err(format!("{e:#}")));
                        return;
                    }
                };
                let format = Format::new(sink.sample_rate(), sink.channels());
                let _ = init_tx.send(Ok(format));
                let block_frames = cfg.block_frames(format.sample_rate);
                render_loop(&thread_shared, sink, block_frames, cfg.buffer_period());
            })
            .map_err(|e| PlayerError::Device(format!("spawn render thread: {e}")))?;

        let format = match init_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(msg)) => {
                let _ = handle.join();
                return Err(PlayerError::Device(msg));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(PlayerError::Device(
                    "render thread exited during init".to_string(),
                ));
            }
        };

        tracing::info!(
            rate_hz = format.sample_rate,
            channels = format.channels,
            buffer_ms,
            "speaker ready"
        );

        Ok(Self {
            shared,
            format,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Device rate and channel count.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Lock the slot. Hold it briefly: the render thread needs it once per block.
    pub fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.shared.slot.lock()
    }

    /// Run `f` on the slot and wake the render thread afterwards.
    pub fn with_slot<R>(&self, f: impl FnOnce(&mut SessionSlot) -> R) -> R {
        let r = f(&mut self.shared.slot.lock());
        self.shared.wake.notify_all();
        r
    }

    /// Install `session`, replacing whatever was playing.
    ///
    /// With `interrupt` the audio already handed to the device is discarded before the new
    /// session's first block; without it the previous tail plays out (gapless advance).
    pub fn play(&self, session: PlaybackSession, on_complete: Completion, interrupt: bool) {
        self.with_slot(|slot| {
            slot.install(session, on_complete);
            if interrupt {
                self.request_clear();
            }
        });
    }

    /// Pause the active session and hold the device output.
    ///
    /// Returns `false` when there is nothing left to pause (idle, or the session already
    /// rendered its last block).
    pub fn pause(&self) -> bool {
        self.with_slot(|slot| slot.pause())
    }

    pub fn resume(&self) -> bool {
        self.with_slot(|slot| slot.resume())
    }

    /// Abort whatever is queued on the device.
    pub fn clear(&self) {
        self.with_slot(|_| self.request_clear());
    }

    /// Rewind the active session and drop buffered audio from the old position.
    pub fn rewind(&self) -> Result<()> {
        self.with_slot(|slot| {
            slot.seek_to_start()?;
            self.request_clear();
            Ok(())
        })
    }

    fn request_clear(&self) {
        self.shared.clear.store(true, Ordering::Release);
    }

    /// Stop the render thread and release the device. Idempotent.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.with_slot(|slot| slot.close());
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("render thread panicked");
            }
        }
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_loop(shared: &Shared, mut sink: Box<dyn Sink>, block_frames: usize, period: Duration) {
    let device_channels = sink.channels();
    let mut buf: Vec<f32> = Vec::with_capacity(block_frames * device_channels);
    // The sink's pause state only changes here, between writes, so a write never waits on a
    // device that is being held.
    let mut sink_paused = false;

    while !shared.stop.load(Ordering::Acquire) {
        // The clear flag is taken under the slot lock so it always pairs with the first
        // block rendered after the change that set it.
        let (rendered, clear) = {
            let mut slot = shared.slot.lock();
            let paused = slot.is_paused();
            match slot.render(block_frames, &mut buf) {
                Some(r) => (r, shared.clear.swap(false, Ordering::AcqRel)),
                None => {
                    if shared.clear.swap(false, Ordering::AcqRel) {
                        sink.clear();
                    }
                    if paused != sink_paused {
                        sink.set_paused(paused);
                        sink_paused = paused;
                    }
                    shared.wake.wait_for(&mut slot, period);
                    continue;
                }
            }
        };

        if clear {
            sink.clear();
        }
        if sink_paused {
            sink.set_paused(false);
            sink_paused = false;
        }
        if rendered.frames > 0 {
            if let Err(e) = sink.write(&buf, rendered.channels) {
                tracing::warn!("output write failed: {e:#}");
                thread::sleep(period);
            }
        }
        if let Some(done) = rendered.completion {
            done();
        }
    }
    tracing::debug!("render thread exiting");
}

/// Samples captured by a [`MemorySink`].
#[derive(Clone, Default)]
pub struct MemoryCapture {
    inner: Arc<Mutex<CaptureInner>>,
}

#[derive(Default)]
struct CaptureInner {
    samples: Vec<f32>,
    frames: u64,
    writes: u64,
    clears: u64,
    paused: bool,
    pauses: u64,
}

impl MemoryCapture {
    /// Interleaved samples written so far, at the sink's channel count.
    pub fn samples(&self) -> Vec<f32> {
        self.inner.lock().samples.clone()
    }

    pub fn frames(&self) -> u64 {
        self.inner.lock().frames
    }

    pub fn writes(&self) -> u64 {
        self.inner.lock().writes
    }

    pub fn clears(&self) -> u64 {
        self.inner.lock().clears
    }

    /// Whether the sink is currently held.
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Times the sink has been held.
    pub fn pauses(&self) -> u64 {
        self.inner.lock().pauses
    }
}

/// Sink that records into memory instead of a device.
///
/// With pacing enabled each write sleeps for the block's duration, so the render thread runs
/// at real-time speed. Used by `--no-output` and tests.
pub struct MemorySink {
    rate: u32,
    channels: usize,
    pace: bool,
    keep_samples: bool,
    capture: MemoryCapture,
    mapped: Vec<f32>,
}

impl MemorySink {
    pub fn new(rate: u32, channels: usize) -> Self {
        Self {
            rate,
            channels: channels.max(1),
            pace: true,
            keep_samples: true,
            capture: MemoryCapture::default(),
            mapped: Vec::new(),
        }
    }

    pub fn paced(mut self, pace: bool) -> Self {
        self.pace = pace;
        self
    }

    /// Count frames only; don't retain sample data.
    pub fn discard_samples(mut self) -> Self {
        self.keep_samples = false;
        self
    }

    pub fn capture(&self) -> MemoryCapture {
        self.capture.clone()
    }
}

impl Sink for MemorySink {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn write(&mut self, block: &[f32], channels: usize) -> anyhow::Result<()> {
        let frames = block.len() / channels.max(1);
        {
            let mut c = self.capture.inner.lock();
            if self.keep_samples {
                self.mapped.clear();
                map_channels(block, channels, self.channels, &mut self.mapped);
                c.samples.extend_from_slice(&self.mapped);
            }
            c.frames += frames as u64;
            c.writes += 1;
        }
        if self.pace {
            thread::sleep(Format::new(self.rate, self.channels).duration_of(frames as u64));
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.capture.inner.lock().clears += 1;
    }

    fn set_paused(&mut self, paused: bool) {
        let mut c = self.capture.inner.lock();
        if paused && !c.paused {
            c.pauses += 1;
        }
        c.paused = paused;
    }
}
