//! Playback progress snapshots and the periodic reporter thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::transport::{TransportCell, TransportState};

/// Position of the active session, in device-rate frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Progress {
    pub position: u64,
    /// `0` when idle or unknown.
    pub length: u64,
    pub sample_rate: u32,
}

impl Progress {
    /// Fraction played, clamped to `0.0..=1.0`; `0.0` when the length is unknown.
    pub fn fraction(&self) -> f64 {
        if self.length == 0 {
            return 0.0;
        }
        (self.position as f64 / self.length as f64).clamp(0.0, 1.0)
    }

    pub fn elapsed(&self) -> String {
        format_time(self.position, self.sample_rate)
    }

    pub fn total(&self) -> String {
        format_time(self.length, self.sample_rate)
    }
}

/// `mm:ss` for a frame count.
pub fn format_time(frames: u64, sample_rate: u32) -> String {
    let secs = if sample_rate == 0 {
        0
    } else {
        frames / sample_rate as u64
    };
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub type ProgressCallback = Box<dyn Fn(&Progress) + Send>;

/// Registered progress callbacks.
#[derive(Clone, Default)]
pub struct Subscribers(Arc<Mutex<Vec<ProgressCallback>>>);

impl Subscribers {
    pub fn add(&self, callback: ProgressCallback) {
        self.0.lock().push(callback);
    }

    pub fn notify(&self, progress: &Progress) {
        for cb in self.0.lock().iter() {
            cb(progress);
        }
    }
}

/// Background thread that samples progress every interval while playing or paused.
///
/// Exits on its own once the transport reaches `Stopped`.
pub struct ProgressReporter {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl ProgressReporter {
    pub fn start<F>(
        interval: Duration,
        transport: TransportCell,
        sample: F,
        subscribers: Subscribers,
    ) -> std::io::Result<Self>
    where
        F: Fn() -> Option<Progress> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        let handle = thread::Builder::new()
            .name("progress".to_string())
            .spawn(move || {
                loop {
                    if stop_thread.load(Ordering::Relaxed) {
                        break;
                    }
                    if transport.load() == TransportState::Stopped {
                        break;
                    }
                    match sample() {
                        Some(p) => subscribers.notify(&p),
                        None => break,
                    }
                    thread::sleep(interval);
                }
                tracing::trace!("progress reporter exiting");
            })?;

        Ok(Self { stop, handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the thread to exit without waiting for it.
    ///
    /// Safe to call while holding locks that a subscriber callback might take.
    pub fn cancel(self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn format_time_renders_minutes_and_seconds() {
        assert_eq!(format_time(0, 44_100), "00:00");
        assert_eq!(format_time(44_100 * 75, 44_100), "01:15");
        assert_eq!(format_time(44_100 * 210 + 100, 44_100), "03:30");
        assert_eq!(format_time(1_000, 0), "00:00");
    }

    #[test]
    fn fraction_is_clamped_and_zero_for_unknown_length() {
        let p = Progress {
            position: 50,
            length: 0,
            sample_rate: 10,
        };
        assert_eq!(p.fraction(), 0.0);

        let p = Progress {
            position: 150,
            length: 100,
            sample_rate: 10,
        };
        assert_eq!(p.fraction(), 1.0);

        let p = Progress {
            position: 25,
            length: 100,
            sample_rate: 10,
        };
        assert_eq!(p.fraction(), 0.25);
        assert_eq!(p.elapsed(), "00:02");
        assert_eq!(p.total(), "00:10");
    }

    #[test]
    fn reporter_notifies_while_playing_and_exits_when_stopped() {
        let transport = TransportCell::default();
        transport.store(TransportState::Playing);
        let subs = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        subs.add(Box::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        let reporter = ProgressReporter::start(
            Duration::from_millis(5),
            transport.clone(),
            || Some(Progress::default()),
            subs,
        )
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(hits.load(Ordering::SeqCst) > 0);

        transport.store(TransportState::Stopped);
        thread::sleep(Duration::from_millis(30));
        assert!(reporter.is_finished());
        reporter.stop();
    }
}
