//! Seekable, finite streams of interleaved `f32` samples.
//!
//! Every pipeline stage (decoder, rate adapter, gain, play-time limit) implements
//! [`SampleStream`], so stages compose by wrapping one another and the render thread only
//! ever sees the outermost stream.

use std::time::Duration;

use crate::error::{PlayerError, Result};

/// Native format of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Format {
    pub sample_rate: u32,
    pub channels: usize,
}

impl Format {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of frames covering `duration` at this rate.
    pub fn frames_for(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    /// Wall-clock duration of `frames` at this rate.
    pub fn duration_of(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// A pull-based audio stream.
///
/// Positions and lengths are counted in frames at [`SampleStream::format`]'s rate.
pub trait SampleStream: Send {
    fn format(&self) -> Format;

    /// Fill `out` with interleaved samples and return the number of frames written.
    ///
    /// Fewer frames than `out` can hold are returned only once the stream is exhausted;
    /// a closed or exhausted stream returns `0`.
    fn read(&mut self, out: &mut [f32]) -> usize;

    /// Reposition to `frame`.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Frames delivered since the start of the stream.
    fn position(&self) -> u64;

    /// Total frames, or `0` when the container does not say.
    fn len(&self) -> u64;

    /// Release the underlying source. Further reads return `0` and seeks fail.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

impl<S: SampleStream + ?Sized> SampleStream for Box<S> {
    fn format(&self) -> Format {
        (**self).format()
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        (**self).read(out)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        (**self).seek(frame)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// Ends the wrapped stream after `max_frames`.
///
/// Used for the per-song play-time cap: the truncated stream completes like any other.
pub struct Limit<S> {
    inner: S,
    max_frames: u64,
}

impl<S: SampleStream> Limit<S> {
    pub fn new(inner: S, max_frames: u64) -> Self {
        Self { inner, max_frames }
    }

    /// Cap `inner` at `max` wall-clock time.
    pub fn duration(inner: S, max: Duration) -> Self {
        let max_frames = inner.format().frames_for(max);
        Self::new(inner, max_frames)
    }
}

impl<S: SampleStream> SampleStream for Limit<S> {
    fn format(&self) -> Format {
        self.inner.format()
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        let channels = self.inner.format().channels.max(1);
        let remaining = self.max_frames.saturating_sub(self.inner.position());
        if remaining == 0 {
            return 0;
        }
        let want = (out.len() / channels).min(remaining as usize);
        self.inner.read(&mut out[..want * channels])
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if frame > self.max_frames {
            return Err(PlayerError::Seek(format!(
                "frame {frame} beyond play-time limit {}",
                self.max_frames
            )));
        }
        self.inner.seek(frame)
    }

    fn position(&self) -> u64 {
        self.inner.position().min(self.max_frames)
    }

    fn len(&self) -> u64 {
        match self.inner.len() {
            0 => self.max_frames,
            n => n.min(self.max_frames),
        }
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::VecStream;
    use super::*;

    #[test]
    fn format_converts_between_frames_and_time() {
        let f = Format::new(44_100, 2);
        assert_eq!(f.frames_for(Duration::from_secs(2)), 88_200);
        assert_eq!(f.duration_of(22_050), Duration::from_millis(500));
        assert_eq!(Format::new(0, 2).duration_of(10), Duration::ZERO);
    }

    #[test]
    fn limit_truncates_reads_and_length() {
        let inner = VecStream::constant(10, 1, 100, 0.5);
        let mut s = Limit::new(inner, 25);
        assert_eq!(s.len(), 25);

        let mut buf = vec![0.0; 20];
        assert_eq!(s.read(&mut buf), 20);
        assert_eq!(s.read(&mut buf), 5);
        assert_eq!(s.read(&mut buf), 0);
        assert_eq!(s.position(), 25);
    }

    #[test]
    fn limit_keeps_shorter_inner_length() {
        let inner = VecStream::constant(10, 2, 8, 0.5);
        let s = Limit::duration(inner, Duration::from_secs(60));
        assert_eq!(s.len(), 8);
    }

    #[test]
    fn limit_rejects_seek_past_cap_and_restarts() {
        let inner = VecStream::constant(10, 1, 100, 0.5);
        let mut s = Limit::new(inner, 10);
        let mut buf = vec![0.0; 10];
        assert_eq!(s.read(&mut buf), 10);
        assert!(s.seek(11).is_err());
        s.seek(0).unwrap();
        assert_eq!(s.position(), 0);
        assert_eq!(s.read(&mut buf), 10);
    }
}
