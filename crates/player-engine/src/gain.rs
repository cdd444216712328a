//! Volume stage.
//!
//! Volume is a user-facing number on `0..=MAX_VOLUME`; gain grows exponentially with it so
//! that equal slider steps sound like equal loudness steps.

use crate::error::Result;
use crate::stream::{Format, SampleStream};

pub const MAX_VOLUME: f64 = 120.0;
/// Unity gain.
pub const NORMAL_VOLUME: f64 = 100.0;
/// Volume steps per doubling of amplitude.
pub const VOLUME_SCALE: f64 = 16.0;
const GAIN_BASE: f64 = 2.0;

/// Linear amplitude factor for `volume`. Volume `0` (or below) is silence.
pub fn gain_for_volume(volume: f64) -> f32 {
    if volume <= 0.0 {
        return 0.0;
    }
    GAIN_BASE.powf((volume - NORMAL_VOLUME) / VOLUME_SCALE) as f32
}

/// Clamp a requested volume into the accepted range.
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, MAX_VOLUME)
}

/// Applies a volume-derived gain to every sample of the wrapped stream.
pub struct Gain<S> {
    inner: S,
    volume: f64,
    gain: f32,
}

impl<S: SampleStream> Gain<S> {
    pub fn new(inner: S, volume: f64) -> Self {
        let volume = clamp_volume(volume);
        Self {
            inner,
            volume,
            gain: gain_for_volume(volume),
        }
    }

    /// Takes effect on the next read.
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = clamp_volume(volume);
        self.gain = gain_for_volume(self.volume);
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn is_silent(&self) -> bool {
        self.gain == 0.0
    }
}

impl<S: SampleStream> SampleStream for Gain<S> {
    fn format(&self) -> Format {
        self.inner.format()
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        let frames = self.inner.read(out);
        let n = frames * self.inner.format().channels;
        if self.is_silent() {
            out[..n].fill(0.0);
        } else if self.gain != 1.0 {
            for s in &mut out[..n] {
                *s *= self.gain;
            }
        }
        frames
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        self.inner.seek(frame)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn len(&self) -> u64 {
        self.inner.len()
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
    use super::*;
    use crate::stream::test_util::VecStream;

    #[test]
    fn gain_curve_matches_reference_points() {
        assert_eq!(gain_for_volume(100.0), 1.0);
        assert!((gain_for_volume(116.0) - 2.0).abs() < 1e-6);
        assert!((gain_for_volume(84.0) - 0.5).abs() < 1e-6);
        assert_eq!(gain_for_volume(0.0), 0.0);
        assert_eq!(gain_for_volume(-5.0), 0.0);
    }

    #[test]
    fn gain_never_decreases_across_the_volume_range() {
        let mut prev = gain_for_volume(0.0);
        assert_eq!(prev, 0.0);
        for v in 1..=120 {
            let g = gain_for_volume(v as f64);
            assert!(g > prev, "gain dropped at volume {v}: {g} after {prev}");
            prev = g;
        }
        // Half steps too.
        for step in 0..240 {
            let v = step as f64 * 0.5;
            assert!(gain_for_volume(v) <= gain_for_volume(v + 0.5));
        }
    }

    #[test]
    fn clamp_volume_bounds_input() {
        assert_eq!(clamp_volume(150.0), MAX_VOLUME);
        assert_eq!(clamp_volume(-1.0), 0.0);
        assert_eq!(clamp_volume(f64::NAN), 0.0);
        assert_eq!(clamp_volume(42.0), 42.0);
    }

    #[test]
    fn gain_scales_samples() {
        let mut g = Gain::new(VecStream::constant(10, 2, 4, 0.25), 116.0);
        let mut buf = vec![0.0; 8];
        assert_eq!(g.read(&mut buf), 4);
        assert!(buf.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn zero_volume_is_silent_but_advances() {
        let mut g = Gain::new(VecStream::constant(10, 1, 6, 0.9), 0.0);
        let mut buf = vec![1.0; 4];
        assert_eq!(g.read(&mut buf), 4);
        assert!(buf.iter().all(|s| *s == 0.0));
        assert_eq!(g.position(), 4);
    }

    #[test]
    fn volume_change_applies_to_next_read() {
        let mut g = Gain::new(VecStream::constant(10, 1, 8, 0.5), 100.0);
        let mut buf = vec![0.0; 4];
        g.read(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.5));

        g.set_volume(0.0);
        g.read(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.0));
        assert_eq!(g.volume(), 0.0);
    }
}
