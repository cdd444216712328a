use std::time::Duration;

/// Playback tuning parameters shared by decode/resample/render stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Sample rate the output device is initialized with.
    pub device_rate: u32,
    /// Render block (and device buffer) duration in milliseconds.
    pub buffer_ms: u32,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Cadence of progress updates.
    pub progress_interval: Duration,
    /// Volume applied to the first session (0..=120, 100 is unity gain).
    pub initial_volume: f64,
    /// Truncate every track to this many seconds when set.
    pub max_track_seconds: Option<u32>,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            device_rate: 44_100,
            buffer_ms: 100,
            chunk_frames: 1024,
            refill_max_frames: 4096,
            progress_interval: Duration::from_millis(200),
            initial_volume: 100.0,
            max_track_seconds: None,
        }
    }
}

impl PlaybackConfig {
    /// Frames rendered per pull at `rate_hz`.
    pub fn block_frames(&self, rate_hz: u32) -> usize {
        let frames = (rate_hz as u64).saturating_mul(self.buffer_ms.max(1) as u64) / 1000;
        (frames as usize).max(1)
    }

    /// Wall-clock duration of one render block.
    pub fn buffer_period(&self) -> Duration {
        Duration::from_millis(self.buffer_ms.max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_frames_follows_buffer_duration() {
        let cfg = PlaybackConfig::default();
        assert_eq!(cfg.block_frames(44_100), 4_410);
        assert_eq!(cfg.block_frames(48_000), 4_800);
    }

    #[test]
    fn block_frames_never_zero() {
        let cfg = PlaybackConfig {
            buffer_ms: 0,
            ..PlaybackConfig::default()
        };
        assert_eq!(cfg.block_frames(100), 1);
        assert_eq!(cfg.buffer_period(), Duration::from_millis(1));
    }
}
