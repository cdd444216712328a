//! CPAL output sink.
//!
//! Builds the CPAL output stream and provides the real-time audio callback.
//! The callback:
//! - plays silence without touching the queue while the sink is paused
//! - refills a small local buffer from the shared queue without blocking
//! - converts `f32` samples to the device sample format
//! - fills silence on underrun

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::device::{pick_buffer_size, pick_output_config};
use crate::queue::{SharedAudio, calc_max_buffered_samples};
use crate::speaker::Sink;

/// Underrun counters updated by the callback.
#[derive(Clone, Debug, Default)]
pub struct OutputStats {
    pub played_frames: Arc<AtomicU64>,
    pub underrun_frames: Arc<AtomicU64>,
    pub underrun_events: Arc<AtomicU64>,
}

/// A claimed output device.
///
/// `write` maps the block to the device channel layout and blocks while the device queue
/// is full, which paces the render thread to the hardware clock.
pub struct CpalSink {
    queue: Arc<SharedAudio>,
    _stream: cpal::Stream,
    rate: u32,
    channels: usize,
    mapped: Vec<f32>,
    paused: Arc<AtomicBool>,
    stats: OutputStats,
}

impl CpalSink {
    /// Open `device` at (or near) `cfg.device_rate` and start the stream.
    pub fn open(device: &cpal::Device, cfg: &PlaybackConfig) -> Result<Self> {
        let supported = pick_output_config(device, cfg.device_rate)?;
        let rate = supported.sample_rate();
        let block_frames = cfg.block_frames(rate);
        let mut config: cpal::StreamConfig = supported.config();
        if let Some(size) = pick_buffer_size(&supported, block_frames as u32) {
            config.buffer_size = size;
        }
        let channels = config.channels as usize;

        // Two render blocks in flight.
        let buffer_seconds = 2.0 * cfg.buffer_ms.max(1) as f32 / 1000.0;
        let queue = Arc::new(SharedAudio::new(
            channels,
            calc_max_buffered_samples(rate, channels, buffer_seconds),
        ));
        let stats = OutputStats::default();
        let paused = Arc::new(AtomicBool::new(false));
        let stream = build_output_stream(
            device,
            &config,
            supported.sample_format(),
            &queue,
            cfg.refill_max_frames,
            paused.clone(),
            stats.clone(),
        )?;
        stream.play().context("start output stream")?;

        tracing::info!(
            device = %device.description().map(|d| d.name().to_string()).unwrap_or_default(),
            rate_hz = rate,
            channels,
            format = ?supported.sample_format(),
            buffer = ?config.buffer_size,
            "output opened"
        );

        Ok(Self {
            queue,
            _stream: stream,
            rate,
            channels,
            mapped: Vec::new(),
            paused,
            stats,
        })
    }
}

impl Sink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn write(&mut self, block: &[f32], channels: usize) -> Result<()> {
        if self.queue.is_done() {
            return Err(anyhow!("output stream closed"));
        }
        self.mapped.clear();
        map_channels(block, channels, self.channels, &mut self.mapped);
        self.queue.push_interleaved_blocking(&self.mapped);
        Ok(())
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
        tracing::debug!(paused, queued_frames = self.queue.len_frames(), "output hold");
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.queue.close();
        tracing::debug!(
            played = self.stats.played_frames.load(Ordering::Relaxed),
            underrun_frames = self.stats.underrun_frames.load(Ordering::Relaxed),
            underrun_events = self.stats.underrun_events.load(Ordering::Relaxed),
            "output closed"
        );
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    refill_max_frames: usize,
    paused: Arc<AtomicBool>,
    stats: OutputStats,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(device, config, queue, refill_max_frames, paused, stats)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(device, config, queue, refill_max_frames, paused, stats)
        }
        cpal::SampleFormat::I32 => {
            build_stream::<i32>(device, config, queue, refill_max_frames, paused, stats)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(device, config, queue, refill_max_frames, paused, stats)
        }
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder. The callback drains `queue` in bursts of up to
/// `refill_max_frames` and never waits on it.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    refill_max_frames: usize,
    paused: Arc<AtomicBool>,
    stats: OutputStats,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let refill_max_frames = refill_max_frames.max(1);
    let queue_cb = queue.clone();
    let mut src: Vec<f32> = Vec::new();
    let mut pos = 0usize;

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if paused.load(Ordering::Relaxed) {
                data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                return;
            }

            let frames = data.len() / channels_out;
            let mut filled_frames = 0usize;

            for frame in 0..frames {
                if pos >= src.len() {
                    pos = 0;
                    src.clear();
                    if queue_cb.pop_up_to(refill_max_frames, &mut src) == 0 {
                        stats.underrun_events.fetch_add(1, Ordering::Relaxed);
                        stats
                            .underrun_frames
                            .fetch_add((frames - frame) as u64, Ordering::Relaxed);
                        data[frame * channels_out..]
                            .fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                        break;
                    }
                }
                let out = &mut data[frame * channels_out..(frame + 1) * channels_out];
                for (dst, s) in out.iter_mut().zip(&src[pos..pos + channels_out]) {
                    *dst = <T as cpal::Sample>::from_sample::<f32>(*s);
                }
                pos += channels_out;
                filled_frames += 1;
            }

            if filled_frames > 0 {
                stats
                    .played_frames
                    .fetch_add(filled_frames as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Append `src` to `out`, remapped from `src_channels` to `dst_channels`.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - same layout: pass-through
/// - other layouts: clamp to the available source channels
pub fn map_channels(src: &[f32], src_channels: usize, dst_channels: usize, out: &mut Vec<f32>) {
    if src_channels == dst_channels {
        out.extend_from_slice(src);
        return;
    }
    let src_channels = src_channels.max(1);
    out.reserve(src.len() / src_channels * dst_channels);
    for frame in src.chunks_exact(src_channels) {
        for ch in 0..dst_channels {
            let s = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                (1, _) => frame[0],
                _ => frame[ch.min(src_channels - 1)],
            };
            out.push(s);
        }
    }
}
