//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config close to the engine's device rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config for `target_rate`.
///
/// Prefers a range containing `target_rate` exactly; otherwise the highest supported rate
/// below it, then the lowest above it. Ties go to the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .context("query supported output configs")?
        .collect();

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate =
            pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = rate <= target_rate;
        let format_rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => is_better_candidate(
                (below, rate, format_rank),
                (*b_below, *b_rate, *b_rank),
                target_rate,
            ),
        };
        if replace {
            best = Some((below, rate, format_rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Fixed buffer size closest to `target_frames`, or `None` to let CPAL decide.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    target_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(target_frames.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// `(below_target, rate, format_rank)` comparison.
fn is_better_candidate(cand: (bool, u32, u8), best: (bool, u32, u8), target: u32) -> bool {
    let (below, rate, rank) = cand;
    let (best_below, best_rate, best_rank) = best;
    let exact = rate == target;
    let best_exact = best_rate == target;
    if exact != best_exact {
        exact
    } else if below != best_below {
        below
    } else if rate != best_rate {
        if below { rate > best_rate } else { rate < best_rate }
    } else {
        rank < best_rank
    }
}

/// Output device metadata for `--list-devices`.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

/// Enumerate output devices on `host`.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());

    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        let name = d.description()?.name().to_string();
        let (mut min_rate, mut max_rate) = (u32::MAX, 0u32);
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
            }
        }
        if max_rate == 0 {
            match d.default_output_config() {
                Ok(cfg) => {
                    min_rate = cfg.sample_rate();
                    max_rate = cfg.sample_rate();
                }
                Err(e) => {
                    tracing::warn!(device = %name, "skipping device without output config: {e}");
                    continue;
                }
            }
        }
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(8_000, 96_000, 44_100), 44_100);
    }

    #[test]
    fn pick_rate_for_range_clamps_to_bounds() {
        assert_eq!(pick_rate_for_range(48_000, 96_000, 44_100), 48_000);
        assert_eq!(pick_rate_for_range(8_000, 32_000, 44_100), 32_000);
    }

    #[test]
    fn exact_rate_beats_everything() {
        assert!(is_better_candidate((true, 44_100, 3), (true, 32_000, 0), 44_100));
        assert!(!is_better_candidate((false, 48_000, 0), (true, 44_100, 3), 44_100));
    }

    #[test]
    fn below_target_prefers_closest() {
        assert!(is_better_candidate((true, 32_000, 2), (true, 22_050, 2), 44_100));
        assert!(is_better_candidate((true, 32_000, 2), (false, 48_000, 0), 44_100));
    }

    #[test]
    fn above_target_prefers_lowest() {
        assert!(is_better_candidate((false, 48_000, 2), (false, 96_000, 2), 44_100));
    }

    #[test]
    fn same_rate_prefers_float_format() {
        assert!(is_better_candidate((true, 44_100, 0), (true, 44_100, 2), 44_100));
        assert!(
            sample_format_rank(cpal::SampleFormat::F32)
                < sample_format_rank(cpal::SampleFormat::I16)
        );
    }
}
