//! Output device lookup and stream configuration for the CPAL sink.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Output device whose name contains `needle` (case-insensitive), or the host default.
pub(crate) fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"));
    };
    host.output_devices()
        .context("enumerate output devices")?
        .find(|d| {
            d.description()
                .map(|desc| matches_device_name(&desc.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("no output device matched: {needle}"))
}

/// Supported config closest to the negotiated stream format.
///
/// Rate preference: exact match, then the lowest rate above the stream rate
/// (upsampling), then the highest rate below it. Ties go to configs that can carry
/// the stream's channel count, then to the better sample format.
pub(crate) fn pick_output_config(
    device: &cpal::Device,
    rate_hz: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(CandidateRank, cpal::SupportedStreamConfig)> = None;
    for range in device
        .supported_output_configs()
        .context("query supported output configs")?
    {
        let rate = rate_for_range(range.min_sample_rate(), range.max_sample_rate(), rate_hz);
        let rank = CandidateRank::new(
            rate,
            rate_hz,
            range.channels() >= channels,
            sample_format_rank(range.sample_format()),
        );
        if best.as_ref().is_none_or(|(b, _)| rank < *b) {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("no supported output configs"))
}

/// Fixed buffer size when the device reports a range, capped to keep latency bounded.
pub(crate) fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 2_048;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print output devices to stdout (`--list-devices`).
pub(crate) fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("enumerate output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

/// Ordering key; smaller is better.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateRank {
    /// 0 exact, 1 above (upsample), 2 below (downsample).
    rate_class: u8,
    rate_distance: u32,
    lacks_channels: bool,
    format_rank: u8,
}

impl CandidateRank {
    fn new(rate: u32, target: u32, has_channels: bool, format_rank: u8) -> Self {
        let rate_class = match rate.cmp(&target) {
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Less => 2,
        };
        Self {
            rate_class,
            rate_distance: rate.abs_diff(target),
            lacks_channels: !has_channels,
            format_rank,
        }
    }
}

fn rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_match_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(!matches_device_name("USB DAC", "speaker"));
    }

    #[test]
    fn rate_is_clamped_into_range() {
        assert_eq!(rate_for_range(8_000, 96_000, 44_100), 44_100);
        assert_eq!(rate_for_range(48_000, 96_000, 16_000), 48_000);
        assert_eq!(rate_for_range(8_000, 32_000, 48_000), 32_000);
    }

    #[test]
    fn exact_rate_wins_over_better_format() {
        let exact = CandidateRank::new(44_100, 44_100, true, 3);
        let above = CandidateRank::new(48_000, 44_100, true, 0);
        assert!(exact < above);
    }

    #[test]
    fn upsampling_preferred_over_downsampling() {
        let above = CandidateRank::new(48_000, 44_100, true, 0);
        let below = CandidateRank::new(32_000, 44_100, true, 0);
        assert!(above < below);
    }

    #[test]
    fn channel_capable_config_preferred() {
        let stereo = CandidateRank::new(48_000, 48_000, true, 1);
        let mono = CandidateRank::new(48_000, 48_000, false, 0);
        assert!(stereo < mono);
    }
}
