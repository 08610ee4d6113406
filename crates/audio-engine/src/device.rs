//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing the stream config and deriving the engine's [`AudioFormat`] from it

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::format::{AudioFormat, SampleFormat};

/// Everything needed to open output streams on one device.
pub struct OutputSelection {
    pub device: cpal::Device,
    pub name: String,
    pub sample_format: cpal::SampleFormat,
    pub stream_config: cpal::StreamConfig,
    /// Format every buffer must be decoded into for this device.
    pub format: AudioFormat,
}

/// Resolve device, config and buffer size in one go.
pub fn select_output(
    host: &cpal::Host,
    needle: Option<&str>,
    target_rate: Option<u32>,
) -> Result<OutputSelection> {
    let device = pick_device(host, needle)?;
    let name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let config = pick_output_config(&device, target_rate)
        .with_context(|| format!("choose output config for {name}"))?;

    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = pick_buffer_size(&config) {
        stream_config.buffer_size = buf;
    }
    let format = audio_format_for(config.sample_format(), &stream_config);

    tracing::info!(
        device = %name,
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?config.sample_format(),
        "output selected"
    );

    Ok(OutputSelection {
        device,
        name,
        sample_format: config.sample_format(),
        stream_config,
        format,
    })
}

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose the best output config for a target sample rate.
///
/// Prefers the highest rate at or below `target_rate` (the lowest above it when none is),
/// or the highest supported rate when unset. Ties go to `F32 > I32 > I16 > U16`.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below: target_rate.is_none_or(|t| rate <= t),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.beats(b)) {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed buffer size if the device advertises one, capped at 16384 frames.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(cap_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Engine format matching a device stream: 16-bit devices get `Signed16`, everything else
/// is fed `Float32` and converted in the callback.
pub fn audio_format_for(
    sample_format: cpal::SampleFormat,
    config: &cpal::StreamConfig,
) -> AudioFormat {
    let pcm = match sample_format {
        cpal::SampleFormat::I16 => SampleFormat::Signed16,
        _ => SampleFormat::Float32,
    };
    AudioFormat::native(config.sample_rate, config.channels, pcm)
}

/// Print available output devices to stdout (`--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn cap_buffer_frames(min: u32, max: u32) -> u32 {
    const MAX_FRAMES: u32 = 16_384;
    if max <= MAX_FRAMES {
        max
    } else {
        min.max(MAX_FRAMES)
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.max(min).min(max),
        None => max,
    }
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

#[derive(Clone, Copy, Debug)]
struct Candidate {
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.below != other.below {
            self.below
        } else if self.rate != other.rate {
            self.rate > other.rate
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
