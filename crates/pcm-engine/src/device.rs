//! Output device discovery and the CPAL streaming backend.
//!
//! Thin wrappers around CPAL for:
//! - selecting either the default device or a device by substring match
//! - finding a config that runs at exactly the requested rate and channel count
//! - listing devices for `--list-devices`

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{AudioError, Result};
use crate::playback::{self, CpalStream, OutputStream, StreamFeed, StreamFormat, StreamingBackend};

/// Rate the platform's output path handles best for a requested rate.
///
/// Rates outside the known-good set fall back to 44100 Hz.
pub fn best_sample_rate(requested: u32) -> u32 {
    let known: &[u32] = if cfg!(target_os = "macos") {
        &[44_100, 96_000]
    } else if cfg!(windows) {
        &[8_000, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000, 96_000]
    } else if cfg!(target_os = "linux") {
        &[44_100, 48_000, 96_000]
    } else {
        &[]
    };
    if known.contains(&requested) { requested } else { 44_100 }
}

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let devices = host
            .output_devices()
            .map_err(|e| AudioError::DeviceUnavailable(format!("no output devices: {e}")))?;
        for d in devices {
            let matches = d
                .description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false);
            if matches {
                return Ok(d);
            }
        }
        return Err(AudioError::DeviceUnavailable(format!(
            "no output device matched: {needle}"
        )));
    }

    host.default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string()))
}

/// Most channels any output config of `device` offers.
pub fn max_output_channels(device: &cpal::Device) -> Result<u16> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
    let max = ranges.map(|r| r.channels()).max().unwrap_or(0);
    if max == 0 {
        return Err(AudioError::DeviceUnavailable(
            "device reports no output channels".to_string(),
        ));
    }
    Ok(max)
}

/// Choose an output config with exactly `format`'s rate and channel count.
///
/// Among matching ranges, prefer the native `i16` format, then the others by rank.
pub fn pick_output_config(
    device: &cpal::Device,
    format: StreamFormat,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
        .collect();

    let with_channels: Vec<_> = ranges
        .into_iter()
        .filter(|r| r.channels() == format.channels)
        .collect();
    if with_channels.is_empty() {
        return Err(AudioError::ChannelsRejected {
            requested: format.channels,
            offered: max_output_channels(device).unwrap_or(0),
        });
    }

    with_channels
        .into_iter()
        .filter(|r| r.min_sample_rate() <= format.sample_rate && format.sample_rate <= r.max_sample_rate())
        .min_by_key(|r| sample_format_rank(r.sample_format()))
        .map(|r| r.with_sample_rate(format.sample_rate))
        .ok_or(AudioError::SampleRateRejected(format.sample_rate))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// [`StreamingBackend`] on top of a CPAL host.
pub struct CpalBackend {
    host: cpal::Host,
    device_name: Option<String>,
}

impl CpalBackend {
    /// Use the host's default device, or the first one whose name contains `device_name`.
    pub fn new(host: cpal::Host, device_name: Option<String>) -> Self {
        Self { host, device_name }
    }

    fn device(&self) -> Result<cpal::Device> {
        pick_device(&self.host, self.device_name.as_deref())
    }
}

impl StreamingBackend for CpalBackend {
    fn max_output_channels(&mut self) -> Result<u16> {
        let device = self.device()?;
        let max = max_output_channels(&device)?;
        tracing::debug!(channels = max, "the device can handle this many channels");
        Ok(max)
    }

    fn open(&mut self, format: StreamFormat, feed: Arc<StreamFeed>) -> Result<Box<dyn OutputStream>> {
        let device = self.device()?;
        let config = pick_output_config(&device, format)?;
        let stream_config: cpal::StreamConfig = config.clone().into();
        if let Ok(desc) = device.description() {
            tracing::info!(device = %desc, "output device");
        }
        tracing::info!(
            rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            sample_format = ?config.sample_format(),
            "device output config"
        );
        let stream = playback::build_output_stream(&device, &stream_config, config.sample_format(), &feed)?;
        Ok(Box::new(CpalStream::new(stream, feed)))
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

/// Lightweight output device metadata for device selection.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub max_channels: u16,
}

/// Return metadata for every output device of `host`.
///
/// Devices whose configs cannot be queried are skipped with a warning.
pub fn list_device_infos(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceUnavailable(format!("no output devices: {e}")))?;
    let mut out = Vec::new();
    for d in devices {
        let name = match d.description() {
            Ok(desc) => desc.to_string(),
            Err(_) => continue,
        };
        let ranges = match d.supported_output_configs() {
            Ok(ranges) => ranges.collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!(device = %name, "skipping device: {e}");
                continue;
            }
        };
        let min_rate = ranges.iter().map(|r| r.min_sample_rate()).min().unwrap_or(0);
        let max_rate = ranges.iter().map(|r| r.max_sample_rate()).max().unwrap_or(0);
        let max_channels = ranges.iter().map(|r| r.channels()).max().unwrap_or(0);
        if max_rate == 0 || max_channels == 0 {
            tracing::warn!(device = %name, "skipping device with no usable output config");
            continue;
        }
        out.push(DeviceInfo {
            name,
            min_rate,
            max_rate,
            max_channels,
        });
    }
    Ok(out)
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    for (i, info) in list_device_infos(host)?.iter().enumerate() {
        println!(
            "#{i}: {} ({}-{} Hz, up to {} channels)",
            info.name, info.min_rate, info.max_rate, info.max_channels
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_sample_rate_keeps_cd_rate_everywhere() {
        assert_eq!(best_sample_rate(44_100), 44_100);
        assert_eq!(best_sample_rate(96_000), 96_000);
    }

    #[test]
    fn best_sample_rate_falls_back_for_odd_rates() {
        assert_eq!(best_sample_rate(12_345), 44_100);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn best_sample_rate_linux_set() {
        assert_eq!(best_sample_rate(48_000), 48_000);
        assert_eq!(best_sample_rate(22_050), 44_100);
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn native_format_ranks_first() {
        assert!(sample_format_rank(cpal::SampleFormat::I16) < sample_format_rank(cpal::SampleFormat::F32));
        assert!(sample_format_rank(cpal::SampleFormat::U16) < sample_format_rank(cpal::SampleFormat::U8));
    }
}
