//! Direct-device strategy: blocking writes of raw PCM to an OS device handle.
//!
//! Like an OSS driver, a device may quietly override the requested channel
//! count or rate when it is opened; callers compare [`DeviceHandle::format`]
//! with what they asked for.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use crate::config::DirectDeviceConfig;
use crate::error::{AudioError, Result};

/// Sample rate and channel count of a 16-bit PCM device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An OS audio device that can be opened for 16-bit output.
pub trait DirectDevice {
    /// Open the device, asking for `format`. The granted format may differ.
    fn open(&mut self, format: DeviceFormat) -> Result<Box<dyn DeviceHandle>>;

    fn name(&self) -> &'static str {
        "direct"
    }
}

/// An open device. Dropping the handle closes it.
pub trait DeviceHandle {
    /// Format the device actually runs in.
    fn format(&self) -> DeviceFormat;

    /// Write interleaved frames, blocking while the device buffer is full.
    fn write(&mut self, samples: &[i16]) -> io::Result<()>;

    /// Block until everything written has been played.
    fn drain(&mut self) -> io::Result<()>;

    /// Discard whatever the device still has queued.
    fn reset(&mut self);

    /// Frames the device reports as played, when it can tell.
    fn position(&self) -> Option<usize> {
        None
    }
}

/// Raw native-endian PCM written to a device node or file.
pub struct PcmFileDevice {
    config: DirectDeviceConfig,
}

impl PcmFileDevice {
    pub fn new(config: DirectDeviceConfig) -> Self {
        Self { config }
    }

    fn granted_format(&self, requested: DeviceFormat) -> DeviceFormat {
        let channels = if self.config.stereo_only {
            2
        } else {
            match self.config.max_channels {
                Some(max) if requested.channels > max => max,
                _ => requested.channels,
            }
        };
        let sample_rate = match &self.config.sample_rates {
            Some(rates) if !rates.contains(&requested.sample_rate) => rates
                .iter()
                .copied()
                .min_by_key(|r| r.abs_diff(requested.sample_rate))
                .unwrap_or(requested.sample_rate),
            _ => requested.sample_rate,
        };
        DeviceFormat { sample_rate, channels }
    }
}

impl DirectDevice for PcmFileDevice {
    fn open(&mut self, format: DeviceFormat) -> Result<Box<dyn DeviceHandle>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.config.path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::ResourceBusy => AudioError::DeviceBusy,
                _ => AudioError::DeviceUnavailable(format!("{:?}: {e}", self.config.path)),
            })?;
        let granted = self.granted_format(format);
        if granted != format {
            tracing::debug!(
                requested_channels = format.channels,
                granted_channels = granted.channels,
                requested_rate_hz = format.sample_rate,
                granted_rate_hz = granted.sample_rate,
                "device overrode requested format"
            );
        }
        Ok(Box::new(PcmFileHandle {
            file,
            format: granted,
            scratch: Vec::new(),
        }))
    }

    fn name(&self) -> &'static str {
        "pcm-file"
    }
}

struct PcmFileHandle {
    file: File,
    format: DeviceFormat,
    scratch: Vec<u8>,
}

impl DeviceHandle for PcmFileHandle {
    fn format(&self) -> DeviceFormat {
        self.format
    }

    fn write(&mut self, samples: &[i16]) -> io::Result<()> {
        self.scratch.clear();
        self.scratch.reserve(samples.len() * 2);
        for s in samples {
            self.scratch.extend_from_slice(&s.to_ne_bytes());
        }
        self.file.write_all(&self.scratch)
    }

    fn drain(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn reset(&mut self) {
        self.scratch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(path: &std::path::Path) -> PcmFileDevice {
        PcmFileDevice::new(DirectDeviceConfig {
            path: path.to_path_buf(),
            ..Default::default()
        })
    }

    #[test]
    fn writes_native_endian_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        let mut dev = device(&path);
        let mut handle = dev
            .open(DeviceFormat { sample_rate: 44_100, channels: 1 })
            .unwrap();
        handle.write(&[1, -1]).unwrap();
        handle.drain().unwrap();
        drop(handle);

        let bytes = std::fs::read(&path).unwrap();
        let mut expected = 1i16.to_ne_bytes().to_vec();
        expected.extend_from_slice(&(-1i16).to_ne_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn stereo_only_device_overrides_mono() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = PcmFileDevice::new(DirectDeviceConfig {
            path: dir.path().join("out.pcm"),
            stereo_only: true,
            ..Default::default()
        });
        let handle = dev
            .open(DeviceFormat { sample_rate: 44_100, channels: 1 })
            .unwrap();
        assert_eq!(handle.format().channels, 2);
    }

    #[test]
    fn granted_rate_snaps_to_nearest_supported() {
        let dev = PcmFileDevice::new(DirectDeviceConfig {
            sample_rates: Some(vec![44_100, 48_000]),
            max_channels: Some(2),
            ..Default::default()
        });
        let granted = dev.granted_format(DeviceFormat { sample_rate: 47_000, channels: 4 });
        assert_eq!(granted, DeviceFormat { sample_rate: 48_000, channels: 2 });
    }

    #[test]
    fn missing_directory_is_device_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = device(&dir.path().join("no/such/dir/out.pcm"));
        match dev.open(DeviceFormat { sample_rate: 44_100, channels: 1 }) {
            Err(AudioError::DeviceUnavailable(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("open should fail"),
        }
    }
}
