//! Persisted audio preferences and engine tuning.
//!
//! Preferences are the user-facing knobs that survive restarts (loaded from TOML);
//! tuning holds the fixed step sizes of the playback loops.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AudioError, Result};
use crate::policy::Asynchronicity;

/// Audio output preferences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioPreferences {
    /// Ceiling for the asynchronicity of any playback call.
    pub maximum_asynchronicity: Asynchronicity,
    /// Route output to the internal speaker where the platform distinguishes it.
    pub use_internal_speaker: bool,
    /// Play through the streaming backend (cpal) instead of the direct device.
    pub output_uses_streaming: bool,
    /// Record through the streaming backend.
    pub input_uses_streaming: bool,
    /// Silence played before a sound, in seconds.
    pub silence_before: f64,
    /// Silence played after a sound, in seconds.
    pub silence_after: f64,
}

impl Default for AudioPreferences {
    fn default() -> Self {
        Self {
            maximum_asynchronicity: Asynchronicity::Asynchronous,
            use_internal_speaker: true,
            output_uses_streaming: true,
            input_uses_streaming: true,
            silence_before: 0.0,
            silence_after: 0.5,
        }
    }
}

/// Read and parse any TOML config file, naming `path` in the error.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| AudioError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| AudioError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

impl AudioPreferences {
    /// Load preferences from a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn from_toml(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Pre- and post-roll lengths in frames at `sample_rate`.
    pub fn silence_frames(&self, sample_rate: u32) -> (usize, usize) {
        (
            seconds_to_frames(self.silence_before, sample_rate),
            seconds_to_frames(self.silence_after, sample_rate),
        )
    }
}

fn seconds_to_frames(seconds: f64, sample_rate: u32) -> usize {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * sample_rate as f64).round() as usize
    } else {
        0
    }
}

/// Step sizes of the blocking loops and the asynchronous pump.
#[derive(Clone, Debug)]
pub struct EngineTuning {
    /// Frames written per direct-device write in the interruptable and pumped paths.
    pub chunk_frames: usize,
    /// Sleep between iterations of the blocking streaming loop.
    pub poll_interval: Duration,
    /// Interval at which a host should pump an asynchronous session.
    pub pump_interval: Duration,
    /// Completion tolerance is `sample_rate / tolerance_divisor` frames past the end.
    pub tolerance_divisor: u32,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            chunk_frames: 500,
            poll_interval: Duration::from_millis(10),
            pump_interval: Duration::from_millis(20),
            tolerance_divisor: 20,
        }
    }
}

/// Settings for the raw PCM direct device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectDeviceConfig {
    /// Device node or file receiving native-endian 16-bit PCM.
    pub path: PathBuf,
    /// Highest channel count the device grants.
    pub max_channels: Option<u16>,
    /// The driver insists on stereo regardless of the request.
    pub stereo_only: bool,
    /// Sample rates the device honors; `None` accepts any.
    pub sample_rates: Option<Vec<u32>>,
}

impl Default for DirectDeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/dsp"),
            max_channels: None,
            stereo_only: false,
            sample_rates: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_persisted_defaults() {
        let prefs = AudioPreferences::default();
        assert_eq!(prefs.maximum_asynchronicity, Asynchronicity::Asynchronous);
        assert!(prefs.use_internal_speaker);
        assert!(prefs.output_uses_streaming);
        assert_eq!(prefs.silence_before, 0.0);
        assert_eq!(prefs.silence_after, 0.5);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let prefs = AudioPreferences::from_toml(
            "maximum_asynchronicity = \"calling_back\"\noutput_uses_streaming = false\n",
        )
        .unwrap();
        assert_eq!(prefs.maximum_asynchronicity, Asynchronicity::CallingBack);
        assert!(!prefs.output_uses_streaming);
        assert!(prefs.input_uses_streaming);
        assert_eq!(prefs.silence_after, 0.5);
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(AudioPreferences::from_toml("maximum_asynchronicity = \"sometimes\"").is_err());
    }

    #[test]
    fn load_reads_file_and_reports_path_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "silence_before = 0.25").unwrap();
        let prefs = AudioPreferences::load(file.path()).unwrap();
        assert_eq!(prefs.silence_before, 0.25);

        let missing = file.path().with_extension("missing");
        match AudioPreferences::load(&missing) {
            Err(AudioError::ConfigRead { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn load_toml_reports_parse_errors_with_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio\nsilence_before = ").unwrap();
        match load_toml::<AudioPreferences>(file.path()) {
            Err(err @ AudioError::ConfigParse { .. }) => {
                assert!(err.to_string().contains(&*file.path().to_string_lossy()));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn silence_frames_round_and_ignore_nonsense() {
        let prefs = AudioPreferences {
            silence_before: 0.1,
            silence_after: f64::NAN,
            ..Default::default()
        };
        assert_eq!(prefs.silence_frames(44_100), (4_410, 0));

        let prefs = AudioPreferences { silence_before: -1.0, ..Default::default() };
        assert_eq!(prefs.silence_frames(48_000), (0, 24_000));
    }

    #[test]
    fn direct_device_config_parses_from_toml() {
        let cfg: DirectDeviceConfig =
            toml::from_str("path = \"/tmp/out.pcm\"\nstereo_only = true\nsample_rates = [44100]\n")
                .unwrap();
        assert_eq!(cfg.path, PathBuf::from("/tmp/out.pcm"));
        assert!(cfg.stereo_only);
        assert_eq!(cfg.sample_rates, Some(vec![44_100]));
        assert_eq!(cfg.max_channels, None);
    }
}
