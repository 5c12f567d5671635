use std::path::{Path, PathBuf};

use anyhow::Result;
use pcm_engine::{AudioPreferences, DirectDeviceConfig, ExecutionMode};
use serde::Deserialize;

use crate::cli::{Args, Command};

/// Layout of the `--config` file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayFile {
    pub audio: AudioPreferences,
    pub direct: DirectDeviceConfig,
}

impl PlayFile {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(pcm_engine::config::load_toml(path)?)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    Tone {
        freq: f64,
        seconds: f64,
        rate: u32,
        channels: u16,
        amplitude: f64,
    },
    Raw {
        path: PathBuf,
        rate: u32,
        channels: u16,
    },
}

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub source: Source,
    pub device: Option<String>,
    pub prefs: AudioPreferences,
    pub direct: DirectDeviceConfig,
    pub mode: ExecutionMode,
}

impl PlayConfig {
    /// Config file first, command-line flags on top.
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => PlayFile::load(path)?,
            None => PlayFile::default(),
        };
        let source = match &args.cmd {
            Some(Command::Tone { freq, seconds, rate, channels, amplitude }) => Source::Tone {
                freq: *freq,
                seconds: *seconds,
                rate: *rate,
                channels: *channels,
                amplitude: *amplitude,
            },
            Some(Command::Raw { path, rate, channels }) => Source::Raw {
                path: path.clone(),
                rate: *rate,
                channels: *channels,
            },
            None => anyhow::bail!("nothing to play: use `tone` or `raw` (or --list-devices)"),
        };
        Ok(Self::merge(file, args, source))
    }

    fn merge(file: PlayFile, args: &Args, source: Source) -> Self {
        let PlayFile { mut audio, mut direct } = file;
        if args.direct {
            audio.output_uses_streaming = false;
        }
        if let Some(level) = args.max_asynchronicity {
            audio.maximum_asynchronicity = level.into();
        }
        if let Some(seconds) = args.silence_before {
            audio.silence_before = seconds;
        }
        if let Some(seconds) = args.silence_after {
            audio.silence_after = seconds;
        }
        if let Some(path) = &args.device_path {
            direct.path = path.clone();
        }
        if args.stereo_only {
            direct.stereo_only = true;
        }
        Self {
            source,
            device: normalize_device_name(args.device.clone()),
            prefs: audio,
            direct,
            mode: ExecutionMode {
                batch: args.batch,
                backgrounding: args.background,
                asynchronous: false,
            },
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pcm_engine::Asynchronicity;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(
            &path,
            "[audio]\nmaximum_asynchronicity = \"calling_back\"\nsilence_after = 2.0\n\n[direct]\npath = \"/tmp/x.pcm\"\n",
        )
        .unwrap();
        let path = path.to_string_lossy().to_string();

        let args = parse(&[
            "pcm-play",
            "--config",
            &path,
            "--max-asynchronicity",
            "interruptable",
            "--direct",
            "--stereo-only",
            "tone",
        ]);
        let config = PlayConfig::from_args(&args).unwrap();

        assert_eq!(config.prefs.maximum_asynchronicity, Asynchronicity::Interruptable);
        assert_eq!(config.prefs.silence_after, 2.0);
        assert!(!config.prefs.output_uses_streaming);
        assert_eq!(config.direct.path, PathBuf::from("/tmp/x.pcm"));
        assert!(config.direct.stereo_only);
    }

    #[test]
    fn defaults_without_file() {
        let args = parse(&["pcm-play", "--device", "  ", "raw", "in.pcm", "--channels", "1"]);
        let config = PlayConfig::from_args(&args).unwrap();

        assert_eq!(config.prefs, AudioPreferences::default());
        assert_eq!(config.device, None);
        assert_eq!(
            config.source,
            Source::Raw { path: PathBuf::from("in.pcm"), rate: 44_100, channels: 1 }
        );
        assert_eq!(config.mode, ExecutionMode::default());
    }

    #[test]
    fn batch_and_background_set_execution_mode() {
        let args = parse(&["pcm-play", "--batch", "--background", "tone"]);
        let config = PlayConfig::from_args(&args).unwrap();
        assert!(config.mode.batch);
        assert!(config.mode.backgrounding);
        assert_eq!(config.mode.requested(), Asynchronicity::Synchronous);
    }

    #[test]
    fn missing_command_is_an_error() {
        let args = parse(&["pcm-play"]);
        assert!(PlayConfig::from_args(&args).is_err());
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "[audio]\nsilence_after = \"long\"\n").unwrap();

        let err = PlayFile::load(&path).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<pcm_engine::AudioError>(),
            Some(pcm_engine::AudioError::ConfigParse { .. })
        ));
    }

    #[test]
    fn unreadable_config_names_the_file() {
        let args = parse(&["pcm-play", "--config", "/no/such/prefs.toml", "tone"]);
        let err = PlayConfig::from_args(&args).unwrap_err();
        assert!(format!("{err:#}").contains("/no/such/prefs.toml"));
    }
}
