use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pcm_engine::Asynchronicity;

#[derive(Parser, Debug)]
#[command(name = "pcm-play", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Audio preferences file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Write to a raw PCM device node instead of streaming through CPAL
    #[arg(long)]
    pub direct: bool,

    /// Device node (or file) for --direct
    #[arg(long)]
    pub device_path: Option<PathBuf>,

    /// Pretend the direct device only accepts stereo
    #[arg(long)]
    pub stereo_only: bool,

    /// Ceiling for how much playback may run in the background
    #[arg(long, value_enum)]
    pub max_asynchronicity: Option<Level>,

    /// Run as a batch job: always play synchronously
    #[arg(long)]
    pub batch: bool,

    /// Run as a background script: block, but let Ctrl-C interrupt
    #[arg(long)]
    pub background: bool,

    /// Seconds of silence before the sound
    #[arg(long)]
    pub silence_before: Option<f64>,

    /// Seconds of silence after the sound
    #[arg(long)]
    pub silence_after: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a sine tone
    Tone {
        /// Frequency in Hz
        #[arg(long, default_value_t = 440.0)]
        freq: f64,

        /// Length in seconds
        #[arg(long, default_value_t = 1.0)]
        seconds: f64,

        #[arg(long, default_value_t = 44_100)]
        rate: u32,

        #[arg(long, default_value_t = 1)]
        channels: u16,

        /// Peak level, 0..1
        #[arg(long, default_value_t = 0.3)]
        amplitude: f64,
    },

    /// Play headerless signed 16-bit little-endian PCM
    Raw {
        path: PathBuf,

        #[arg(long, default_value_t = 44_100)]
        rate: u32,

        #[arg(long, default_value_t = 2)]
        channels: u16,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Level {
    Synchronous,
    CallingBack,
    Interruptable,
    Asynchronous,
}

impl From<Level> for Asynchronicity {
    fn from(level: Level) -> Self {
        match level {
            Level::Synchronous => Asynchronicity::Synchronous,
            Level::CallingBack => Asynchronicity::CallingBack,
            Level::Interruptable => Asynchronicity::Interruptable,
            Level::Asynchronous => Asynchronicity::Asynchronous,
        }
    }
}
