//! Error taxonomy for the playback engine.

use std::path::PathBuf;

/// Broad class of a playback failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device busy, missing driver or no hardware.
    DeviceUnavailable,
    /// Sample size, channel count or rate not honored by the device.
    FormatRejected,
    /// A write to the device failed mid-stream.
    Io,
    /// Buffers or headers could not be allocated.
    ResourceExhausted,
    /// The backend reported something that cannot happen.
    Invariant,
    /// Caller passed inconsistent arguments or configuration.
    Usage,
}

/// Errors surfaced by [`crate::AudioEngine`] and its backends.
///
/// Whenever one of these is returned from a playback call, the engine is no
/// longer playing and the backend resources of that call have been released.
#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("audio device already in use")]
    DeviceBusy,

    #[error("cannot open audio device: {0}")]
    DeviceUnavailable(String),

    #[error("cannot set sample size to 16 bit")]
    SampleFormatRejected,

    #[error("cannot set number of channels to {requested} (device offers {offered})")]
    ChannelsRejected { requested: u16, offered: u16 },

    #[error("cannot set sampling frequency to {0} Hz")]
    SampleRateRejected(u32),

    #[error("cannot write audio output")]
    Write(#[source] std::io::Error),

    #[error("not enough free memory to play this sound ({0})")]
    OutOfMemory(String),

    #[error("played {played} instead of {expected} samples")]
    SampleCountMismatch { played: usize, expected: usize },

    #[error("invalid sample buffer: {0}")]
    InvalidBuffer(String),

    #[error("streaming backend: {0}")]
    Stream(String),

    #[error("read config {path:?}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {path:?}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl AudioError {
    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioError::DeviceBusy | AudioError::DeviceUnavailable(_) => {
                ErrorKind::DeviceUnavailable
            }
            AudioError::SampleFormatRejected
            | AudioError::ChannelsRejected { .. }
            | AudioError::SampleRateRejected(_) => ErrorKind::FormatRejected,
            AudioError::Write(_) | AudioError::Stream(_) => ErrorKind::Io,
            AudioError::OutOfMemory(_) => ErrorKind::ResourceExhausted,
            AudioError::SampleCountMismatch { .. } => ErrorKind::Invariant,
            AudioError::InvalidBuffer(_)
            | AudioError::ConfigRead { .. }
            | AudioError::ConfigParse { .. } => ErrorKind::Usage,
        }
    }

    /// Invariant violations are not worth retrying.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Invariant
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, AudioError>;
