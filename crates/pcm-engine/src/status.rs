use crate::policy::Asynchronicity;
use crate::session::{BackendKind, PlaybackSession};

/// Point-in-time view of the engine, for logs and UIs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub is_playing: bool,
    /// Output sample rate in Hz; `None` before the first playback.
    pub sample_rate: Option<u32>,
    /// Channels sent to the backend.
    pub channels: Option<u16>,
    pub total_samples: usize,
    pub samples_played: usize,
    pub elapsed_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub asynchronicity: Asynchronicity,
    pub backend: Option<BackendKind>,
    /// The last stop was requested by the user rather than implied.
    pub explicit_stop: bool,
}

impl StatusSnapshot {
    pub(crate) fn from_session(session: &PlaybackSession, is_playing: bool) -> Self {
        let sample_rate = (session.sample_rate > 0).then_some(session.sample_rate);
        let to_ms = |frames: usize| {
            sample_rate.map(|sr| (frames as u64).saturating_mul(1000) / sr as u64)
        };
        Self {
            is_playing,
            sample_rate,
            channels: (session.number_of_channels > 0).then_some(session.number_of_channels),
            total_samples: session.number_of_samples,
            samples_played: session.samples_played,
            elapsed_ms: to_ms(session.samples_played),
            duration_ms: to_ms(session.number_of_samples),
            asynchronicity: session.asynchronicity,
            backend: session.backend_kind,
            explicit_stop: session.explicit_stop,
        }
    }
}
