//! pcm-engine — play a buffer of interleaved 16-bit PCM, blocking or in the background.
//!
//! ## Strategies
//! - **Streaming**: a CPAL output stream whose real-time callback copies successive
//!   chunks of the buffer into the device buffer (`playback`, `device`).
//! - **Direct device**: blocking writes of raw PCM to an OS device node (`direct`).
//!
//! ## Asynchronicity
//! Each `play16` call resolves a level from the host's execution mode, clamped by
//! the configured ceiling (`policy`). Blocking levels run a loop until the sound is
//! done; the asynchronous level registers work with a `Scheduler` and the host
//! drives `AudioEngine::pump` (see `scheduler::drive`).

pub mod clock;
pub mod config;
pub mod device;
pub mod direct;
pub mod engine;
pub mod error;
pub mod mix;
pub mod playback;
pub mod policy;
pub mod scheduler;
pub mod session;
pub mod status;

#[cfg(test)]
mod testing;

pub use config::{AudioPreferences, DirectDeviceConfig, EngineTuning};
pub use engine::{AudioEngine, CancelKey, FlagCancelKey, NoCancelKey, PumpStatus, StopKind};
pub use error::{AudioError, ErrorKind, Result};
pub use policy::{Asynchronicity, ExecutionMode};
pub use session::{InterruptHandle, Progress, ProgressCallback};
pub use status::StatusSnapshot;
