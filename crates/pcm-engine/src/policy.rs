//! Asynchronicity policy: how much a `play16` caller blocks.

use serde::{Deserialize, Serialize};

/// How a playback call relates to its caller, from most to least blocking.
///
/// The ordering is meaningful: a configured ceiling clamps the requested
/// level downward, never upward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Asynchronicity {
    /// Block until the last sample has played; no progress callbacks.
    Synchronous,
    /// Block, invoking the progress callback every iteration.
    CallingBack,
    /// Block, invoking the progress callback and honoring the cancel key.
    Interruptable,
    /// Return immediately; a scheduler-driven pump advances playback.
    #[default]
    Asynchronous,
}

impl Asynchronicity {
    /// Levels that run a blocking loop with progress reporting.
    pub fn is_interruptable(self) -> bool {
        matches!(self, Asynchronicity::CallingBack | Asynchronicity::Interruptable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Asynchronicity::Synchronous => "synchronous",
            Asynchronicity::CallingBack => "calling_back",
            Asynchronicity::Interruptable => "interruptable",
            Asynchronicity::Asynchronous => "asynchronous",
        }
    }
}

/// How the host process is currently running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionMode {
    /// Headless batch run: nobody can interact, so play synchronously.
    pub batch: bool,
    /// A script is running in the background of an interactive session.
    pub backgrounding: bool,
    /// The script asked for asynchronous playback explicitly.
    pub asynchronous: bool,
}

impl ExecutionMode {
    /// The level this mode asks for before any ceiling applies.
    pub fn requested(self) -> Asynchronicity {
        if self.batch {
            Asynchronicity::Synchronous
        } else if self.backgrounding && !self.asynchronous {
            Asynchronicity::Interruptable
        } else {
            Asynchronicity::Asynchronous
        }
    }
}

/// Pick the level for one playback call: the requested level clamped to `ceiling`.
pub fn resolve(mode: ExecutionMode, ceiling: Asynchronicity) -> Asynchronicity {
    mode.requested().min(ceiling)
}
