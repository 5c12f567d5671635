//! Time source used to estimate how much audio has been heard.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic clock with a sleep that may be virtual.
pub trait Clock {
    /// Time since an arbitrary, fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, dur: Duration);
}

/// Wall clock backed by [`Instant`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

/// Clock that only moves when slept on or advanced.
///
/// Clones share the same time, so a test can keep a handle while the engine
/// owns another.
#[derive(Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, dur: Duration) {
        self.nanos.fetch_add(dur.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur);
    }
}

/// Frames heard after `elapsed`, net of output `latency`; never negative.
pub fn frames_elapsed(elapsed: Duration, latency: Duration, sample_rate: u32) -> usize {
    let heard = elapsed.saturating_sub(latency);
    (heard.as_secs_f64() * sample_rate as f64).floor() as usize
}
