//! State of the (single) playback session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::direct::DeviceHandle;
use crate::playback::{OutputStream, StreamFeed};
use crate::policy::Asynchronicity;
use crate::scheduler::WorkId;

/// Answer of a progress callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Stop,
}

/// Progress sink: receives the number of frames played so far.
///
/// Called from the blocking loop or the pump, never from the real-time
/// thread, but still on the playback path: keep it cheap.
pub type ProgressCallback = Box<dyn FnMut(usize) -> Progress>;

/// Which strategy carries a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Streaming,
    Direct,
}

pub(crate) enum Backend {
    Streaming {
        stream: Box<dyn OutputStream>,
        feed: Arc<StreamFeed>,
    },
    Direct {
        handle: Box<dyn DeviceHandle>,
    },
}

/// Cloneable handle that interrupts the current session from any thread.
///
/// The real-time callback emits silence from its next period on; the next
/// pump step or loop iteration finalizes the session.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Everything the engine knows about the current (or last) playback.
///
/// Counters are in frames ("samples" per channel). The fields survive a
/// flush so callers can still ask how much was played and why it stopped.
pub struct PlaybackSession {
    pub(crate) buffer: Option<Arc<[i16]>>,
    /// The buffer was built by the engine (fake mono or downmix).
    pub(crate) synthesized: bool,
    pub(crate) sample_rate: u32,
    pub(crate) number_of_samples: usize,
    pub(crate) requested_channels: u16,
    /// Channels actually sent to the backend.
    pub(crate) number_of_channels: u16,
    pub(crate) samples_left: usize,
    pub(crate) samples_sent: usize,
    pub(crate) samples_played: usize,
    pub(crate) asynchronicity: Asynchronicity,
    pub(crate) explicit_stop: bool,
    pub(crate) interrupted: Arc<AtomicBool>,
    pub(crate) callback: Option<ProgressCallback>,
    pub(crate) backend: Option<Backend>,
    pub(crate) backend_kind: Option<BackendKind>,
    pub(crate) started_at: Duration,
    pub(crate) work: Option<WorkId>,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            buffer: None,
            synthesized: false,
            sample_rate: 0,
            number_of_samples: 0,
            requested_channels: 0,
            number_of_channels: 0,
            samples_left: 0,
            samples_sent: 0,
            samples_played: 0,
            asynchronicity: Asynchronicity::Synchronous,
            explicit_stop: false,
            interrupted: Arc::new(AtomicBool::new(false)),
            callback: None,
            backend: None,
            backend_kind: None,
            started_at: Duration::ZERO,
            work: None,
        }
    }
}

impl PlaybackSession {
    /// Reset for a new playback; `explicit_stop` is the caller's to set.
    pub(crate) fn begin(
        &mut self,
        buffer: Arc<[i16]>,
        sample_rate: u32,
        number_of_samples: usize,
        channels: u16,
        asynchronicity: Asynchronicity,
        callback: Option<ProgressCallback>,
    ) {
        self.buffer = Some(buffer);
        self.synthesized = false;
        self.sample_rate = sample_rate;
        self.number_of_samples = number_of_samples;
        self.requested_channels = channels;
        self.number_of_channels = channels;
        self.samples_left = number_of_samples;
        self.samples_sent = 0;
        self.samples_played = 0;
        self.asynchronicity = asynchronicity;
        self.explicit_stop = false;
        self.interrupted = Arc::new(AtomicBool::new(false));
        self.callback = callback;
        self.backend = None;
        self.backend_kind = None;
        self.started_at = Duration::ZERO;
        self.work = None;
    }

    /// Replace the buffer with one the engine built itself.
    pub(crate) fn substitute_buffer(&mut self, samples: Vec<i16>, channels: u16) -> Arc<[i16]> {
        let samples: Arc<[i16]> = samples.into();
        self.buffer = Some(samples.clone());
        self.synthesized = true;
        self.number_of_channels = channels;
        samples
    }

    /// Hand the current count to the progress callback.
    pub(crate) fn report(&mut self) -> Progress {
        let played = self.samples_played;
        match self.callback.as_mut() {
            Some(cb) => cb(played),
            None => Progress::Continue,
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            flag: self.interrupted.clone(),
        }
    }

    /// Estimates may overshoot by this many frames before completion is called.
    pub(crate) fn tolerance(&self, divisor: u32) -> usize {
        (self.sample_rate / divisor.max(1)) as usize
    }

    /// Write one chunk of at most `max_frames` to a direct device.
    pub(crate) fn write_chunk(&mut self, max_frames: usize) -> std::io::Result<()> {
        let dframes = self.samples_left.min(max_frames.max(1));
        let ch = self.number_of_channels as usize;
        let start = self.samples_sent * ch;
        if let (Some(buffer), Some(Backend::Direct { handle })) = (self.buffer.as_ref(), self.backend.as_mut()) {
            handle.write(&buffer[start..start + dframes * ch])?;
        }
        self.samples_left -= dframes;
        self.samples_sent += dframes;
        Ok(())
    }

    /// Saturate the played count into `[1, number_of_samples]`.
    pub(crate) fn clamp_played(&mut self) {
        self.samples_played = self.samples_played.min(self.number_of_samples).max(1);
    }
}
