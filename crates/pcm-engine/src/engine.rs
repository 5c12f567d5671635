//! The playback engine: one 16-bit PCM session at a time.
//!
//! `play16` resolves the asynchronicity level, opens the configured backend
//! and then either blocks until the sound is done (synchronous and
//! interruptable levels) or registers work with the scheduler and returns
//! (asynchronous level), after which the host calls [`AudioEngine::pump`].
//!
//! Every session that got going ends in the same flush: the backend is
//! released, the played count is clamped into `[1, n]`, and the progress
//! callback hears that count one last time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::clock::{self, Clock, SystemClock};
use crate::config::{AudioPreferences, EngineTuning};
use crate::direct::{DeviceFormat, DirectDevice};
use crate::error::{AudioError, Result};
use crate::mix;
use crate::playback::{StreamFeed, StreamFormat, StreamingBackend};
use crate::policy::{self, Asynchronicity, ExecutionMode};
use crate::scheduler::{IdleScheduler, Scheduler};
use crate::session::{Backend, BackendKind, InterruptHandle, PlaybackSession, Progress, ProgressCallback};
use crate::status::StatusSnapshot;

/// Who asked for a stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopKind {
    /// A new playback or a preference change superseded the current one.
    Implicit,
    /// The user asked for it.
    Explicit,
}

/// Result of one pump step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpStatus {
    /// Still playing; pump again later.
    Continue,
    /// The session has been flushed (or there was none).
    Done,
}

/// The key that aborts interruptable playback (Escape in a desktop host).
pub trait CancelKey {
    /// Consume a pending press, if any.
    fn pressed(&self) -> bool;
}

/// No cancel key at all.
pub struct NoCancelKey;

impl CancelKey for NoCancelKey {
    fn pressed(&self) -> bool {
        false
    }
}

/// Cancel key backed by a flag another thread sets (e.g. a Ctrl-C handler).
#[derive(Clone, Default)]
pub struct FlagCancelKey {
    flag: Arc<AtomicBool>,
}

impl FlagCancelKey {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn press(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

impl CancelKey for FlagCancelKey {
    fn pressed(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

/// Owner of the single playback session.
pub struct AudioEngine {
    prefs: AudioPreferences,
    tuning: EngineTuning,
    mode: ExecutionMode,
    streaming: Box<dyn StreamingBackend>,
    direct: Box<dyn DirectDevice>,
    scheduler: Box<dyn Scheduler>,
    cancel_key: Box<dyn CancelKey>,
    clock: Box<dyn Clock>,
    session: PlaybackSession,
    is_playing: bool,
    last_error: Option<AudioError>,
}

impl AudioEngine {
    pub fn new(
        prefs: AudioPreferences,
        streaming: Box<dyn StreamingBackend>,
        direct: Box<dyn DirectDevice>,
    ) -> Self {
        Self {
            prefs,
            tuning: EngineTuning::default(),
            mode: ExecutionMode::default(),
            streaming,
            direct,
            scheduler: Box::new(IdleScheduler::new()),
            cancel_key: Box::new(NoCancelKey),
            clock: Box::new(SystemClock::new()),
            session: PlaybackSession::default(),
            is_playing: false,
            last_error: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_cancel_key(mut self, cancel_key: Box<dyn CancelKey>) -> Self {
        self.cancel_key = cancel_key;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tuning(mut self, tuning: EngineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn tuning(&self) -> &EngineTuning {
        &self.tuning
    }

    /// Play `number_of_samples` interleaved frames of `channels` at `sample_rate`.
    ///
    /// Any session still playing is stopped implicitly first. On error nothing
    /// is playing and the backend of this call has been released.
    pub fn play16(
        &mut self,
        buffer: impl Into<Arc<[i16]>>,
        sample_rate: u32,
        number_of_samples: usize,
        channels: u16,
        callback: Option<ProgressCallback>,
    ) -> Result<()> {
        if self.is_playing {
            // The old session's explicit-stop tag is overwritten just below.
            self.stop_playing(StopKind::Implicit);
        }
        let buffer: Arc<[i16]> = buffer.into();
        validate(&buffer, sample_rate, number_of_samples, channels)?;

        let asynchronicity = policy::resolve(self.mode, self.prefs.maximum_asynchronicity);
        tracing::debug!(
            asynchronicity = asynchronicity.as_str(),
            rate_hz = sample_rate,
            channels,
            frames = number_of_samples,
            "play16"
        );
        self.session.begin(
            buffer.clone(),
            sample_rate,
            number_of_samples,
            channels,
            asynchronicity,
            callback,
        );
        self.last_error = None;
        self.is_playing = true;

        let result = if self.prefs.output_uses_streaming {
            self.play_streaming(buffer)
        } else {
            self.play_direct(buffer)
        };
        if let Err(e) = &result {
            tracing::warn!("16-bit audio not played: {e}");
            if self.is_playing {
                self.abandon();
            }
        }
        result
    }

    fn play_streaming(&mut self, buffer: Arc<[i16]>) -> Result<()> {
        let requested = self.session.requested_channels;
        let max = self.streaming.max_output_channels()?;
        let samples = if requested > max {
            tracing::info!(from = requested, to = max, "redistributing channels over device outputs");
            let reduced = mix::reduce_channels(&buffer, self.session.number_of_samples, requested, max)?;
            self.session.substitute_buffer(reduced, max)
        } else {
            buffer
        };
        let mut format = StreamFormat {
            sample_rate: self.session.sample_rate,
            channels: self.session.number_of_channels,
        };

        let interrupted = self.session.interrupted.clone();
        let mut feed = Arc::new(StreamFeed::new(samples.clone(), format.channels, interrupted.clone()));
        let mut stream = match self.streaming.open(format, feed.clone()) {
            Err(AudioError::ChannelsRejected { requested: 1, offered }) if offered >= 2 => {
                tracing::info!("device insists on stereo; duplicating mono samples");
                let doubled = self.session.substitute_buffer(mix::duplicate_mono(&samples)?, 2);
                format.channels = 2;
                feed = Arc::new(StreamFeed::new(doubled, 2, interrupted));
                self.streaming.open(format, feed.clone())?
            }
            opened => opened?,
        };
        self.session.started_at = self.clock.now();
        stream.start()?;
        tracing::info!(
            backend = self.streaming.name(),
            rate_hz = format.sample_rate,
            channels = format.channels,
            "streaming"
        );
        self.session.backend = Some(Backend::Streaming {
            stream,
            feed: feed.clone(),
        });
        self.session.backend_kind = Some(BackendKind::Streaming);

        if self.session.asynchronicity == Asynchronicity::Asynchronous {
            self.schedule();
            return Ok(());
        }
        self.stream_until_done(&feed)
    }

    /// Blocking loop for the synchronous and interruptable levels.
    fn stream_until_done(&mut self, feed: &Arc<StreamFeed>) -> Result<()> {
        let frames = self.session.number_of_samples;
        let tolerance = self.session.tolerance(self.tuning.tolerance_divisor);
        loop {
            let heard = self.heard_frames(feed.latency());
            if heard >= frames + tolerance || (feed.frames_left() == 0 && heard >= frames) {
                return self.complete_stream(feed);
            }
            self.session.samples_played = heard.min(feed.frames_sent());

            if self.should_interrupt() {
                self.abort_stream();
                self.flush();
                return Ok(());
            }
            self.clock.sleep(self.tuning.poll_interval);
        }
    }

    /// Finalize a stream whose time is up.
    ///
    /// The callback must have consumed every frame by now; a shortfall means
    /// the backend stalled or dropped audio and is reported as fatal.
    fn complete_stream(&mut self, feed: &StreamFeed) -> Result<()> {
        let frames = self.session.number_of_samples;
        let sent = feed.frames_sent();
        self.abort_stream();
        if sent != frames {
            tracing::warn!(sent, expected = frames, "stream did not consume the whole buffer");
            self.session.samples_played = sent;
            self.flush();
            return Err(AudioError::SampleCountMismatch { played: sent, expected: frames });
        }
        self.session.samples_played = frames;
        self.flush();
        Ok(())
    }

    fn play_direct(&mut self, buffer: Arc<[i16]>) -> Result<()> {
        let requested = DeviceFormat {
            sample_rate: self.session.sample_rate,
            channels: self.session.requested_channels,
        };
        let handle = self.direct.open(requested)?;
        let granted = handle.format();
        if granted.channels != requested.channels {
            if requested.channels == 1 && granted.channels == 2 {
                tracing::info!("device insists on stereo; duplicating mono samples");
                self.session.substitute_buffer(mix::duplicate_mono(&buffer)?, 2);
            } else if requested.channels > 2 && granted.channels == 2 {
                tracing::info!(from = requested.channels, "retrying with 2 channels");
                let reduced = mix::reduce_channels(
                    &buffer,
                    self.session.number_of_samples,
                    requested.channels,
                    2,
                )?;
                self.session.substitute_buffer(reduced, 2);
            } else {
                return Err(AudioError::ChannelsRejected {
                    requested: requested.channels,
                    offered: granted.channels,
                });
            }
        }
        if granted.sample_rate != requested.sample_rate {
            return Err(AudioError::SampleRateRejected(requested.sample_rate));
        }
        tracing::info!(
            backend = self.direct.name(),
            rate_hz = granted.sample_rate,
            channels = self.session.number_of_channels,
            "direct device"
        );
        self.session.backend = Some(Backend::Direct { handle });
        self.session.backend_kind = Some(BackendKind::Direct);
        self.session.started_at = self.clock.now();

        match self.session.asynchronicity {
            Asynchronicity::Synchronous => {
                let all = self.session.samples_left;
                if let Err(e) = self.session.write_chunk(all).and_then(|_| self.drain_direct()) {
                    return Err(self.fail_mid_stream(e));
                }
                self.session.samples_played = self.session.number_of_samples;
            }
            Asynchronicity::CallingBack | Asynchronicity::Interruptable => {
                let mut interrupted = false;
                while self.session.samples_left > 0 && !interrupted {
                    if let Err(e) = self.session.write_chunk(self.tuning.chunk_frames) {
                        return Err(self.fail_mid_stream(e));
                    }
                    self.session.samples_played = self.direct_position();
                    interrupted = self.should_interrupt();
                }
                if !interrupted {
                    if let Err(e) = self.drain_direct() {
                        return Err(self.fail_mid_stream(e));
                    }
                    self.session.samples_played = self.session.number_of_samples;
                }
            }
            Asynchronicity::Asynchronous => {
                self.schedule();
                return Ok(());
            }
        }
        self.flush();
        Ok(())
    }

    /// One step of an asynchronous session. Never re-entered by the host.
    pub fn pump(&mut self) -> PumpStatus {
        if !self.is_playing {
            return PumpStatus::Done;
        }
        match &self.session.backend {
            Some(Backend::Streaming { feed, .. }) => {
                let feed = feed.clone();
                self.pump_streaming(&feed)
            }
            Some(Backend::Direct { .. }) => self.pump_direct(),
            None => {
                self.flush();
                PumpStatus::Done
            }
        }
    }

    /// An interrupted stream counts as played out: the callback has already
    /// switched to silence, so the session ends with the full count.
    fn pump_streaming(&mut self, feed: &Arc<StreamFeed>) -> PumpStatus {
        let frames = self.session.number_of_samples;
        if feed.is_interrupted() {
            self.session.samples_played = frames;
            self.abort_stream();
            self.flush();
            return PumpStatus::Done;
        }
        let tolerance = self.session.tolerance(self.tuning.tolerance_divisor);
        let heard = self.heard_frames(feed.latency());
        if heard >= frames + tolerance || (feed.frames_left() == 0 && heard >= frames) {
            if let Err(e) = self.complete_stream(feed) {
                self.last_error = Some(e);
            }
            return PumpStatus::Done;
        }
        self.session.samples_played = heard.min(feed.frames_sent());
        if self.session.report() == Progress::Stop {
            feed.interrupt();
            self.abort_stream();
            self.flush();
            return PumpStatus::Done;
        }
        PumpStatus::Continue
    }

    fn pump_direct(&mut self) -> PumpStatus {
        if self.session.is_interrupted() {
            self.flush();
            return PumpStatus::Done;
        }
        if self.session.samples_left > 0 {
            if let Err(e) = self.session.write_chunk(self.tuning.chunk_frames) {
                let err = self.fail_mid_stream(e);
                self.last_error = Some(err);
                return PumpStatus::Done;
            }
            self.session.samples_played = self.direct_position();
            if self.session.report() == Progress::Stop {
                self.flush();
                return PumpStatus::Done;
            }
            PumpStatus::Continue
        } else {
            if let Err(e) = self.drain_direct() {
                let err = self.fail_mid_stream(e);
                self.last_error = Some(err);
                return PumpStatus::Done;
            }
            self.session.samples_played = self.session.number_of_samples;
            self.flush();
            PumpStatus::Done
        }
    }

    /// Stop the current session.
    ///
    /// Records whether the stop was explicit even when nothing is stopped.
    /// Only asynchronous sessions can be stopped this way; returns `false`
    /// when there was nothing to stop.
    pub fn stop_playing(&mut self, kind: StopKind) -> bool {
        self.session.explicit_stop = kind == StopKind::Explicit;
        if !self.is_playing || self.session.asynchronicity < Asynchronicity::Asynchronous {
            return false;
        }
        tracing::info!(explicit = self.session.explicit_stop, "stopping playback");
        self.session.interrupted.store(true, Ordering::Release);
        self.abort_stream();
        self.flush();
        true
    }

    /// Single exit path of every session that got its backend running.
    fn flush(&mut self) {
        if let Some(work) = self.session.work.take() {
            self.scheduler.remove_work(work);
        }
        let completed = self.session.samples_played == self.session.number_of_samples;
        match self.session.backend.take() {
            Some(Backend::Streaming { stream, .. }) => drop(stream),
            Some(Backend::Direct { mut handle }) => {
                if !completed {
                    handle.reset();
                }
                drop(handle);
            }
            None => {}
        }
        if self.session.synthesized {
            tracing::debug!("releasing synthesized buffer");
            self.session.synthesized = false;
        }
        self.session.buffer = None;
        self.is_playing = false;
        self.session.clamp_played();
        let played = self.session.samples_played;
        if let Some(mut cb) = self.session.callback.take() {
            cb(played);
        }
        tracing::debug!(
            samples_played = played,
            of = self.session.number_of_samples,
            explicit = self.session.explicit_stop,
            "playback flushed"
        );
    }

    /// Teardown for a call that failed before playback got going.
    fn abandon(&mut self) {
        if let Some(work) = self.session.work.take() {
            self.scheduler.remove_work(work);
        }
        self.session.backend = None;
        self.session.buffer = None;
        self.session.synthesized = false;
        self.session.callback = None;
        self.is_playing = false;
    }

    fn fail_mid_stream(&mut self, e: std::io::Error) -> AudioError {
        tracing::warn!("cannot write audio output: {e}");
        self.flush();
        AudioError::Write(e)
    }

    fn drain_direct(&mut self) -> std::io::Result<()> {
        match self.session.backend.as_mut() {
            Some(Backend::Direct { handle }) => handle.drain(),
            _ => Ok(()),
        }
    }

    fn abort_stream(&mut self) {
        if let Some(Backend::Streaming { stream, .. }) = self.session.backend.as_mut() {
            stream.abort();
        }
    }

    fn schedule(&mut self) {
        let work = self.scheduler.add_work();
        self.session.work = Some(work);
    }

    /// Frames heard since the session started, per the wall clock.
    fn heard_frames(&self, latency: std::time::Duration) -> usize {
        let elapsed = self.clock.now().saturating_sub(self.session.started_at);
        clock::frames_elapsed(elapsed, latency, self.session.sample_rate)
    }

    /// Device-reported position if available, else time-derived; never beyond what was sent.
    fn direct_position(&self) -> usize {
        let position = match &self.session.backend {
            Some(Backend::Direct { handle }) => handle.position(),
            _ => None,
        };
        position
            .unwrap_or_else(|| self.heard_frames(std::time::Duration::ZERO))
            .min(self.session.samples_sent)
    }

    /// Report progress and poll both interruption sources.
    fn should_interrupt(&mut self) -> bool {
        let asynchronicity = self.session.asynchronicity;
        if asynchronicity != Asynchronicity::Synchronous && self.session.report() == Progress::Stop {
            return true;
        }
        if self.session.is_interrupted() {
            return true;
        }
        if asynchronicity == Asynchronicity::Interruptable && self.cancel_key.pressed() {
            self.session.explicit_stop = true;
            return true;
        }
        false
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Frames played by the current or last session.
    pub fn samples_played(&self) -> usize {
        self.session.samples_played
    }

    pub fn stop_was_explicit(&self) -> bool {
        self.session.explicit_stop
    }

    /// Whether an asynchronous session is waiting to be pumped.
    pub fn has_pending_work(&self) -> bool {
        self.session.work.is_some()
    }

    /// Interrupt handle for the session playing now.
    pub fn interrupt_handle(&self) -> Option<InterruptHandle> {
        self.is_playing.then(|| self.session.interrupt_handle())
    }

    /// Error that ended the last pumped session, if any.
    pub fn take_error(&mut self) -> Option<AudioError> {
        self.last_error.take()
    }

    /// `samples` wrapped in the configured leading and trailing silence.
    pub fn padded(&self, samples: &[i16], channels: u16, sample_rate: u32) -> Result<Vec<i16>> {
        let (before, after) = self.prefs.silence_frames(sample_rate);
        mix::pad_with_silence(samples, channels, before, after)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::from_session(&self.session, self.is_playing)
    }

    pub fn preferences(&self) -> &AudioPreferences {
        &self.prefs
    }

    /// Does not stop current playback; the new ceiling applies from the next call.
    pub fn set_maximum_asynchronicity(&mut self, level: Asynchronicity) {
        self.prefs.maximum_asynchronicity = level;
    }

    pub fn maximum_asynchronicity(&self) -> Asynchronicity {
        self.prefs.maximum_asynchronicity
    }

    pub fn set_output_uses_streaming(&mut self, value: bool) {
        self.stop_playing(StopKind::Implicit);
        self.prefs.output_uses_streaming = value;
    }

    pub fn output_uses_streaming(&self) -> bool {
        self.prefs.output_uses_streaming
    }

    pub fn set_input_uses_streaming(&mut self, value: bool) {
        self.prefs.input_uses_streaming = value;
    }

    pub fn input_uses_streaming(&self) -> bool {
        self.prefs.input_uses_streaming
    }

    pub fn set_use_internal_speaker(&mut self, value: bool) {
        self.stop_playing(StopKind::Implicit);
        self.prefs.use_internal_speaker = value;
    }

    pub fn use_internal_speaker(&self) -> bool {
        self.prefs.use_internal_speaker
    }

    pub fn set_silence_before(&mut self, seconds: f64) {
        self.stop_playing(StopKind::Implicit);
        self.prefs.silence_before = seconds;
    }

    pub fn silence_before(&self) -> f64 {
        self.prefs.silence_before
    }

    pub fn set_silence_after(&mut self, seconds: f64) {
        self.stop_playing(StopKind::Implicit);
        self.prefs.silence_after = seconds;
    }

    pub fn silence_after(&self) -> f64 {
        self.prefs.silence_after
    }
}

fn validate(buffer: &[i16], sample_rate: u32, frames: usize, channels: u16) -> Result<()> {
    if sample_rate == 0 {
        return Err(AudioError::InvalidBuffer("sample rate is zero".to_string()));
    }
    if channels == 0 {
        return Err(AudioError::InvalidBuffer("no channels".to_string()));
    }
    if frames == 0 {
        return Err(AudioError::InvalidBuffer("no samples".to_string()));
    }
    let expected = frames.checked_mul(channels as usize);
    if expected != Some(buffer.len()) {
        return Err(AudioError::InvalidBuffer(format!(
            "{} samples for {frames} frames of {channels} channels",
            buffer.len()
        )));
    }
    Ok(())
}
