//! Streaming strategy: a callback-driven output stream fed from a fixed buffer.
//!
//! The real-time callback copies successive chunks of the session buffer into
//! the device buffer and pads any shortfall with silence. It shares only
//! atomics with the rest of the engine:
//! - the interruption flag (read here, set by the engine or an [`crate::InterruptHandle`])
//! - the sent-frames counter and a latency estimate (written here, read by the pump)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::error::{AudioError, Result};

/// Format negotiated for one output stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A callback-driven audio library the engine can stream through.
pub trait StreamingBackend {
    /// Most output channels the current device can open.
    fn max_output_channels(&mut self) -> Result<u16>;

    /// Open (but do not start) a stream whose callback drains `feed`.
    fn open(&mut self, format: StreamFormat, feed: Arc<StreamFeed>) -> Result<Box<dyn OutputStream>>;

    fn name(&self) -> &'static str {
        "streaming"
    }
}

/// An opened output stream. Dropping it closes the stream.
pub trait OutputStream {
    fn start(&mut self) -> Result<()>;

    /// Delay between the callback writing a frame and that frame being heard.
    fn output_latency(&self) -> Duration;

    /// Stop immediately, discarding whatever is queued in the device.
    fn abort(&mut self);
}

/// What the callback tells the stream after a fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackFlow {
    Continue,
    /// Nothing left to play (or interrupted); the output was silence.
    Complete,
}

/// The session buffer as seen from the real-time callback.
pub struct StreamFeed {
    samples: Arc<[i16]>,
    channels: usize,
    frames: usize,
    frames_sent: AtomicUsize,
    interrupted: Arc<AtomicBool>,
    latency_us: AtomicU64,
}

impl StreamFeed {
    /// `samples` must hold a whole number of `channels`-wide frames.
    pub fn new(samples: Arc<[i16]>, channels: u16, interrupted: Arc<AtomicBool>) -> Self {
        let channels = channels.max(1) as usize;
        let frames = samples.len() / channels;
        Self {
            samples,
            channels,
            frames,
            frames_sent: AtomicUsize::new(0),
            interrupted,
            latency_us: AtomicU64::new(0),
        }
    }

    /// Real-time callback body: never blocks, never allocates.
    pub fn fill<T: Copy>(&self, out: &mut [T], silence: T, convert: impl Fn(i16) -> T) -> CallbackFlow {
        if self.interrupted.load(Ordering::Acquire) {
            out.fill(silence);
            return CallbackFlow::Complete;
        }
        let sent = self.frames_sent.load(Ordering::Relaxed);
        let left = self.frames - sent;
        if left == 0 {
            out.fill(silence);
            return CallbackFlow::Complete;
        }
        let dframes = left.min(out.len() / self.channels);
        let src = &self.samples[sent * self.channels..(sent + dframes) * self.channels];
        for (o, &s) in out.iter_mut().zip(src) {
            *o = convert(s);
        }
        out[src.len()..].fill(silence);
        self.frames_sent.store(sent + dframes, Ordering::Release);
        CallbackFlow::Continue
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::Acquire)
    }

    pub fn frames_left(&self) -> usize {
        self.frames - self.frames_sent()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn record_latency(&self, latency: Duration) {
        self.latency_us.store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us.load(Ordering::Relaxed))
    }
}

/// Build a CPAL output stream that plays `feed`.
///
/// Samples are converted from `i16` to whatever format the device runs in.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    feed: &Arc<StreamFeed>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, feed),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, feed),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, feed),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, feed),
        other => {
            tracing::warn!(format = ?other, "unsupported device sample format");
            Err(AudioError::SampleFormatRejected)
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    feed: &Arc<StreamFeed>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<i16> + Send + 'static,
{
    let feed_cb = feed.clone();
    let silence = <T as cpal::Sample>::EQUILIBRIUM;
    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                let ts = info.timestamp();
                if let Some(latency) = ts.playback.duration_since(&ts.callback) {
                    feed_cb.record_latency(latency);
                }
                // cpal keeps calling until the stream is dropped, so a finished
                // feed just repeats silence; the engine watches frames_left().
                let _ = feed_cb.fill(data, silence, <T as cpal::Sample>::from_sample::<i16>);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::Stream(format!("cannot open sound output: {e}")))
}

/// [`OutputStream`] over a live CPAL stream.
pub struct CpalStream {
    stream: cpal::Stream,
    feed: Arc<StreamFeed>,
}

impl CpalStream {
    pub fn new(stream: cpal::Stream, feed: Arc<StreamFeed>) -> Self {
        Self { stream, feed }
    }
}

impl OutputStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| AudioError::Stream(format!("cannot start sound output: {e}")))
    }

    fn output_latency(&self) -> Duration {
        self.feed.latency()
    }

    fn abort(&mut self) {
        self.feed.interrupt();
        if let Err(e) = self.stream.pause() {
            tracing::warn!("stream pause failed: {e}");
        }
    }
}
