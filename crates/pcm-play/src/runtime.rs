//! pcm-play runtime helpers.
//!
//! Builds the sound, wires the engine to CPAL (or a raw device node) and Ctrl-C,
//! and drives asynchronous playback to the end.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use pcm_engine::device::{self, CpalBackend};
use pcm_engine::direct::PcmFileDevice;
use pcm_engine::{scheduler, AudioEngine, FlagCancelKey, Progress, ProgressCallback, StatusSnapshot};

use crate::config::{PlayConfig, Source};

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)?;
    Ok(())
}

/// Play the configured source and return the engine's final status.
pub fn run_play(config: PlayConfig) -> Result<StatusSnapshot> {
    let (samples, rate, channels) = load_source(&config.source)?;
    if config.prefs.output_uses_streaming && device::best_sample_rate(rate) != rate {
        tracing::warn!(rate_hz = rate, "sample rate is unusual for this platform");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    // Keeps `stop_rx` connected even if the handler cannot be installed.
    let _stop_tx = stop_tx.clone();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            if cancel.swap(true, Ordering::AcqRel) {
                std::process::exit(130);
            }
            let _ = stop_tx.try_send(());
        }) {
            tracing::warn!("cannot install Ctrl-C handler: {e}");
        }
    }

    let streaming = CpalBackend::new(cpal::default_host(), config.device.clone());
    let direct = PcmFileDevice::new(config.direct.clone());
    let mut engine = AudioEngine::new(config.prefs.clone(), Box::new(streaming), Box::new(direct))
        .with_cancel_key(Box::new(FlagCancelKey::new(cancel)));
    engine.set_execution_mode(config.mode);

    let padded = engine.padded(&samples, channels, rate)?;
    let frames = padded.len() / channels as usize;
    tracing::info!(
        frames,
        rate_hz = rate,
        channels,
        streaming = config.prefs.output_uses_streaming,
        "playing"
    );
    let progress: ProgressCallback = Box::new(|played| {
        tracing::trace!(played, "progress");
        Progress::Continue
    });
    engine
        .play16(padded, rate, frames, channels, Some(progress))
        .context("play")?;

    if engine.has_pending_work() {
        let interval = engine.tuning().pump_interval;
        scheduler::drive(&mut engine, interval, &stop_rx);
    }
    if let Some(e) = engine.take_error() {
        return Err(e).context("playback stopped");
    }

    let status = engine.status();
    tracing::info!(
        samples_played = status.samples_played,
        of = status.total_samples,
        elapsed_ms = ?status.elapsed_ms,
        asynchronicity = status.asynchronicity.as_str(),
        explicit_stop = status.explicit_stop,
        "done"
    );
    Ok(status)
}

fn load_source(source: &Source) -> Result<(Vec<i16>, u32, u16)> {
    match source {
        Source::Tone { freq, seconds, rate, channels, amplitude } => {
            Ok((tone(*freq, *seconds, *rate, *channels, *amplitude), *rate, *channels))
        }
        Source::Raw { path, rate, channels } => Ok((read_raw(path, *channels)?, *rate, *channels)),
    }
}

/// Interleaved sine tone, same signal on every channel.
pub fn tone(freq: f64, seconds: f64, rate: u32, channels: u16, amplitude: f64) -> Vec<i16> {
    let frames = (seconds.max(0.0) * rate as f64).round() as usize;
    let peak = amplitude.clamp(0.0, 1.0) * i16::MAX as f64;
    let step = std::f64::consts::TAU * freq / rate.max(1) as f64;
    let mut out = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let v = (peak * (step * i as f64).sin()).round() as i16;
        out.extend(std::iter::repeat_n(v, channels as usize));
    }
    out
}

/// Read headerless s16le PCM; the file must hold whole frames.
pub fn read_raw(path: &Path, channels: u16) -> Result<Vec<i16>> {
    let bytes = std::fs::read(path).with_context(|| format!("read {path:?}"))?;
    let frame_bytes = 2 * channels.max(1) as usize;
    if bytes.is_empty() || bytes.len() % frame_bytes != 0 {
        anyhow::bail!(
            "{path:?}: {} bytes is not a whole number of {channels}-channel 16-bit frames",
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_has_requested_length_and_level() {
        let out = tone(1_000.0, 0.5, 8_000, 2, 0.5);
        assert_eq!(out.len(), 8_000);
        assert!(out.chunks(2).all(|f| f[0] == f[1]));
        let peak = out.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= i16::MAX as u16 / 2 + 1);
        assert!(peak > 16_000);
    }

    #[test]
    fn read_raw_decodes_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.pcm");
        std::fs::write(&path, [0x01, 0x00, 0xff, 0xff]).unwrap();
        assert_eq!(read_raw(&path, 2).unwrap(), vec![1, -1]);
    }

    #[test]
    fn read_raw_rejects_partial_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.pcm");
        std::fs::write(&path, [0u8; 6]).unwrap();
        assert!(read_raw(&path, 2).is_err());
        assert_eq!(read_raw(&path, 1).unwrap().len(), 3);
    }

    #[test]
    fn load_source_passes_format_through() {
        let (samples, rate, channels) = load_source(&Source::Tone {
            freq: 440.0,
            seconds: 0.01,
            rate: 48_000,
            channels: 1,
            amplitude: 0.1,
        })
        .unwrap();
        assert_eq!((samples.len(), rate, channels), (480, 48_000, 1));
    }
}
