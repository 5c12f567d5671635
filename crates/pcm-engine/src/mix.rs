//! Channel conversions applied before a buffer reaches a device.
//!
//! All buffers are interleaved 16-bit PCM. Conversions that need a new buffer
//! reserve it with `try_reserve_exact`, so running out of memory is an error
//! rather than an abort.

use crate::error::{AudioError, Result};

fn alloc(len: usize, what: &str) -> Result<Vec<i16>> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| AudioError::OutOfMemory(format!("{what}: {len} samples")))?;
    Ok(out)
}

/// Reduce `in_channels` to `out_channels`.
///
/// 4 → 2 averages adjacent pairs; every other reduction uses
/// [`downmix_grouped`]. The two rules do not agree bit-for-bit in every case.
pub fn reduce_channels(
    samples: &[i16],
    frames: usize,
    in_channels: u16,
    out_channels: u16,
) -> Result<Vec<i16>> {
    if in_channels == 4 && out_channels == 2 {
        downmix_pairs(samples, frames)
    } else {
        downmix_grouped(samples, frames, in_channels, out_channels)
    }
}

/// 4 → 2: `[a, b, c, d]` becomes `[(a + b) / 2, (c + d) / 2]`, truncating.
pub fn downmix_pairs(samples: &[i16], frames: usize) -> Result<Vec<i16>> {
    let mut out = alloc(frames * 2, "4-to-2 downmix")?;
    for frame in samples.chunks_exact(4).take(frames) {
        let (a, b, c, d) = (
            frame[0] as i32,
            frame[1] as i32,
            frame[2] as i32,
            frame[3] as i32,
        );
        out.push(((a + b) / 2) as i16);
        out.push(((c + d) / 2) as i16);
    }
    Ok(out)
}

/// N → M: each output channel averages a contiguous run of `N / M` inputs;
/// the last output channel also takes the `N % M` leftovers.
pub fn downmix_grouped(
    samples: &[i16],
    frames: usize,
    in_channels: u16,
    out_channels: u16,
) -> Result<Vec<i16>> {
    if out_channels == 0 || out_channels > in_channels {
        return Err(AudioError::InvalidBuffer(format!(
            "cannot reduce {in_channels} channels to {out_channels}"
        )));
    }
    let (n, m) = (in_channels as usize, out_channels as usize);
    let per_out = n / m;
    let mut out = alloc(frames * m, "channel downmix")?;
    for frame in samples.chunks_exact(n).take(frames) {
        let mut pos = 0;
        for iout in 0..m {
            let count = if iout + 1 == m { per_out + n % m } else { per_out };
            let sum: i32 = frame[pos..pos + count].iter().map(|&s| s as i32).sum();
            pos += count;
            out.push((sum / count as i32) as i16);
        }
    }
    Ok(out)
}

/// Mono → stereo for drivers that refuse mono: each sample lands in both channels.
pub fn duplicate_mono(samples: &[i16]) -> Result<Vec<i16>> {
    let mut out = alloc(samples.len() * 2, "fake mono")?;
    for &s in samples {
        out.push(s);
        out.push(s);
    }
    Ok(out)
}

/// Surround `samples` with `before` and `after` frames of silence.
pub fn pad_with_silence(
    samples: &[i16],
    channels: u16,
    before: usize,
    after: usize,
) -> Result<Vec<i16>> {
    let ch = channels as usize;
    let len = before
        .checked_add(after)
        .and_then(|frames| frames.checked_mul(ch))
        .and_then(|silence| silence.checked_add(samples.len()))
        .ok_or_else(|| {
            AudioError::OutOfMemory(format!("silence padding: {before} + {after} frames overflow"))
        })?;
    let mut out = alloc(len, "silence padding")?;
    out.resize(before * ch, 0);
    out.extend_from_slice(samples);
    out.resize(out.len() + after * ch, 0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_to_two_averages_pairs() {
        let out = reduce_channels(&[100, 200, 300, 400, -1, 0, 7, 8], 2, 4, 2).unwrap();
        assert_eq!(out, vec![150, 350, 0, 7]);
    }

    #[test]
    fn pair_average_does_not_overflow() {
        let out = downmix_pairs(&[i16::MAX, i16::MAX, i16::MIN, i16::MIN], 1).unwrap();
        assert_eq!(out, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn grouped_folds_remainder_into_last_channel() {
        // 5 -> 2: first output averages 2 inputs, last averages 3.
        let out = downmix_grouped(&[10, 20, 30, 40, 51], 1, 5, 2).unwrap();
        assert_eq!(out, vec![15, 40]);
    }

    #[test]
    fn grouped_six_to_four() {
        // per_out = 1, remainder 2 goes to channel 4.
        let out = downmix_grouped(&[1, 2, 3, 4, 5, 7], 1, 6, 4).unwrap();
        assert_eq!(out, vec![1, 2, 3, 5]);
    }

    #[test]
    fn grouped_truncates_toward_zero() {
        let out = downmix_grouped(&[-4, 0, 0], 1, 3, 1).unwrap();
        assert_eq!(out, vec![-1]);
    }

    #[test]
    fn grouped_rejects_upmix() {
        assert!(downmix_grouped(&[1, 2], 1, 2, 3).is_err());
    }

    #[test]
    fn duplicate_mono_doubles_length() {
        let out = duplicate_mono(&[1, -2, 3]).unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(out, vec![1, 1, -2, -2, 3, 3]);
    }

    #[test]
    fn pad_with_silence_wraps_signal() {
        let out = pad_with_silence(&[5, 6], 2, 1, 2).unwrap();
        assert_eq!(out, vec![0, 0, 5, 6, 0, 0, 0, 0]);
    }

    #[test]
    fn pad_with_silence_overflow_is_out_of_memory() {
        let err = pad_with_silence(&[1, 2], 2, usize::MAX / 2, 2).unwrap_err();
        assert!(matches!(err, AudioError::OutOfMemory(_)));
        assert!(matches!(pad_with_silence(&[1], 1, usize::MAX, 1), Err(AudioError::OutOfMemory(_))));
    }
}
