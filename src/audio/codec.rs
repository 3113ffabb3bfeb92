//! Conversions between raw PCM, wire-safe base64 text, and playable buffers.
//!
//! Outbound microphone frames travel as base64-encoded little-endian 16-bit
//! PCM at 16kHz; inbound assistant audio arrives the same way at 24kHz.

use crate::error::{Result, YukiError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Sample rate of outbound microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of inbound assistant audio.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per outbound capture frame.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// MIME type attached to every outbound chunk.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Mono f32 samples ready to hand to an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    /// Mono samples in [-1, 1].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PlayableBuffer {
    /// Create a buffer from mono samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Return a copy of this buffer at `target_rate`.
    pub fn resampled(&self, target_rate: u32) -> Self {
        Self {
            samples: resample_linear(&self.samples, self.sample_rate, target_rate),
            sample_rate: target_rate,
        }
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert float samples to 16-bit PCM by scaling with 32768 and truncating.
///
/// Products outside the i16 range saturate rather than wrap.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| (s * 32768.0) as i16).collect()
}

/// Convert 16-bit PCM back to float samples in [-1, 1).
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Pack samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    data
}

/// Unpack little-endian bytes into samples.
///
/// # Errors
///
/// Returns [`YukiError::Decode`] if the byte count is odd.
pub fn bytes_to_pcm16(data: &[u8]) -> Result<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(YukiError::Decode(format!(
            "invalid PCM16 length {} (must be even)",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode bytes as standard padded base64.
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard padded base64.
///
/// # Errors
///
/// Returns [`YukiError::Decode`] on malformed input.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| YukiError::Decode(format!("invalid base64: {e}")))
}

/// Encode one captured frame into its wire representation.
pub fn encode_pcm_frame(samples: &[f32]) -> String {
    encode_base64(&pcm16_to_bytes(&float_to_pcm16(samples)))
}

/// Decode an inbound base64 PCM16 chunk into a playable mono buffer.
///
/// # Errors
///
/// Returns [`YukiError::Decode`] if the payload is not valid base64 PCM16.
pub fn decode_pcm_chunk(encoded: &str, sample_rate: u32) -> Result<PlayableBuffer> {
    let bytes = decode_base64(encoded)?;
    let pcm = bytes_to_pcm16(&bytes)?;
    Ok(PlayableBuffer::new(pcm16_to_float(&pcm), sample_rate))
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = usize::from(channels);
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Adequate for speech in both directions (48kHz → 16kHz capture,
/// 24kHz → device rate playback).
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}

/// Streaming form of [`resample_linear`] for audio that arrives in blocks.
///
/// The read position and the last input sample carry over between calls, so
/// a stream split into blocks resamples to the same output as the whole
/// stream would, with no samples lost at block edges.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    step: f64,
    /// Position of the next output sample, relative to `last` when set.
    position: f64,
    last: Option<f32>,
}

impl LinearResampler {
    /// Create a resampler converting `src_rate` to `dst_rate`.
    pub fn new(src_rate: u32, dst_rate: u32) -> Self {
        let step = if dst_rate == 0 {
            1.0
        } else {
            f64::from(src_rate) / f64::from(dst_rate)
        };
        Self {
            src_rate,
            dst_rate,
            step,
            position: 0.0,
            last: None,
        }
    }

    /// Input rate in Hz.
    pub fn src_rate(&self) -> u32 {
        self.src_rate
    }

    /// Resample the next block of the stream.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.src_rate == self.dst_rate || self.src_rate == 0 || self.dst_rate == 0 {
            return input.to_vec();
        }
        let Some(&tail) = input.last() else {
            return Vec::new();
        };

        let offset = usize::from(self.last.is_some());
        let len = input.len() + offset;
        let last = self.last.unwrap_or(0.0);
        let at = |i: usize| -> f64 {
            if i < offset {
                f64::from(last)
            } else {
                f64::from(input[i - offset])
            }
        };

        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        while self.position < (len - 1) as f64 {
            let idx = self.position as usize;
            let frac = self.position - idx as f64;
            output.push((at(idx) * (1.0 - frac) + at(idx + 1) * frac) as f32);
            self.position += self.step;
        }

        // The final sample becomes index 0 of the next block.
        self.position -= (len - 1) as f64;
        self.last = Some(tail);
        output
    }

    /// Forget the carried sample and phase.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }
}
