//! Audio frame codec: formats, resampling, loudness, and transport encoding.
//!
//! Everything here is pure: the capture pipeline and playback scheduler own
//! the side effects, this module only converts between representations.

use crate::error::{Result, VoiceError};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Fixed sample rate for audio sent to the model.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Default sample rate for audio received from the model.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Outbound chunk size in samples: 100 ms at 16 kHz.
pub const FRAME_SAMPLES: usize = 1_600;

/// Normalized RMS below which a frame counts as silent (~-40 dB).
pub const SILENCE_RMS: f32 = 0.01;

/// Complete audio format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono).
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// PCM16 mono at 16 kHz (model input format).
    pub fn pcm16_16khz() -> Self {
        Self { sample_rate: INPUT_SAMPLE_RATE, channels: 1, bits_per_sample: 16 }
    }

    /// PCM16 mono at 24 kHz (default model output format).
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: OUTPUT_SAMPLE_RATE, channels: 1, bits_per_sample: 16 }
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample / 8) as u32
    }

    /// The `audio/pcm;rate=N` mime tag for this format.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// A buffer of PCM16 samples tagged with its sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Mono PCM16 samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from samples at the given rate.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Normalized root-mean-square loudness in `[0, 1]`.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let norm = s as f64 / i16::MAX as f64;
                norm * norm
            })
            .sum();
        (sum_sq / self.samples.len() as f64).sqrt() as f32
    }

    /// Whether this frame falls below the silence threshold.
    pub fn is_silent(&self) -> bool {
        self.rms() < SILENCE_RMS
    }

    /// Serialize samples as little-endian PCM16 bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        data
    }

    /// Parse little-endian PCM16 bytes into a frame at `sample_rate`.
    pub fn from_le_bytes(data: &[u8], sample_rate: u32) -> Result<Self> {
        if data.len() % 2 != 0 {
            return Err(VoiceError::protocol(format!(
                "invalid PCM16 payload length {} (must be even)",
                data.len()
            )));
        }
        let samples =
            data.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
        Ok(Self { samples, sample_rate })
    }

    /// Encode this frame as base64 text for the transport.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_le_bytes())
    }

    /// Decode a frame from transport base64 at the declared rate.
    pub fn from_base64(encoded: &str, sample_rate: u32) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| VoiceError::protocol(format!("invalid base64 audio: {e}")))?;
        Self::from_le_bytes(&data, sample_rate)
    }
}

/// Parse the sample rate out of an `audio/pcm;rate=24000`-style mime tag.
///
/// Falls back to [`OUTPUT_SAMPLE_RATE`] when the tag carries no rate.
pub fn rate_from_mime(tag: &str) -> u32 {
    tag.split(';')
        .filter_map(|part| part.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
        .unwrap_or(OUTPUT_SAMPLE_RATE)
}

/// Resample float samples to the fixed input rate via block averaging.
///
/// Pass-through (clamp only) when the source already runs at the input rate.
/// Decimation averages each source window into one output sample, which is
/// enough for speech headed into a 16 kHz model input.
pub fn resample_to_input_rate(samples: &[f32], source_rate: u32) -> AudioFrame {
    if source_rate == INPUT_SAMPLE_RATE {
        let samples = samples.iter().map(|&s| clamp_to_i16(s)).collect();
        return AudioFrame::new(samples, INPUT_SAMPLE_RATE);
    }

    let ratio = source_rate as f64 / INPUT_SAMPLE_RATE as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let start = (i as f64 * ratio) as usize;
        let end = ((i + 1) as f64 * ratio) as usize;
        let end = end.min(samples.len()).max(start + 1);
        let window = &samples[start..end];
        let avg = window.iter().sum::<f32>() / window.len() as f32;
        out.push(clamp_to_i16(avg));
    }
    AudioFrame::new(out, INPUT_SAMPLE_RATE)
}

fn clamp_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
