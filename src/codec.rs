//! PCM wire codec
//!
//! Converts between the floating-point samples used by capture and playback
//! and the base64-encoded 16-bit little-endian PCM carried on the Live API
//! socket. Outbound audio is tagged `audio/pcm;rate=16000`, inbound audio
//! arrives at 24 kHz.

use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Sample rate of microphone audio sent to the model
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of audio returned by the model
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const PCM_SCALE: f32 = 32768.0;

/// Codec failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM payload has an odd number of bytes ({0})")]
    OddLength(usize),

    #[error("channel count must be at least 1")]
    NoChannels,
}

/// Base64 audio payload with its format tag, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

/// Decoded, playable audio: one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Wrap a single channel of samples.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples for one channel.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Number of sample frames (samples per channel).
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Average all channels into one.
    pub fn downmix(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.len())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// MIME-style format tag for raw PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Quantize one sample. Truncates toward zero and wraps into 16 bits the
/// way a typed-array store does; inputs outside [-1, 1] are not clamped.
pub fn quantize(sample: f32) -> i16 {
    (sample * PCM_SCALE) as i32 as i16
}

/// Inverse of [`quantize`].
pub fn dequantize(value: i16) -> f32 {
    value as f32 / PCM_SCALE
}

/// Pack float samples as 16-bit little-endian PCM.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    bytes
}

/// Unpack 16-bit little-endian PCM into normalized floats.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| dequantize(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Encode one captured frame for transmission.
pub fn encode_blob(samples: &[f32], sample_rate: u32) -> Blob {
    Blob {
        data: general_purpose::STANDARD.encode(f32_to_pcm16(samples)),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Decode a base64 PCM payload into a playable buffer, de-interleaving
/// `channels` channels. A trailing partial frame is dropped.
pub fn decode_audio(data: &str, sample_rate: u32, channels: usize) -> Result<AudioBuffer, CodecError> {
    if channels == 0 {
        return Err(CodecError::NoChannels);
    }
    let bytes = general_purpose::STANDARD.decode(data)?;
    let samples = pcm16_to_f32(&bytes)?;

    let frames = samples.len() / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, sample) in out.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    Ok(AudioBuffer {
        sample_rate,
        channels: out,
    })
}
