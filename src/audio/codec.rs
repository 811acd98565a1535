//! FrameCodec: normalized f32 PCM <-> 16-bit little-endian wire frames.
//!
//! Pure and stateless. Capture and playback rates are fixed per session,
//! so the rate travels out-of-band and is only attached on decode.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

use crate::error::CodecError;

/// One quantization step of the 16-bit wire format.
pub const QUANTUM: f32 = 1.0 / 32768.0;

/// Decoded mono PCM tagged with the rate it must be played at.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Scale to the signed 16-bit range and pack little-endian.
///
/// Samples are scaled by 32768 and clamped to `i16::MAX`, so full-scale
/// input (>= 1.0) saturates instead of wrapping, and every value in
/// [-1, 1] survives a round trip within one `QUANTUM`.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    out
}

/// Interpret bytes as signed 16-bit LE samples and normalize by 32768.
pub fn decode(bytes: &[u8], out_rate: u32) -> Result<PcmBuffer, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::Truncated { len: bytes.len() });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect::<Vec<_>>();

    Ok(PcmBuffer::new(samples, out_rate))
}

/// Text-safe variant for JSON transports.
pub fn encode_base64(samples: &[f32]) -> String {
    BASE64_STANDARD.encode(encode(samples))
}

pub fn decode_base64(data: &str, out_rate: u32) -> Result<PcmBuffer, CodecError> {
    let bytes = BASE64_STANDARD.decode(data).map_err(|_| CodecError::Base64)?;
    decode(&bytes, out_rate)
}

fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
