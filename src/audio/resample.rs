use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::DeviceError;

const CHUNK: usize = 1024;

/// Streaming mono resampler from a device's native rate to a fixed target.
/// Passes samples through untouched when the rates already match.
pub struct LineResampler {
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl LineResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, DeviceError> {
        if from_rate == to_rate {
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
            });
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = to_rate as f64 / from_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK, 1)
            .map_err(|e| DeviceError::Unsupported(format!("resampler {}Hz -> {}Hz: {}", from_rate, to_rate, e)))?;

        Ok(Self {
            inner: Some(inner),
            pending: Vec::with_capacity(CHUNK * 2),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed `input`, append whatever output is ready to `out`. Input that
    /// does not fill a whole resampler chunk is held until the next call.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return;
        };

        self.pending.extend_from_slice(input);

        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(mut channels) => {
                    if let Some(mono) = channels.pop() {
                        out.extend_from_slice(&mono);
                    }
                }
                Err(e) => {
                    tracing::warn!("Resampler chunk dropped: {}", e);
                }
            }
        }
    }
}

/// One-shot linear interpolation for whole playback buffers whose rate
/// differs from the output device. Cheap and adequate for speech.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as u64 * to_rate as u64) / from_rate as u64) as usize;
    resample_to_len(samples, out_len)
}

/// Stretch or squeeze `samples` to exactly `out_len` samples by linear
/// interpolation. Playback uses this to fill a voice's exact frame span.
pub fn resample_to_len(samples: &[f32], out_len: usize) -> Vec<f32> {
    if samples.is_empty() {
        return vec![0.0; out_len];
    }
    if samples.len() == out_len {
        return samples.to_vec();
    }

    let step = samples.len() as f64 / out_len as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}
