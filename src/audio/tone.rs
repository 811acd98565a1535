use std::f32::consts::TAU;
use std::time::Duration;

use crate::audio::codec::PcmBuffer;

pub const TEST_TONE_DURATION: Duration = Duration::from_millis(300);

/// Speaker check chirp: a sine sweeping 440 -> 880 Hz with the gain
/// falling 0.1 -> 0.01, both on exponential ramps.
pub fn test_tone(sample_rate: u32) -> PcmBuffer {
    sweep(sample_rate, TEST_TONE_DURATION, (440.0, 880.0), (0.1, 0.01))
}

pub fn sweep(sample_rate: u32, duration: Duration, freq: (f32, f32), gain: (f32, f32)) -> PcmBuffer {
    let len = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
    let mut samples = Vec::with_capacity(len);
    let mut phase = 0.0f32;

    for i in 0..len {
        let t = if len > 1 { i as f32 / (len - 1) as f32 } else { 0.0 };
        let f = exp_ramp(freq.0, freq.1, t);
        let g = exp_ramp(gain.0, gain.1, t);
        samples.push(phase.sin() * g);
        phase = (phase + TAU * f / sample_rate as f32) % TAU;
    }

    PcmBuffer::new(samples, sample_rate)
}

fn exp_ramp(from: f32, to: f32, t: f32) -> f32 {
    from * (to / from).powf(t)
}
