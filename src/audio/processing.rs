use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Split};
use ringbuf::HeapRb;
use tracing::{debug, info, trace, warn};

use crate::audio::device::{InputDevice, SampleConsumer};
use crate::audio::resample::LineResampler;
use crate::error::DeviceError;

/// Fixed-length block of capture samples at the capture rate.
/// Moved, never copied, into the encode step.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub seq: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sq_sum: f32 = samples.iter().map(|&x| x * x).sum();
    (sq_sum / samples.len() as f32).sqrt()
}

/// Send-suppression flag. Written by the UI, read by the capture path
/// without blocking.
#[derive(Debug, Clone, Default)]
pub struct MuteFlag(Arc<AtomicBool>);

impl MuteFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, muted: bool) {
        self.0.store(muted, Ordering::Release);
    }

    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Latest per-frame RMS, readable at any time. Side channel only.
#[derive(Debug, Clone, Default)]
pub struct VolumeMeter(Arc<AtomicU32>);

impl VolumeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Cuts a continuous sample stream into fixed-size, sequence-numbered frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    sample_rate: u32,
    buf: Vec<f32>,
    next_seq: u64,
}

impl FrameAssembler {
    pub fn new(frame_len: usize, sample_rate: u32) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            sample_rate,
            buf: Vec::with_capacity(frame_len),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        while !samples.is_empty() {
            let room = self.frame_len - self.buf.len();
            let take = room.min(samples.len());
            self.buf.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.buf.len() == self.frame_len {
                let full = std::mem::replace(&mut self.buf, Vec::with_capacity(self.frame_len));
                let frame = AudioFrame {
                    seq: self.next_seq,
                    samples: full,
                    sample_rate: self.sample_rate,
                };
                self.next_seq += 1;
                emit(frame);
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub frame_len: usize,
    pub ring_capacity: usize,
}

pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send>;

/// Microphone -> fixed-rate, fixed-size frames.
///
/// The device callback only pushes into a lock-free ring. A dedicated
/// thread drains the ring, resamples, frames, meters, and forwards frames
/// to `on_frame` unless muted. Muting suppresses forwarding only; frames
/// are still computed so metering keeps working.
pub struct CaptureLine;

impl CaptureLine {
    pub fn start(
        mut device: Box<dyn InputDevice>,
        settings: CaptureSettings,
        mute: MuteFlag,
        meter: VolumeMeter,
        on_frame: FrameCallback,
    ) -> Result<CaptureHandle, DeviceError> {
        let native_rate = device.sample_rate();
        let resampler = LineResampler::new(native_rate, settings.sample_rate)?;

        let rb = HeapRb::<f32>::new(settings.ring_capacity.max(settings.frame_len));
        let (producer, consumer) = rb.split();

        if let Err(e) = device.start(producer) {
            device.close();
            return Err(e);
        }

        let running = Arc::new(AtomicBool::new(true));
        let worker = LineWorker {
            consumer,
            resampler,
            assembler: FrameAssembler::new(settings.frame_len, settings.sample_rate),
            mute,
            meter,
            on_frame,
            running: running.clone(),
        };

        let thread = match std::thread::Builder::new()
            .name("capture-line".to_string())
            .spawn(move || worker.run())
        {
            Ok(thread) => thread,
            Err(e) => {
                device.close();
                return Err(DeviceError::Stream(format!("capture thread: {}", e)));
            }
        };

        info!("Capture line started: device {}Hz -> {}Hz, {} samples/frame", native_rate, settings.sample_rate, settings.frame_len);

        Ok(CaptureHandle {
            device: Some(device),
            running,
            thread: Some(thread),
        })
    }
}

/// Owns the open device and the drain thread. `stop` is idempotent.
pub struct CaptureHandle {
    device: Option<Box<dyn InputDevice>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn is_running(&self) -> bool {
        self.device.is_some()
    }

    /// Release the device and join the drain thread. Blocks briefly; call
    /// from a blocking context when inside async code.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked during shutdown");
            }
        }

        if let Some(mut device) = self.device.take() {
            device.close();
            info!("Capture line stopped");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LineWorker {
    consumer: SampleConsumer,
    resampler: LineResampler,
    assembler: FrameAssembler,
    mute: MuteFlag,
    meter: VolumeMeter,
    on_frame: FrameCallback,
    running: Arc<AtomicBool>,
}

impl LineWorker {
    fn run(mut self) {
        let mut raw = vec![0.0f32; 1024];
        let mut resampled = Vec::with_capacity(2048);

        while self.running.load(Ordering::Acquire) {
            if self.consumer.occupied_len() == 0 {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }

            let n = self.consumer.pop_slice(&mut raw);
            resampled.clear();
            self.resampler.process(&raw[..n], &mut resampled);

            let mute = &self.mute;
            let meter = &self.meter;
            let on_frame = &mut self.on_frame;
            self.assembler.push(&resampled, |frame| {
                meter.store(rms(&frame.samples));
                if mute.get() {
                    trace!("Frame {} suppressed (muted)", frame.seq);
                } else {
                    on_frame(frame);
                }
            });
        }

        debug!("Capture drain loop exited");
    }
}
