use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::Producer;
use tracing::{error, info, warn};

use crate::audio::device::{InputDevice, SampleProducer};
use crate::error::DeviceError;

// Preferred native rates, capture rate first so the resampler is bypassed.
const PREFERRED_RATES: [u32; 4] = [16000, 48000, 44100, 32000];

/// Default microphone via cpal.
///
/// The cpal stream lives on its own thread for its whole life, so this
/// handle stays `Send` on every host. The data callback only downmixes and
/// pushes into the ring (lossy when full); it never locks or allocates.
pub struct CpalInput {
    sample_rate: u32,
    channels: u16,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInput {
    /// Query the default input device and pick a native rate.
    pub fn open_default() -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(DeviceError::NotFound("input"))?;
        info!("Audio Input Device: {}", device.name().unwrap_or_default());

        let config = select_config(&device)?;
        info!("Audio Config Selected: Rate={}Hz, Channels={}", config.sample_rate().0, config.channels());

        Ok(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            stop_tx: None,
            thread: None,
        })
    }
}

impl InputDevice for CpalInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, producer: SampleProducer) -> Result<(), DeviceError> {
        if self.thread.is_some() {
            return Err(DeviceError::Stream("input already started".to_string()));
        }

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), DeviceError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let rate = self.sample_rate;
        let channels = self.channels;

        let thread = std::thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || match build_stream(rate, channels, producer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Parked until close() drops or signals the sender.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| DeviceError::Stream(format!("input thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::Stream("input thread exited before the stream started".to_string()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("cpal input thread panicked");
            }
            info!("Audio input released");
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn select_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    for &rate in &PREFERRED_RATES {
        let configs = device
            .supported_input_configs()
            .map_err(|e| DeviceError::Denied(e.to_string()))?;
        for range in configs {
            if range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate {
                return Ok(range.with_sample_rate(cpal::SampleRate(rate)));
            }
        }
    }

    // Anything else is handled by the resampler.
    device
        .default_input_config()
        .map_err(|e| DeviceError::Unsupported(e.to_string()))
}

fn build_stream(rate: u32, channels: u16, mut producer: SampleProducer) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(DeviceError::NotFound("input"))?;

    let supported = select_config(&device)?;
    if supported.sample_rate().0 != rate || supported.channels() != channels {
        return Err(DeviceError::Stream("default input device changed while opening".to_string()));
    }

    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let channels = channels.max(1) as usize;
    let err_fn = |err| error!("an error occurred on input stream: {}", err);

    let stream = match format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &_| push_mono(data, channels, &mut producer, |s| s),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &_| push_mono(data, channels, &mut producer, |s| s as f32 / 32768.0),
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &_| {
                push_mono(data, channels, &mut producer, |s| (s as f32 - 32768.0) / 32768.0)
            },
            err_fn,
            None,
        ),
        other => return Err(DeviceError::Unsupported(format!("input sample format {:?}", other))),
    }
    .map_err(|e| DeviceError::Stream(e.to_string()))?;

    stream.play().map_err(|e| DeviceError::Stream(e.to_string()))?;
    Ok(stream)
}

fn push_mono<T: Copy>(input: &[T], channels: usize, producer: &mut SampleProducer, to_f32: impl Fn(T) -> f32) {
    // If the ring is full we drop samples (lossy), never block.
    for frame in input.chunks_exact(channels) {
        let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
        let _ = producer.try_push(sum / channels as f32);
    }
}
