use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use crate::audio::codec::PcmBuffer;
use crate::audio::device::{OutputDevice, VoiceId};
use crate::audio::resample::resample_to_len;
use crate::error::DeviceError;
use crate::kernel::time::{AudioClock, FrameClock};

struct Voice {
    id: VoiceId,
    samples: Arc<[f32]>,
    start_frame: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

enum VoiceCommand {
    Play(Voice),
    StopAll,
}

/// Pending commands between `schedule`/`stop_all` and the next callback.
pub const COMMAND_CAPACITY: usize = 256;
/// Voices the mixer can hold before its table has to grow.
const VOICE_CAPACITY: usize = 256;

/// Scheduling side of the voice queue. Never blocks.
pub struct VoiceSender {
    commands: HeapProd<VoiceCommand>,
}

/// Render side of the voice queue, owned by the output callback. Holds the
/// voice table, so rendering never contends with scheduling.
pub struct VoiceMixer {
    commands: HeapCons<VoiceCommand>,
    voices: Vec<Voice>,
}

pub fn voice_queue(capacity: usize) -> (VoiceSender, VoiceMixer) {
    let (commands, pending) = HeapRb::<VoiceCommand>::new(capacity.max(1)).split();
    (
        VoiceSender { commands },
        VoiceMixer {
            commands: pending,
            voices: Vec::with_capacity(VOICE_CAPACITY),
        },
    )
}

impl VoiceSender {
    /// Returns false if the queue was full and the voice was dropped.
    pub fn play(&mut self, id: VoiceId, samples: Arc<[f32]>, start_frame: u64) -> bool {
        let command = VoiceCommand::Play(Voice {
            id,
            samples,
            start_frame,
        });
        if self.commands.try_push(command).is_err() {
            warn!("Output command queue full, voice {} dropped", id);
            return false;
        }
        true
    }

    pub fn stop_all(&mut self) -> bool {
        if self.commands.try_push(VoiceCommand::StopAll).is_err() {
            warn!("Output command queue full, stop request dropped");
            return false;
        }
        true
    }
}

impl VoiceMixer {
    /// Apply queued commands in order, then mix every voice overlapping the
    /// block `[base, base + frames)` into `data` (interleaved, zeroed
    /// first). Voices that end inside the block are retired.
    pub fn render(&mut self, data: &mut [f32], channels: usize, base: u64) {
        let channels = channels.max(1);
        data.fill(0.0);

        while let Some(command) = self.commands.try_pop() {
            match command {
                VoiceCommand::Play(voice) => self.voices.push(voice),
                VoiceCommand::StopAll => {
                    if !self.voices.is_empty() {
                        debug!("Stopping voices {:?}", self.voices.iter().map(|v| v.id).collect::<Vec<_>>());
                    }
                    self.voices.clear();
                }
            }
        }

        mix(&self.voices, data, channels, base);
        let block_end = base + (data.len() / channels) as u64;
        self.voices.retain(|v| v.end_frame() > block_end);
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

/// First and one-past-last device frame covered by `[start, start + len)`.
///
/// Both ends are rounded from exact nanosecond counts, so a voice that
/// starts where the previous one ended begins on the previous voice's end
/// frame at any device rate.
pub fn frame_span(start: Duration, len: Duration, rate: u32) -> (u64, u64) {
    (to_frame(start, rate), to_frame(start + len, rate))
}

fn to_frame(at: Duration, rate: u32) -> u64 {
    const NANOS: u128 = 1_000_000_000;
    ((at.as_nanos() * rate as u128 + NANOS / 2) / NANOS) as u64
}

/// Default speaker via cpal, with a sample-accurate clock.
///
/// Voices reach the output callback through a lock-free SPSC queue; the
/// callback owns the voice table, mixes every voice overlapping the block
/// it renders, and advances the frame clock by exactly the block length.
pub struct CpalOutput {
    sample_rate: u32,
    clock: Arc<FrameClock>,
    voices: VoiceSender,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn open_default(preferred_rate: u32) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NotFound("output"))?;
        info!("Audio Output Device: {}", device.name().unwrap_or_default());

        let supported = select_config(&device, preferred_rate)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!("Audio Output Selected: Rate={}Hz, Channels={}", sample_rate, channels);

        let clock = Arc::new(FrameClock::new(sample_rate));
        let (voices, mixer) = voice_queue(COMMAND_CAPACITY);

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), DeviceError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread_clock = clock.clone();

        let thread = std::thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || match build_stream(preferred_rate, sample_rate, channels, thread_clock, mixer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| DeviceError::Stream(format!("output thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                sample_rate,
                clock,
                voices,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::Stream("output thread exited before the stream started".to_string()))
            }
        }
    }
}

impl OutputDevice for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clock(&self) -> Arc<dyn AudioClock> {
        self.clock.clone()
    }

    fn schedule(&mut self, voice: VoiceId, buffer: &PcmBuffer, start: Duration) {
        let (start_frame, end_frame) = frame_span(start, buffer.duration(), self.sample_rate);
        let len = (end_frame - start_frame) as usize;
        let samples: Arc<[f32]> = if buffer.sample_rate == self.sample_rate && buffer.len() == len {
            buffer.samples.clone()
        } else {
            resample_to_len(&buffer.samples, len).into()
        };

        self.voices.play(voice, samples, start_frame);
    }

    fn stop_all(&mut self) {
        self.voices.stop_all();
    }

    fn close(&mut self) {
        self.voices.stop_all();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("cpal output thread panicked");
            }
            info!("Audio output released");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn select_config(device: &cpal::Device, rate: u32) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| DeviceError::Denied(e.to_string()))?;
    for range in configs {
        if range.sample_format() == cpal::SampleFormat::F32
            && range.min_sample_rate().0 <= rate
            && range.max_sample_rate().0 >= rate
        {
            return Ok(range.with_sample_rate(cpal::SampleRate(rate)));
        }
    }

    let def = device
        .default_output_config()
        .map_err(|e| DeviceError::Unsupported(e.to_string()))?;
    if def.sample_format() != cpal::SampleFormat::F32 {
        return Err(DeviceError::Unsupported(format!("output sample format {:?}", def.sample_format())));
    }
    Ok(def)
}

fn build_stream(
    preferred_rate: u32,
    rate: u32,
    channels: u16,
    clock: Arc<FrameClock>,
    mut mixer: VoiceMixer,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NotFound("output"))?;

    let supported = select_config(&device, preferred_rate)?;
    if supported.sample_rate().0 != rate || supported.channels() != channels {
        return Err(DeviceError::Stream("default output device changed while opening".to_string()));
    }

    let config: cpal::StreamConfig = supported.into();
    let channels = channels.max(1) as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                mixer.render(data, channels, clock.frames());
                clock.advance(frames as u64);
            },
            |err| error!("an error occurred on output stream: {}", err),
            None,
        )
        .map_err(|e| DeviceError::Stream(e.to_string()))?;

    stream.play().map_err(|e| DeviceError::Stream(e.to_string()))?;
    Ok(stream)
}

fn mix(voices: &[Voice], data: &mut [f32], channels: usize, base: u64) {
    let frames = (data.len() / channels) as u64;
    let block_end = base + frames;

    for voice in voices {
        let from = voice.start_frame.max(base);
        let to = voice.end_frame().min(block_end);
        for pos in from..to {
            let sample = voice.samples[(pos - voice.start_frame) as usize];
            let offset = (pos - base) as usize * channels;
            for out in &mut data[offset..offset + channels] {
                *out = (*out + sample).clamp(-1.0, 1.0);
            }
        }
    }
}
