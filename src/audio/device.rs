use std::sync::Arc;
use std::time::Duration;

use crate::audio::capture::CpalInput;
use crate::audio::codec::PcmBuffer;
use crate::audio::playback::CpalOutput;
use crate::error::DeviceError;
use crate::kernel::time::AudioClock;

/// Producer half of the lock-free capture ring. The device callback is the
/// only writer.
pub type SampleProducer = ringbuf::HeapProd<f32>;
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Identifies one scheduled buffer on an output device.
pub type VoiceId = u64;

/// A microphone. Pushes mono f32 samples at `sample_rate()` into the ring.
pub trait InputDevice: Send {
    /// Native rate of the samples pushed into the ring.
    fn sample_rate(&self) -> u32;

    fn start(&mut self, producer: SampleProducer) -> Result<(), DeviceError>;

    /// Release the device. Must tolerate being called more than once.
    fn close(&mut self);
}

/// A speaker with its own media clock.
pub trait OutputDevice: Send {
    fn sample_rate(&self) -> u32;

    fn clock(&self) -> Arc<dyn AudioClock>;

    /// Play `buffer` starting exactly at `start` on `clock()`.
    fn schedule(&mut self, voice: VoiceId, buffer: &PcmBuffer, start: Duration);

    /// Silence and discard every scheduled voice.
    fn stop_all(&mut self);

    fn close(&mut self);
}

pub trait AudioBackend: Send + Sync {
    fn open_input(&self) -> Result<Box<dyn InputDevice>, DeviceError>;

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputDevice>, DeviceError>;
}

/// Default host devices via cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&self) -> Result<Box<dyn InputDevice>, DeviceError> {
        Ok(Box::new(CpalInput::open_default()?))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputDevice>, DeviceError> {
        Ok(Box::new(CpalOutput::open_default(sample_rate)?))
    }
}
