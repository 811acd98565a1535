use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::traits::Producer;

use crate::audio::codec::PcmBuffer;
use crate::audio::device::{AudioBackend, InputDevice, OutputDevice, SampleProducer, VoiceId};
use crate::error::DeviceError;
use crate::kernel::time::{AudioClock, ManualClock};

/// One `schedule` call as seen by a mock output.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledVoice {
    pub voice: VoiceId,
    pub start: Duration,
    pub samples: usize,
    pub sample_rate: u32,
}

#[derive(Default)]
struct Shared {
    inputs_opened: AtomicUsize,
    inputs_closed: AtomicUsize,
    outputs_opened: AtomicUsize,
    outputs_closed: AtomicUsize,
    stop_all_calls: AtomicUsize,
    fail_input: AtomicBool,
    fail_output: AtomicBool,
    mic: Mutex<Option<SampleProducer>>,
    scheduled: Mutex<Vec<ScheduledVoice>>,
}

/// Fake host. Every clone observes the same devices, and every output shares
/// one `ManualClock` that only tests move.
#[derive(Clone)]
pub struct MockBackend {
    input_rate: u32,
    clock: ManualClock,
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new(input_rate: u32) -> Self {
        Self {
            input_rate,
            clock: ManualClock::new(),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn set_fail_input(&self, fail: bool) {
        self.shared.fail_input.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_output(&self, fail: bool) {
        self.shared.fail_output.store(fail, Ordering::SeqCst);
    }

    /// Feed the open microphone. Returns how many samples fit in the ring;
    /// zero when no input is started.
    pub fn push_mic(&self, samples: &[f32]) -> usize {
        match self.shared.mic.lock().as_mut() {
            Some(producer) => producer.push_slice(samples),
            None => 0,
        }
    }

    pub fn mic_open(&self) -> bool {
        self.shared.mic.lock().is_some()
    }

    pub fn inputs_opened(&self) -> usize {
        self.shared.inputs_opened.load(Ordering::SeqCst)
    }

    pub fn inputs_closed(&self) -> usize {
        self.shared.inputs_closed.load(Ordering::SeqCst)
    }

    pub fn outputs_opened(&self) -> usize {
        self.shared.outputs_opened.load(Ordering::SeqCst)
    }

    pub fn outputs_closed(&self) -> usize {
        self.shared.outputs_closed.load(Ordering::SeqCst)
    }

    pub fn stop_all_calls(&self) -> usize {
        self.shared.stop_all_calls.load(Ordering::SeqCst)
    }

    pub fn scheduled(&self) -> Vec<ScheduledVoice> {
        self.shared.scheduled.lock().clone()
    }

    /// A standalone output on this backend's clock, for scheduler tests.
    pub fn output(&self, sample_rate: u32) -> Box<dyn OutputDevice> {
        self.shared.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Box::new(MockOutput {
            sample_rate,
            clock: self.clock.clone(),
            shared: self.shared.clone(),
            closed: false,
        })
    }
}

impl AudioBackend for MockBackend {
    fn open_input(&self) -> Result<Box<dyn InputDevice>, DeviceError> {
        if self.shared.fail_input.load(Ordering::SeqCst) {
            return Err(DeviceError::Denied("mock microphone refused".to_string()));
        }
        self.shared.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockInput {
            sample_rate: self.input_rate,
            shared: self.shared.clone(),
            closed: false,
        }))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputDevice>, DeviceError> {
        if self.shared.fail_output.load(Ordering::SeqCst) {
            return Err(DeviceError::NotFound("output"));
        }
        Ok(self.output(sample_rate))
    }
}

struct MockInput {
    sample_rate: u32,
    shared: Arc<Shared>,
    closed: bool,
}

impl InputDevice for MockInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, producer: SampleProducer) -> Result<(), DeviceError> {
        *self.shared.mic.lock() = Some(producer);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.mic.lock().take();
        self.shared.inputs_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockOutput {
    sample_rate: u32,
    clock: ManualClock,
    shared: Arc<Shared>,
    closed: bool,
}

impl OutputDevice for MockOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clock(&self) -> Arc<dyn AudioClock> {
        Arc::new(self.clock.clone())
    }

    fn schedule(&mut self, voice: VoiceId, buffer: &PcmBuffer, start: Duration) {
        self.shared.scheduled.lock().push(ScheduledVoice {
            voice,
            start,
            samples: buffer.len(),
            sample_rate: buffer.sample_rate,
        });
    }

    fn stop_all(&mut self) {
        self.shared.stop_all_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.outputs_closed.fetch_add(1, Ordering::SeqCst);
    }
}
