pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
pub mod processing;
pub mod resample;
pub mod tone;

pub use codec::PcmBuffer;
pub use device::{AudioBackend, CpalBackend, InputDevice, OutputDevice};
pub use processing::{AudioFrame, CaptureHandle, CaptureLine, CaptureSettings, MuteFlag, VolumeMeter};
