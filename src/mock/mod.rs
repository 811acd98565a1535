//! In-process stand-ins for the audio hardware and the remote agent, used by
//! the integration tests to drive a full session deterministically.

pub mod channel;
pub mod device;

pub use channel::{MockConnector, MockRemote};
pub use device::{MockBackend, ScheduledVoice};
