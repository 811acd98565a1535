pub mod audio;
pub mod channel;
pub mod config;
pub mod error;
pub mod kernel;
pub mod mock;

pub use config::{EngineConfig, SessionConfig};
pub use error::{CodecError, DeviceError, SessionError, TransportError};
pub use kernel::controller::SessionController;
pub use kernel::handle::{InjectAs, SessionHandle, SessionSnapshot};
pub use kernel::state::SessionState;
