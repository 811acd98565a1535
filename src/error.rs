use thiserror::Error;

use crate::kernel::state::SessionState;

/// Microphone or speaker unavailable. Fatal to the session, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no {0} device available")]
    NotFound(&'static str),
    #[error("device access denied: {0}")]
    Denied(String),
    #[error("unsupported device configuration: {0}")]
    Unsupported(String),
    #[error("device stream failed: {0}")]
    Stream(String),
}

/// Connect failure or a mid-session drop of the duplex channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel dropped: {0}")]
    Dropped(String),
    #[error("channel closed")]
    Closed,
    /// The session ended while the channel was still opening.
    #[error("connect cancelled")]
    Cancelled,
}

/// Malformed inbound audio. Recovered locally by skipping the chunk.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("pcm payload of {len} bytes is not a whole number of 16-bit samples")]
    Truncated { len: usize },
    #[error("payload is not valid base64")]
    Base64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("`{op}` is not valid while the session is {state:?}")]
    StateViolation { op: &'static str, state: SessionState },
    /// The controller task is gone (handle outlived its session).
    #[error("session controller is no longer running")]
    Closed,
}
