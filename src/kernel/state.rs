use serde::{Deserialize, Serialize};

/// Lifecycle of one live interview session.
/// Owned exclusively by the controller task; everyone else observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing acquired. Re-entrant after `reset`.
    Idle,
    /// Microphone open, local metering only, no remote channel.
    MicCheck,
    /// Channel requested, waiting for the open acknowledgment.
    /// Greeting audio may already arrive here.
    Connecting,
    /// Capture is forwarded to the remote agent.
    Active,
    /// Torn down gracefully.
    Finished,
    /// Device or transport failure. Only `reset` leaves this state.
    Error,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// Captured audio is forwarded only while exactly `Active`.
    pub fn forwards_capture(self) -> bool {
        self == SessionState::Active
    }

    /// Playback scheduling and transcript mutation.
    pub fn accepts_inbound(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Error)
    }
}

/// Requests for a lifecycle transition. These are REQUESTS: the graph
/// decides whether they apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequest {
    CheckDevices,
    Connect,
    ChannelOpen,
    EndCall,
    ChannelClosed,
    ChannelError,
    DeviceError,
    Reset,
}

pub struct SessionGraph;

impl SessionGraph {
    /// Pure function: (Current State, Request) -> New State.
    /// `None` means the request is invalid from `current` and is ignored.
    pub fn transition(current: SessionState, request: SessionRequest) -> Option<SessionState> {
        use SessionRequest::*;
        use SessionState::*;

        match (current, request) {
            (Idle, CheckDevices) => Some(MicCheck),
            (Idle, DeviceError) => Some(Error),

            (MicCheck, Connect) => Some(Connecting),
            (MicCheck, EndCall) => Some(Finished),
            (MicCheck, ChannelError | DeviceError) => Some(Error),

            (Connecting, ChannelOpen) => Some(Active),
            (Connecting, EndCall | ChannelClosed) => Some(Finished),
            (Connecting, ChannelError | DeviceError) => Some(Error),

            (Active, EndCall | ChannelClosed) => Some(Finished),
            (Active, ChannelError | DeviceError) => Some(Error),

            (Finished | Error, Reset) => Some(Idle),

            _ => None,
        }
    }
}
