use serde::{Deserialize, Serialize};

use crate::kernel::event::Speaker;
use crate::kernel::state::SessionState;

// Allowed: indices, durations, counts, enums
// Forbidden: transcript text, audio samples

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    StateTransition {
        from: SessionState,
        to: SessionState,
    },

    /// Emitted when the uplink task ends.
    UplinkClosed {
        frames_sent: u64,
    },

    ChunkScheduled {
        arrival_index: u64,
        duration_ms: u64,
        /// How far in the future the chunk was scheduled to start.
        queue_delay_ms: u64,
    },

    ChunkDropped {
        arrival_index: u64,
        reason: DropReason,
    },

    Interruption {
        flushed_items: usize,
    },

    TurnClosed {
        speaker: Speaker,
        boundary: TurnBoundary,
    },

    MessageInjected {
        speaker: Speaker,
        chars: usize,
    },

    RequestRejected {
        op: String,
        state: SessionState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    Truncated,
    /// Arrived while the session did not accept inbound audio.
    OutOfState,
    /// The blocking decode task died before producing a buffer.
    DecodeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnBoundary {
    /// Explicit turn-complete from the channel.
    Signal,
    /// A delta from the other speaker arrived.
    SpeakerSwitch,
    Interrupt,
    /// Closed to make room for an injected message.
    Injection,
    /// Closed by session teardown.
    Teardown,
}
