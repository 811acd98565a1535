use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    User,
    Agent,
    System,
}

/// Everything the remote agent can tell us, decoded once at the channel
/// boundary and matched exhaustively by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    /// Raw 16-bit LE PCM at the session output rate.
    AudioChunk(Vec<u8>),
    TranscriptDelta { speaker: Speaker, text: String },
    TurnComplete,
    /// Barge-in: the agent's turn was cut short.
    Interrupted,
    Closed,
    TransportError(String),
}

/// Everything we send to the remote agent.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Encoded capture frame. `seq` is the capture sequence number.
    AudioChunk { seq: u64, bytes: Vec<u8> },
    /// The opening "begin" nudge, or injected text/code.
    TextTrigger(String),
}
