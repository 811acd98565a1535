//! The remote conversational agent, seen only through its narrow contract:
//! encoded audio and text go out, typed `ChannelEvent`s come back.

pub mod loopback;
pub mod wire;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::kernel::event::{ChannelEvent, OutboundMessage};

/// Greeting nudge sent as soon as the channel opens. The agent always
/// takes the first turn.
pub const BEGIN_TRIGGER: &str = "User connected. Say your greeting now.";

/// An open duplex connection. Dropping `outbound` closes our side.
pub struct DuplexChannel {
    pub outbound: mpsc::Sender<OutboundMessage>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

impl DuplexChannel {
    /// A connected pair: the channel the session uses, and the far ends the
    /// transport (or a test) drives.
    pub fn pair(capacity: usize) -> (Self, mpsc::Sender<ChannelEvent>, mpsc::Receiver<OutboundMessage>) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            in_tx,
            out_rx,
        )
    }
}

#[async_trait]
pub trait DuplexConnector: Send + Sync {
    /// Open a channel, forwarding `config` unmodified. The returned channel
    /// is not yet acknowledged; `ChannelEvent::Opened` arrives on `inbound`.
    async fn open(&self, config: &SessionConfig) -> Result<DuplexChannel, TransportError>;
}
