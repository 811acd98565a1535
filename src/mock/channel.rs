use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::{DuplexChannel, DuplexConnector};
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::kernel::event::{ChannelEvent, OutboundMessage};

/// The far end of one mock connection, handed to the test.
pub struct MockRemote {
    pub events: mpsc::Sender<ChannelEvent>,
    pub outbound: mpsc::Receiver<OutboundMessage>,
    pub config: SessionConfig,
}

impl MockRemote {
    pub async fn emit(&self, event: ChannelEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Next message from the session, or `None` after `wait` or once the
    /// session closes its side.
    pub async fn next_outbound(&mut self, wait: Duration) -> Option<OutboundMessage> {
        tokio::time::timeout(wait, self.outbound.recv()).await.ok().flatten()
    }
}

pub struct MockConnector {
    remotes: mpsc::UnboundedSender<MockRemote>,
    opens: Arc<AtomicUsize>,
    fail_next: Mutex<Option<TransportError>>,
    hang_next: AtomicBool,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                remotes: tx,
                opens: Arc::new(AtomicUsize::new(0)),
                fail_next: Mutex::new(None),
                hang_next: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, err: TransportError) {
        *self.fail_next.lock() = Some(err);
    }

    /// The next `open` never completes, like a transport that accepted the
    /// TCP connection and then went silent.
    pub fn hang_next(&self) {
        self.hang_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DuplexConnector for MockConnector {
    async fn open(&self, config: &SessionConfig) -> Result<DuplexChannel, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let failure = self.fail_next.lock().take();
        if let Some(err) = failure {
            return Err(err);
        }
        if self.hang_next.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let (channel, events, outbound) = DuplexChannel::pair(64);
        let remote = MockRemote {
            events,
            outbound,
            config: config.clone(),
        };
        self.remotes
            .send(remote)
            .map_err(|_| TransportError::Connect("mock remote dropped".to_string()))?;
        Ok(channel)
    }
}
