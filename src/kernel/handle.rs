use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::audio::processing::{MuteFlag, VolumeMeter};
use crate::error::SessionError;
use crate::kernel::event::Speaker;
use crate::kernel::state::SessionState;
use crate::kernel::telemetry::metrics::TelemetrySnapshot;
use crate::kernel::transcript::Utterance;

/// Attribution for injected text. The agent's own words only ever come
/// from the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectAs {
    User,
    System,
}

impl From<InjectAs> for Speaker {
    fn from(value: InjectAs) -> Self {
        match value {
            InjectAs::User => Speaker::User,
            InjectAs::System => Speaker::System,
        }
    }
}

/// Read model for the UI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: SessionState,
    pub transcript: Vec<Utterance>,
    pub agent_speaking: bool,
    pub scheduled_items: usize,
    pub volume: f32,
    pub muted: bool,
    pub telemetry: TelemetrySnapshot,
    pub logs: Vec<String>,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub(crate) enum Command {
    CheckDevices(Reply<SessionState>),
    Connect(Reply<SessionState>),
    EndCall(Reply<SessionState>),
    Reset(Reply<SessionState>),
    InjectText {
        text: String,
        speaker: InjectAs,
        reply: Reply<()>,
    },
    PlayTestSound(Reply<()>),
    Snapshot(Reply<SessionSnapshot>),
}

/// UI-facing control surface. Cheap to clone; every clone talks to the same
/// controller task. Mute and volume bypass the task entirely.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) session_id: Uuid,
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) state: watch::Receiver<SessionState>,
    pub(crate) mute: MuteFlag,
    pub(crate) meter: VolumeMeter,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Idle -> MicCheck: open the microphone for metering.
    pub async fn check_devices(&self) -> Result<SessionState, SessionError> {
        self.request(Command::CheckDevices).await
    }

    /// MicCheck -> Connecting. Resolves once the channel has opened (or
    /// failed to), while `end_call` stays serviceable in the meantime. A
    /// no-op rejection from any other state.
    pub async fn connect(&self) -> Result<SessionState, SessionError> {
        self.request(Command::Connect).await
    }

    pub async fn end_call(&self) -> Result<SessionState, SessionError> {
        self.request(Command::EndCall).await
    }

    /// Finished | Error -> Idle. Calling it while already Idle is a no-op.
    pub async fn reset(&self) -> Result<SessionState, SessionError> {
        self.request(Command::Reset).await
    }

    pub async fn inject_text(&self, text: impl Into<String>, speaker: InjectAs) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| Command::InjectText { text, speaker, reply }).await
    }

    pub async fn play_test_sound(&self) -> Result<(), SessionError> {
        self.request(Command::PlayTestSound).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    pub fn set_muted(&self, muted: bool) {
        self.mute.set(muted);
    }

    /// Returns the new mute state.
    pub fn toggle_mute(&self) -> bool {
        self.mute.toggle()
    }

    pub fn is_muted(&self) -> bool {
        self.mute.get()
    }

    /// RMS of the most recent capture frame.
    pub fn volume(&self) -> f32 {
        self.meter.level()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub async fn wait_for_state(&self, target: SessionState) -> Result<SessionState, SessionError> {
        let mut rx = self.state.clone();
        let reached = rx
            .wait_for(|state| *state == target)
            .await
            .map(|state| *state)
            .map_err(|_| SessionError::Closed);
        reached
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}
