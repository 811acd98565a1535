use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::event::{ChannelEvent, OutboundMessage, Speaker};
use super::handle::{Command, InjectAs, Reply, SessionHandle, SessionSnapshot};
use super::scheduler::PlaybackScheduler;
use super::state::{SessionGraph, SessionRequest, SessionState};
use super::telemetry::event::{DropReason, TelemetryEvent, TurnBoundary};
use super::telemetry::log::ConnectionLog;
use super::telemetry::recorder::TelemetryRecorder;
use super::transcript::{DeltaOutcome, TranscriptAssembler};
use crate::audio::codec::{self, PcmBuffer};
use crate::audio::device::AudioBackend;
use crate::audio::processing::{AudioFrame, CaptureHandle, CaptureLine, CaptureSettings, FrameCallback, MuteFlag, VolumeMeter};
use crate::audio::tone;
use crate::channel::{DuplexChannel, DuplexConnector, BEGIN_TRIGGER};
use crate::config::EngineConfig;
use crate::error::{DeviceError, SessionError, TransportError};

struct Uplink {
    cancel: CancellationToken,
    task: JoinHandle<u64>,
}

/// A channel open in flight. The `connect` caller waits on `reply` while
/// the actor keeps serving commands.
struct PendingOpen {
    task: JoinHandle<Result<DuplexChannel, TransportError>>,
    reply: Reply<SessionState>,
}

enum Step {
    Command(Option<Command>),
    Inbound(Option<ChannelEvent>),
    Opened(Result<Result<DuplexChannel, TransportError>, JoinError>),
}

/// Single owner of every piece of per-session state.
///
/// Commands from the UI and events from the channel are merged into one
/// task, so the state enum, `next_start_time`, and the transcript are each
/// mutated from exactly one context. The capture thread only touches the
/// mute flag, the volume meter, and a bounded frame queue. The uplink task
/// exists only while `Active`.
pub struct SessionController {
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn DuplexConnector>,
    session_id: Uuid,

    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    mute: MuteFlag,
    meter: VolumeMeter,

    capture: Option<CaptureHandle>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    playback: Option<PlaybackScheduler>,
    transcript: TranscriptAssembler,
    outbound: Option<mpsc::Sender<OutboundMessage>>,
    inbound: Option<mpsc::Receiver<ChannelEvent>>,
    uplink: Option<Uplink>,
    opening: Option<PendingOpen>,
    arrivals: u64,

    telemetry: TelemetryRecorder,
    log: ConnectionLog,
}

impl SessionController {
    /// Spawn the controller task on the current tokio runtime.
    pub fn spawn(
        config: EngineConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn DuplexConnector>,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_queue.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let session_id = Uuid::new_v4();
        let mute = MuteFlag::new();
        let meter = VolumeMeter::new();

        let controller = Self {
            log: ConnectionLog::new(config.log_capacity),
            config,
            backend,
            connector,
            session_id,
            state: SessionState::Idle,
            state_tx,
            mute: mute.clone(),
            meter: meter.clone(),
            capture: None,
            frames: None,
            playback: None,
            transcript: TranscriptAssembler::new(),
            outbound: None,
            inbound: None,
            uplink: None,
            opening: None,
            arrivals: 0,
            telemetry: TelemetryRecorder::new(),
        };

        tokio::spawn(controller.run(cmd_rx));

        SessionHandle {
            session_id,
            commands: cmd_tx,
            state: state_rx,
            mute,
            meter,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Session {} controller started", self.session_id);

        loop {
            let step = tokio::select! {
                cmd = commands.recv() => Step::Command(cmd),
                event = next_inbound(&mut self.inbound) => Step::Inbound(event),
                opened = next_open(&mut self.opening) => Step::Opened(opened),
            };

            match step {
                Step::Command(Some(cmd)) => self.handle_command(cmd).await,
                Step::Command(None) => break,
                Step::Inbound(Some(event)) => self.handle_event(event).await,
                Step::Inbound(None) => {
                    // Far end vanished without a Closed event.
                    self.inbound = None;
                    self.handle_event(ChannelEvent::TransportError("inbound stream ended".to_string())).await;
                }
                Step::Opened(result) => self.on_open_finished(result).await,
            }
        }

        self.teardown().await;
        info!("Session {} controller stopped", self.session_id);
    }

    // === Commands ===

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::CheckDevices(reply) => {
                let result = self.check_devices().await;
                let _ = reply.send(result);
            }
            Command::Connect(reply) => self.connect(reply).await,
            Command::EndCall(reply) => {
                let result = self.end_call().await;
                let _ = reply.send(result);
            }
            Command::Reset(reply) => {
                let result = self.reset().await;
                let _ = reply.send(result);
            }
            Command::InjectText { text, speaker, reply } => {
                let result = self.inject_text(text, speaker).await;
                let _ = reply.send(result);
            }
            Command::PlayTestSound(reply) => {
                let result = self.play_test_sound().await;
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Ok(self.snapshot()));
            }
        }
    }

    async fn check_devices(&mut self) -> Result<SessionState, SessionError> {
        let next = self.permit(SessionRequest::CheckDevices, "check_devices")?;
        self.log.clear();
        self.log.push("Requesting Mic Access...");

        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_queue.max(1));
        let on_frame: FrameCallback = Box::new(move |frame: AudioFrame| {
            // Nobody drains the queue outside Active; overflow is dropped.
            if frame_tx.try_send(frame).is_err() {
                trace!("Capture queue full, frame dropped");
            }
        });

        let backend = self.backend.clone();
        let settings = CaptureSettings {
            sample_rate: self.config.session.capture_rate,
            frame_len: self.config.frame_len,
            ring_capacity: self.config.ring_capacity,
        };
        let mute = self.mute.clone();
        let meter = self.meter.clone();

        let started = tokio::task::spawn_blocking(move || {
            let input = backend.open_input()?;
            CaptureLine::start(input, settings, mute, meter, on_frame)
        })
        .await
        .unwrap_or_else(|e| Err(DeviceError::Stream(format!("device open task failed: {}", e))));

        match started {
            Ok(capture) => {
                self.capture = Some(capture);
                self.frames = Some(frame_rx);
                self.log.push("Mic Access Granted");
                self.set_state(next);
                Ok(next)
            }
            Err(e) => {
                self.log.push("Mic Access Denied/Error");
                Err(self.fail(SessionRequest::DeviceError, e.into()).await)
            }
        }
    }

    /// Opens the speaker inline, then starts the channel open as its own
    /// task. `reply` is answered once that task finishes, fails, times out,
    /// or is cancelled by teardown.
    async fn connect(&mut self, reply: Reply<SessionState>) {
        let next = match self.permit(SessionRequest::Connect, "connect") {
            Ok(next) => next,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        // Fresh per-session entities.
        self.transcript.clear();
        self.arrivals = 0;
        self.set_state(next);
        self.log.push("Initializing Session...");

        let backend = self.backend.clone();
        let rate = self.config.session.output_rate;
        let output = tokio::task::spawn_blocking(move || backend.open_output(rate))
            .await
            .unwrap_or_else(|e| Err(DeviceError::Stream(format!("device open task failed: {}", e))));

        match output {
            Ok(output) => self.playback = Some(PlaybackScheduler::new(output)),
            Err(e) => {
                self.log.push("Speaker unavailable");
                let err = self.fail(SessionRequest::DeviceError, e.into()).await;
                let _ = reply.send(Err(err));
                return;
            }
        }

        self.log.push("Connecting to agent...");
        let connector = self.connector.clone();
        let session = self.config.session.clone();
        let limit = self.config.connect_timeout();
        let task = tokio::spawn(async move {
            match tokio::time::timeout(limit, connector.open(&session)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Connect(format!("timed out after {} ms", limit.as_millis()))),
            }
        });
        self.opening = Some(PendingOpen { task, reply });
    }

    async fn on_open_finished(&mut self, result: Result<Result<DuplexChannel, TransportError>, JoinError>) {
        let Some(pending) = self.opening.take() else {
            return;
        };

        let opened = result.unwrap_or_else(|e| Err(TransportError::Connect(format!("connect task failed: {}", e))));
        match opened {
            Ok(channel) => {
                self.outbound = Some(channel.outbound);
                self.inbound = Some(channel.inbound);
                let _ = pending.reply.send(Ok(self.state));
            }
            Err(e) => {
                self.log.push("Connection Failed");
                let err = self.fail(SessionRequest::ChannelError, e.into()).await;
                let _ = pending.reply.send(Err(err));
            }
        }
    }

    async fn end_call(&mut self) -> Result<SessionState, SessionError> {
        let next = self.permit(SessionRequest::EndCall, "end_call")?;
        self.teardown().await;
        self.log.push("Session Closed");
        self.set_state(next);
        Ok(next)
    }

    async fn reset(&mut self) -> Result<SessionState, SessionError> {
        if self.state == SessionState::Idle {
            return Ok(SessionState::Idle);
        }
        let next = self.permit(SessionRequest::Reset, "reset")?;

        // Teardown already ran on the way into Finished/Error; this is a
        // no-op for anything already released.
        self.teardown().await;
        self.transcript.clear();
        self.telemetry.clear();
        self.mute.set(false);
        self.meter.store(0.0);
        self.arrivals = 0;
        self.set_state(next);
        Ok(next)
    }

    async fn inject_text(&mut self, text: String, speaker: InjectAs) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(self.reject("inject_text"));
        }
        if text.is_empty() {
            return Ok(());
        }

        let Some(outbound) = self.outbound.clone() else {
            return Err(self.reject("inject_text"));
        };

        // Only text handed to the channel lands in the transcript.
        let chars = text.chars().count();
        let line = text.clone();
        if outbound.send(OutboundMessage::TextTrigger(text)).await.is_err() {
            return Err(self.fail(SessionRequest::ChannelError, TransportError::Closed.into()).await);
        }

        let speaker: Speaker = speaker.into();
        self.close_open_turn(TurnBoundary::Injection);
        self.transcript.push_complete(speaker, &line);
        self.telemetry.record(TelemetryEvent::MessageInjected { speaker, chars });
        Ok(())
    }

    async fn play_test_sound(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Idle | SessionState::MicCheck) {
            return Err(self.reject("play_test_sound"));
        }

        let backend = self.backend.clone();
        let rate = self.config.session.output_rate;
        let output = tokio::task::spawn_blocking(move || backend.open_output(rate))
            .await
            .unwrap_or_else(|e| Err(DeviceError::Stream(format!("device open task failed: {}", e))))?;

        let mut scheduler = PlaybackScheduler::new(output);
        let chirp = tone::test_tone(scheduler.output_rate());
        let hold = chirp.duration() + std::time::Duration::from_millis(200);
        scheduler.enqueue(chirp, 0);

        // The chirp owns its own short-lived output; it never touches the
        // session scheduler.
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            let _ = tokio::task::spawn_blocking(move || scheduler.close()).await;
        });
        Ok(())
    }

    fn snapshot(&mut self) -> SessionSnapshot {
        let (agent_speaking, scheduled_items) = match self.playback.as_mut() {
            Some(playback) => {
                playback.release_finished();
                (playback.is_speaking(), playback.scheduled_count())
            }
            None => (false, 0),
        };

        SessionSnapshot {
            session_id: self.session_id,
            state: self.state,
            transcript: self.transcript.utterances().to_vec(),
            agent_speaking,
            scheduled_items,
            volume: self.meter.level(),
            muted: self.mute.get(),
            telemetry: self.telemetry.snapshot(),
            logs: self.log.lines(),
        }
    }

    // === Channel events ===

    async fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => self.on_opened().await,
            ChannelEvent::AudioChunk(bytes) => self.on_audio(bytes).await,
            ChannelEvent::TranscriptDelta { speaker, text } => self.on_delta(speaker, &text),
            ChannelEvent::TurnComplete => {
                if self.state.accepts_inbound() {
                    self.close_open_turn(TurnBoundary::Signal);
                }
            }
            ChannelEvent::Interrupted => self.on_interrupted(),
            ChannelEvent::Closed => {
                if let Some(next) = SessionGraph::transition(self.state, SessionRequest::ChannelClosed) {
                    self.teardown().await;
                    self.log.push("Session Closed");
                    self.set_state(next);
                }
            }
            ChannelEvent::TransportError(reason) => {
                error!("Transport error: {}", reason);
                if SessionGraph::transition(self.state, SessionRequest::ChannelError).is_some() {
                    self.log.push(format!("Error: {}", reason));
                    self.fail(SessionRequest::ChannelError, TransportError::Dropped(reason).into()).await;
                }
            }
        }
    }

    async fn on_opened(&mut self) {
        let Some(next) = SessionGraph::transition(self.state, SessionRequest::ChannelOpen) else {
            debug!("Ignoring channel open while {:?}", self.state);
            return;
        };
        let Some(outbound) = self.outbound.clone() else {
            return;
        };

        if let Some(playback) = self.playback.as_mut() {
            playback.anchor_to_now();
        }

        // The agent speaks first.
        self.log.push("Connected! Sending greeting trigger...");
        if outbound.send(OutboundMessage::TextTrigger(BEGIN_TRIGGER.to_string())).await.is_err() {
            self.fail(SessionRequest::ChannelError, TransportError::Closed.into()).await;
            return;
        }

        if let Some(mut frames) = self.frames.take() {
            // Frames captured during the mic check are stale.
            let mut stale = 0usize;
            while frames.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                debug!("Discarded {} pre-session frame(s)", stale);
            }

            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_uplink(frames, outbound, cancel.clone()));
            self.uplink = Some(Uplink { cancel, task });
        }

        self.set_state(next);
    }

    async fn on_audio(&mut self, bytes: Vec<u8>) {
        let arrival_index = self.arrivals;
        self.arrivals += 1;

        if self.playback.is_none() || !self.state.accepts_inbound() {
            self.drop_chunk(arrival_index, DropReason::OutOfState);
            return;
        }

        // Large chunks decode off the task, but are still awaited here so
        // handoff to the scheduler stays in arrival order.
        let out_rate = self.config.session.output_rate;
        let decoded = if bytes.len() > self.config.decode_offload_bytes {
            match tokio::task::spawn_blocking(move || codec::decode(&bytes, out_rate)).await {
                Ok(decoded) => decoded,
                Err(e) => {
                    error!("Decode task for inbound chunk {} failed: {}", arrival_index, e);
                    self.drop_chunk(arrival_index, DropReason::DecodeFailed);
                    return;
                }
            }
        } else {
            codec::decode(&bytes, out_rate)
        };

        let buffer: PcmBuffer = match decoded {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Dropping inbound chunk {}: {}", arrival_index, e);
                self.drop_chunk(arrival_index, DropReason::Truncated);
                return;
            }
        };

        let Some(playback) = self.playback.as_mut() else { return };
        let now = playback.now();
        if let Some(slot) = playback.enqueue(buffer, arrival_index) {
            self.telemetry.record(TelemetryEvent::ChunkScheduled {
                arrival_index,
                duration_ms: (slot.end - slot.start).as_millis() as u64,
                queue_delay_ms: slot.start.saturating_sub(now).as_millis() as u64,
            });
        }
    }

    fn on_delta(&mut self, speaker: Speaker, text: &str) {
        if !self.state.accepts_inbound() {
            trace!("Ignoring transcript delta while {:?}", self.state);
            return;
        }

        let previous = self.transcript.open_utterance().map(|u| u.speaker);
        if let DeltaOutcome::Opened { closed: Some(_), .. } = self.transcript.append_delta(speaker, text) {
            if let Some(closed_speaker) = previous {
                self.telemetry.record(TelemetryEvent::TurnClosed {
                    speaker: closed_speaker,
                    boundary: TurnBoundary::SpeakerSwitch,
                });
            }
        }
    }

    fn on_interrupted(&mut self) {
        if !self.state.accepts_inbound() {
            return;
        }

        let previous = self.transcript.open_utterance().map(|u| u.speaker);
        let flushed = match self.playback.as_mut() {
            Some(playback) => self.transcript.on_interrupt(playback),
            None => {
                self.transcript.close_turn();
                0
            }
        };

        info!("Barge-in: {} queued item(s) discarded", flushed);
        self.telemetry.record(TelemetryEvent::Interruption { flushed_items: flushed });
        if let Some(speaker) = previous {
            self.telemetry.record(TelemetryEvent::TurnClosed {
                speaker,
                boundary: TurnBoundary::Interrupt,
            });
        }
    }

    // === Lifecycle plumbing ===

    /// Check a request against the graph without applying it.
    fn permit(&mut self, request: SessionRequest, op: &'static str) -> Result<SessionState, SessionError> {
        SessionGraph::transition(self.state, request).ok_or_else(|| self.reject(op))
    }

    fn reject(&mut self, op: &'static str) -> SessionError {
        debug!("Rejected `{}` while {:?}", op, self.state);
        self.telemetry.record(TelemetryEvent::RequestRejected {
            op: op.to_string(),
            state: self.state,
        });
        SessionError::StateViolation { op, state: self.state }
    }

    fn set_state(&mut self, next: SessionState) {
        if next == self.state {
            return;
        }
        info!("Session {:?} -> {:?}", self.state, next);
        self.telemetry.record(TelemetryEvent::StateTransition {
            from: self.state,
            to: next,
        });
        self.state = next;
        self.state_tx.send_replace(next);
    }

    /// Tear down and move to whatever the graph says `request` leads to
    /// (always `Error` for failure requests). Returns `err` for the caller.
    async fn fail(&mut self, request: SessionRequest, err: SessionError) -> SessionError {
        error!("Session failure: {}", err);
        self.teardown().await;
        let next = SessionGraph::transition(self.state, request).unwrap_or(SessionState::Error);
        self.set_state(next);
        err
    }

    fn close_open_turn(&mut self, boundary: TurnBoundary) {
        let speaker = self.transcript.open_utterance().map(|u| u.speaker);
        if self.transcript.close_turn().is_some() {
            if let Some(speaker) = speaker {
                self.telemetry.record(TelemetryEvent::TurnClosed { speaker, boundary });
            }
        }
    }

    fn drop_chunk(&mut self, arrival_index: u64, reason: DropReason) {
        self.telemetry.record(TelemetryEvent::ChunkDropped { arrival_index, reason });
    }

    /// Release every per-session resource. Safe to call repeatedly: each
    /// resource is taken exactly once, so nothing is released twice.
    async fn teardown(&mut self) {
        // 0. Abandon a channel that is still opening.
        if let Some(pending) = self.opening.take() {
            pending.task.abort();
            self.log.push("Connection Cancelled");
            let _ = pending.reply.send(Err(TransportError::Cancelled.into()));
        }

        // 1. Stop sending.
        if let Some(uplink) = self.uplink.take() {
            uplink.cancel.cancel();
            match uplink.task.await {
                Ok(frames_sent) => self.telemetry.record(TelemetryEvent::UplinkClosed { frames_sent }),
                Err(e) => warn!("Uplink task ended abnormally: {}", e),
            }
        }

        // 2. Close our side of the channel.
        self.outbound = None;
        self.inbound = None;
        self.frames = None;

        self.close_open_turn(TurnBoundary::Teardown);

        // 3. Flush playback and release devices.
        if let Some(mut playback) = self.playback.take() {
            let _ = tokio::task::spawn_blocking(move || playback.close()).await;
        }
        if let Some(mut capture) = self.capture.take() {
            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
        }
    }
}

async fn next_inbound(inbound: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_open(opening: &mut Option<PendingOpen>) -> Result<Result<DuplexChannel, TransportError>, JoinError> {
    match opening {
        Some(pending) => (&mut pending.task).await,
        None => std::future::pending().await,
    }
}

/// Drain captured frames in sequence order, encode, send. Returns the
/// number of frames sent.
async fn run_uplink(
    mut frames: mpsc::Receiver<AudioFrame>,
    outbound: mpsc::Sender<OutboundMessage>,
    cancel: CancellationToken,
) -> u64 {
    let mut sent = 0u64;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else { break };

        let message = OutboundMessage::AudioChunk {
            seq: frame.seq,
            bytes: codec::encode(&frame.samples),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = outbound.send(message) => {
                if result.is_err() {
                    debug!("Uplink: channel closed");
                    break;
                }
            }
        }
        sent += 1;
    }

    debug!("Uplink stopped after {} frame(s)", sent);
    sent
}
