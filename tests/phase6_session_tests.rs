use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use live_interview::audio::codec;
use live_interview::channel::BEGIN_TRIGGER;
use live_interview::kernel::event::{ChannelEvent, OutboundMessage, Speaker};
use live_interview::mock::{MockBackend, MockConnector, MockRemote};
use live_interview::{DeviceError, EngineConfig, InjectAs, SessionController, SessionError, SessionHandle, SessionState, TransportError};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

struct Rig {
    backend: MockBackend,
    connector: Arc<MockConnector>,
    remotes: mpsc::UnboundedReceiver<MockRemote>,
    session: SessionHandle,
}

fn rig() -> Rig {
    rig_with(EngineConfig::default())
}

fn rig_with(config: EngineConfig) -> Rig {
    let backend = MockBackend::new(16000);
    let (connector, remotes) = MockConnector::new();
    let connector = Arc::new(connector);
    let session = SessionController::spawn(config, Arc::new(backend.clone()), connector.clone());
    Rig {
        backend,
        connector,
        remotes,
        session,
    }
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn wait_state(session: &SessionHandle, target: SessionState) {
    tokio::time::timeout(WAIT, session.wait_for_state(target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}, still {:?}", target, session.state()))
        .unwrap();
}

/// Drive the rig to `Active` and consume the greeting trigger.
async fn go_active(rig: &mut Rig) -> MockRemote {
    assert_eq!(rig.session.check_devices().await.unwrap(), SessionState::MicCheck);
    assert_eq!(rig.session.connect().await.unwrap(), SessionState::Connecting);
    let mut remote = tokio::time::timeout(WAIT, rig.remotes.recv()).await.unwrap().unwrap();

    assert!(remote.emit(ChannelEvent::Opened).await);
    wait_state(&rig.session, SessionState::Active).await;

    let first = remote.next_outbound(WAIT).await;
    assert_eq!(first, Some(OutboundMessage::TextTrigger(BEGIN_TRIGGER.to_string())), "agent is nudged to speak first");
    remote
}

#[tokio::test]
async fn test_phase6_1_full_lifecycle() {
    let mut rig = rig();
    assert_eq!(rig.session.state(), SessionState::Idle);

    let mut remote = go_active(&mut rig).await;
    assert_eq!(remote.config.role, "Software Engineer", "session config is forwarded as-is");

    // Mic audio goes out as encoded frames.
    rig.backend.push_mic(&vec![0.3; 4096]);
    match remote.next_outbound(WAIT).await {
        Some(OutboundMessage::AudioChunk { seq, bytes }) => {
            assert_eq!(seq, 0);
            assert_eq!(bytes.len(), 4096 * 2);
        }
        other => panic!("expected an audio chunk, got {:?}", other),
    }

    // Agent speaks.
    remote
        .emit(ChannelEvent::TranscriptDelta {
            speaker: Speaker::Agent,
            text: "Hello".into(),
        })
        .await;
    remote.emit(ChannelEvent::AudioChunk(codec::encode(&vec![0.1; 2400]))).await;
    remote.emit(ChannelEvent::TurnComplete).await;

    let session = rig.session.clone();
    assert!(
        eventually(|| {
            let session = session.clone();
            async move {
                let snap = session.snapshot().await.unwrap();
                snap.telemetry.chunk_stats.scheduled == 1 && snap.transcript.first().is_some_and(|u| u.complete)
            }
        })
        .await
    );

    let snap = rig.session.snapshot().await.unwrap();
    assert_eq!(snap.transcript[0].speaker, Speaker::Agent);
    assert_eq!(snap.transcript[0].text, "Hello");
    assert!(snap.agent_speaking, "device clock has not moved past the chunk");

    assert_eq!(rig.session.end_call().await.unwrap(), SessionState::Finished);
    assert_eq!(rig.backend.inputs_closed(), 1);
    assert_eq!(rig.backend.outputs_closed(), 1);
    assert!(remote.next_outbound(WAIT).await.is_none(), "outbound side closed on teardown");

    let snap = rig.session.snapshot().await.unwrap();
    assert!(snap.telemetry.frames_sent >= 1);
    assert!(snap.logs.iter().any(|l| l.ends_with("Session Closed")));

    assert_eq!(rig.session.reset().await.unwrap(), SessionState::Idle);
    assert!(rig.session.snapshot().await.unwrap().transcript.is_empty());
}

#[tokio::test]
async fn test_phase6_2_duplicate_connect_opens_one_channel() {
    let mut rig = rig();
    let _remote = go_active(&mut rig).await;

    let err = rig.session.connect().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::StateViolation {
            op: "connect",
            state: SessionState::Active
        }
    );
    assert_eq!(rig.connector.opens(), 1);
    assert_eq!(rig.backend.inputs_opened(), 1);
    assert_eq!(rig.session.state(), SessionState::Active, "rejection changes nothing");
}

#[tokio::test]
async fn test_phase6_3_teardown_and_reset_are_idempotent() {
    let mut rig = rig();
    let _remote = go_active(&mut rig).await;

    rig.session.end_call().await.unwrap();
    assert!(matches!(rig.session.end_call().await, Err(SessionError::StateViolation { .. })));

    assert_eq!(rig.session.reset().await.unwrap(), SessionState::Idle);
    assert_eq!(rig.session.reset().await.unwrap(), SessionState::Idle, "reset from Idle is a no-op");

    assert_eq!(rig.backend.inputs_closed(), 1, "microphone released exactly once");
    assert_eq!(rig.backend.outputs_closed(), 1, "speaker released exactly once");
    assert!(!rig.backend.mic_open());

    // The handle is reusable after reset.
    let _remote = go_active(&mut rig).await;
    assert_eq!(rig.connector.opens(), 2);
}

#[tokio::test]
async fn test_phase6_4_mute_suppresses_uplink_only() {
    let mut rig = rig();
    let mut remote = go_active(&mut rig).await;

    rig.session.set_muted(true);
    assert!(rig.session.is_muted());
    rig.backend.push_mic(&vec![0.5; 4096]);

    let session = rig.session.clone();
    assert!(eventually(|| {
        let level = session.volume();
        async move { (level - 0.5).abs() < 1e-3 }
    })
    .await, "meter keeps working while muted");
    assert!(remote.next_outbound(Duration::from_millis(200)).await.is_none(), "nothing sent while muted");

    assert!(!rig.session.toggle_mute());
    rig.backend.push_mic(&vec![0.5; 4096]);
    match remote.next_outbound(WAIT).await {
        Some(OutboundMessage::AudioChunk { seq, .. }) => assert_eq!(seq, 1, "suppressed frame still consumed a sequence number"),
        other => panic!("expected audio after unmute, got {:?}", other),
    }
    assert_eq!(rig.session.state(), SessionState::Active, "mute never changes lifecycle state");
}

#[tokio::test]
async fn test_phase6_5_interruption_flushes_playback() {
    let mut rig = rig();
    let remote = go_active(&mut rig).await;

    remote
        .emit(ChannelEvent::TranscriptDelta {
            speaker: Speaker::Agent,
            text: "So tell me about".into(),
        })
        .await;
    for _ in 0..3 {
        remote.emit(ChannelEvent::AudioChunk(codec::encode(&vec![0.1; 4800]))).await;
    }

    let backend = rig.backend.clone();
    assert!(eventually(|| {
        let n = backend.scheduled().len();
        async move { n == 3 }
    })
    .await);

    remote.emit(ChannelEvent::Interrupted).await;
    let session = rig.session.clone();
    assert!(
        eventually(|| {
            let session = session.clone();
            async move {
                let snap = session.snapshot().await.unwrap();
                snap.telemetry.interruption_stats.count == 1
            }
        })
        .await
    );

    let snap = rig.session.snapshot().await.unwrap();
    assert!(!snap.agent_speaking);
    assert_eq!(snap.scheduled_items, 0);
    assert_eq!(snap.telemetry.interruption_stats.flushed_items, 3);
    assert!(snap.transcript[0].complete, "interrupted turn is closed");
    assert_eq!(rig.backend.stop_all_calls(), 1);

    // Post-interrupt audio starts from the current clock, not the old queue tail.
    remote.emit(ChannelEvent::AudioChunk(codec::encode(&vec![0.1; 2400]))).await;
    assert!(eventually(|| {
        let n = backend.scheduled().len();
        async move { n == 4 }
    })
    .await);
    assert_eq!(rig.backend.scheduled()[3].start, Duration::ZERO);
}

#[tokio::test]
async fn test_phase6_6_truncated_chunk_is_dropped_and_session_continues() {
    let mut rig = rig();
    let remote = go_active(&mut rig).await;

    remote.emit(ChannelEvent::AudioChunk(vec![1, 2, 3])).await;
    remote.emit(ChannelEvent::AudioChunk(codec::encode(&vec![0.1; 2400]))).await;

    let session = rig.session.clone();
    assert!(
        eventually(|| {
            let session = session.clone();
            async move {
                let snap = session.snapshot().await.unwrap();
                snap.telemetry.chunk_stats.dropped_truncated == 1 && snap.telemetry.chunk_stats.scheduled == 1
            }
        })
        .await
    );
    assert_eq!(rig.session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_phase6_7_transport_error_tears_down() {
    let mut rig = rig();
    let remote = go_active(&mut rig).await;

    remote.emit(ChannelEvent::TransportError("socket reset".into())).await;
    wait_state(&rig.session, SessionState::Error).await;

    assert_eq!(rig.backend.inputs_closed(), 1);
    assert_eq!(rig.backend.outputs_closed(), 1);
    let snap = rig.session.snapshot().await.unwrap();
    assert!(snap.logs.iter().any(|l| l.contains("Error: socket reset")));

    let err = rig.session.inject_text("hello?", InjectAs::User).await.unwrap_err();
    assert!(matches!(err, SessionError::StateViolation { op: "inject_text", .. }));
}

#[tokio::test]
async fn test_phase6_8_remote_close_finishes() {
    let mut rig = rig();
    let remote = go_active(&mut rig).await;

    remote.emit(ChannelEvent::Closed).await;
    wait_state(&rig.session, SessionState::Finished).await;
    assert_eq!(rig.backend.inputs_closed(), 1);
}

#[tokio::test]
async fn test_phase6_9_vanished_remote_is_an_error() {
    let mut rig = rig();
    let remote = go_active(&mut rig).await;

    drop(remote);
    wait_state(&rig.session, SessionState::Error).await;
    assert_eq!(rig.backend.outputs_closed(), 1);
}

#[tokio::test]
async fn test_phase6_10_device_and_connect_failures() {
    // Microphone refused.
    let rig_a = rig();
    rig_a.backend.set_fail_input(true);
    let err = rig_a.session.check_devices().await.unwrap_err();
    assert!(matches!(err, SessionError::Device(DeviceError::Denied(_))));
    assert_eq!(rig_a.session.state(), SessionState::Error);

    // Channel refused after the mic was opened.
    let rig_b = rig();
    rig_b.connector.fail_next(TransportError::Connect("refused".into()));
    rig_b.session.check_devices().await.unwrap();
    let err = rig_b.session.connect().await.unwrap_err();
    assert_eq!(err, SessionError::Transport(TransportError::Connect("refused".into())));
    assert_eq!(rig_b.session.state(), SessionState::Error);
    assert_eq!(rig_b.backend.inputs_closed(), 1, "mic released on connect failure");
    assert_eq!(rig_b.backend.outputs_closed(), 1, "speaker released on connect failure");

    assert_eq!(rig_b.session.reset().await.unwrap(), SessionState::Idle);
}

#[tokio::test]
async fn test_phase6_11_text_injection() {
    let mut rig = rig();

    let err = rig.session.inject_text("too early", InjectAs::User).await.unwrap_err();
    assert!(matches!(err, SessionError::StateViolation { state: SessionState::Idle, .. }));

    let mut remote = go_active(&mut rig).await;
    rig.session.inject_text("fn solve() -> u32 { 42 }", InjectAs::System).await.unwrap();

    assert_eq!(
        remote.next_outbound(WAIT).await,
        Some(OutboundMessage::TextTrigger("fn solve() -> u32 { 42 }".into()))
    );

    let snap = rig.session.snapshot().await.unwrap();
    let last = snap.transcript.last().unwrap();
    assert_eq!(last.speaker, Speaker::System);
    assert!(last.complete);
    assert_eq!(snap.telemetry.injected_messages, 1);
}

#[tokio::test]
async fn test_phase6_12_greeting_audio_before_open_ack() {
    let mut rig = rig();
    rig.session.check_devices().await.unwrap();
    rig.session.connect().await.unwrap();
    let remote = rig.remotes.recv().await.unwrap();

    // Connecting already accepts inbound audio and text.
    remote.emit(ChannelEvent::AudioChunk(codec::encode(&vec![0.1; 2400]))).await;
    let backend = rig.backend.clone();
    assert!(eventually(|| {
        let n = backend.scheduled().len();
        async move { n == 1 }
    })
    .await);
    assert_eq!(rig.session.state(), SessionState::Connecting);

    rig.session.end_call().await.unwrap();
    assert_eq!(rig.session.state(), SessionState::Finished);
}

#[tokio::test]
async fn test_phase6_13_test_tone_only_before_connect() {
    let mut rig = rig();
    rig.session.play_test_sound().await.unwrap();

    let scheduled = rig.backend.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].samples, 7200, "300 ms at 24 kHz");

    let _remote = go_active(&mut rig).await;
    let err = rig.session.play_test_sound().await.unwrap_err();
    assert!(matches!(err, SessionError::StateViolation { op: "play_test_sound", .. }));
}

#[tokio::test]
async fn test_phase6_14_dropping_handles_releases_devices() {
    let mut rig = rig();
    let _remote = go_active(&mut rig).await;

    let backend = rig.backend.clone();
    drop(rig);
    assert!(eventually(|| {
        let released = backend.inputs_closed() == 1 && backend.outputs_closed() == 1;
        async move { released }
    })
    .await);
}

#[tokio::test]
async fn test_phase6_15_end_call_cancels_a_hung_connect() {
    let rig = rig();
    rig.connector.hang_next();
    rig.session.check_devices().await.unwrap();

    let session = rig.session.clone();
    let connecting = tokio::spawn(async move { session.connect().await });
    wait_state(&rig.session, SessionState::Connecting).await;

    let ended = tokio::time::timeout(WAIT, rig.session.end_call())
        .await
        .expect("end_call must not wait behind the open");
    assert_eq!(ended.unwrap(), SessionState::Finished);
    assert_eq!(rig.backend.inputs_closed(), 1, "mic released");
    assert_eq!(rig.backend.outputs_closed(), 1, "speaker released");

    let outcome = tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap();
    assert_eq!(outcome, Err(SessionError::Transport(TransportError::Cancelled)));
    assert_eq!(rig.connector.opens(), 1);
}

#[tokio::test]
async fn test_phase6_16_connect_times_out() {
    let config = EngineConfig {
        connect_timeout_ms: 50,
        ..EngineConfig::default()
    };
    let rig = rig_with(config);
    rig.connector.hang_next();
    rig.session.check_devices().await.unwrap();

    let err = tokio::time::timeout(WAIT, rig.session.connect()).await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Connect(_))), "got {:?}", err);
    assert_eq!(rig.session.state(), SessionState::Error);
    assert_eq!(rig.backend.inputs_closed(), 1);
    assert_eq!(rig.backend.outputs_closed(), 1);

    // The controller keeps serving commands after the failed open.
    assert_eq!(rig.session.snapshot().await.unwrap().state, SessionState::Error);
}

#[tokio::test]
async fn test_phase6_17_failed_injection_leaves_transcript_alone() {
    let mut rig = rig();
    let mut remote = go_active(&mut rig).await;
    remote.outbound.close();

    let before = rig.session.snapshot().await.unwrap().transcript.len();
    let err = rig.session.inject_text("fn main() {}", InjectAs::System).await.unwrap_err();
    assert_eq!(err, SessionError::Transport(TransportError::Closed));
    assert_eq!(rig.session.state(), SessionState::Error);

    let snap = rig.session.snapshot().await.unwrap();
    assert_eq!(snap.transcript.len(), before);
    assert!(snap.transcript.iter().all(|u| u.speaker != Speaker::System));
    assert_eq!(snap.telemetry.injected_messages, 0);
}

#[tokio::test]
async fn test_phase6_18_offloaded_decode_keeps_drop_reasons_apart() {
    let config = EngineConfig {
        decode_offload_bytes: 16,
        ..EngineConfig::default()
    };
    let mut rig = rig_with(config);
    let remote = go_active(&mut rig).await;

    let mut odd = codec::encode(&vec![0.2; 2400]);
    odd.push(0);
    remote.emit(ChannelEvent::AudioChunk(odd)).await;
    remote.emit(ChannelEvent::AudioChunk(codec::encode(&vec![0.2; 2400]))).await;

    let backend = rig.backend.clone();
    assert!(eventually(|| {
        let n = backend.scheduled().len();
        async move { n == 1 }
    })
    .await);

    let stats = rig.session.snapshot().await.unwrap().telemetry.chunk_stats;
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.dropped_truncated, 1, "a bad payload is a codec drop");
    assert_eq!(stats.dropped_decode_failed, 0);
    assert_eq!(rig.session.state(), SessionState::Active);
}
