use live_interview::kernel::event::Speaker;
use live_interview::kernel::state::SessionState;
use live_interview::kernel::telemetry::event::{DropReason, TelemetryEvent, TurnBoundary};
use live_interview::kernel::telemetry::log::ConnectionLog;
use live_interview::kernel::telemetry::recorder::TelemetryRecorder;

#[test]
fn test_phase8_1_chunk_and_turn_stats() {
    let mut recorder = TelemetryRecorder::new();

    recorder.record(TelemetryEvent::StateTransition {
        from: SessionState::Idle,
        to: SessionState::MicCheck,
    });
    recorder.record(TelemetryEvent::ChunkScheduled {
        arrival_index: 0,
        duration_ms: 200,
        queue_delay_ms: 0,
    });
    recorder.record(TelemetryEvent::ChunkScheduled {
        arrival_index: 1,
        duration_ms: 200,
        queue_delay_ms: 200,
    });
    recorder.record(TelemetryEvent::ChunkDropped {
        arrival_index: 2,
        reason: DropReason::Truncated,
    });
    recorder.record(TelemetryEvent::TurnClosed {
        speaker: Speaker::Agent,
        boundary: TurnBoundary::Signal,
    });
    recorder.record(TelemetryEvent::TurnClosed {
        speaker: Speaker::User,
        boundary: TurnBoundary::SpeakerSwitch,
    });

    let snap = recorder.snapshot();
    assert_eq!(snap.transitions, 1);
    assert_eq!(snap.chunk_stats.scheduled, 2);
    assert_eq!(snap.chunk_stats.total_audio_ms, 400);
    assert_eq!(snap.chunk_stats.max_queue_delay_ms, 200);
    assert_eq!(snap.chunk_stats.avg_queue_delay_ms, 100.0);
    assert_eq!(snap.chunk_stats.dropped_truncated, 1);
    assert_eq!(snap.turn_stats.agent_turns, 1);
    assert_eq!(snap.turn_stats.user_turns, 1);
    assert_eq!(snap.turn_stats.closed_by_signal, 1);
    assert_eq!(snap.turn_stats.closed_by_switch, 1);
}

#[test]
fn test_phase8_2_interruptions_and_rejections() {
    let mut recorder = TelemetryRecorder::new();
    recorder.record(TelemetryEvent::Interruption { flushed_items: 3 });
    recorder.record(TelemetryEvent::Interruption { flushed_items: 0 });
    recorder.record(TelemetryEvent::RequestRejected {
        op: "connect".into(),
        state: SessionState::Active,
    });
    recorder.record(TelemetryEvent::UplinkClosed { frames_sent: 12 });

    let snap = recorder.snapshot();
    assert_eq!(snap.interruption_stats.count, 2);
    assert_eq!(snap.interruption_stats.flushed_items, 3);
    assert_eq!(snap.rejected_requests, 1);
    assert_eq!(snap.frames_sent, 12);

    recorder.clear();
    assert_eq!(recorder.events().count(), 0);
    assert_eq!(recorder.snapshot().interruption_stats.count, 0);
}

#[test]
fn test_phase8_3_recorder_is_bounded() {
    let mut recorder = TelemetryRecorder::new();
    for i in 0..10_050u64 {
        recorder.record(TelemetryEvent::ChunkDropped {
            arrival_index: i,
            reason: DropReason::OutOfState,
        });
    }
    assert_eq!(recorder.events().count(), 10_000);
    assert!(matches!(
        recorder.events().next(),
        Some(TelemetryEvent::ChunkDropped { arrival_index: 50, .. })
    ));
}

#[test]
fn test_phase8_4_connection_log_keeps_latest_lines() {
    let mut log = ConnectionLog::new(3);
    for msg in ["one", "two", "three", "four"] {
        log.push(msg);
    }

    let lines = log.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("] two"));
    assert!(lines[2].ends_with("] four"));
    assert!(lines[0].starts_with('['), "lines carry a timestamp prefix");

    log.clear();
    assert!(log.lines().is_empty());
}

#[test]
fn test_phase8_5_decode_task_failures_are_counted_on_their_own() {
    let mut recorder = TelemetryRecorder::new();
    for (arrival_index, reason) in [
        (0, DropReason::Truncated),
        (1, DropReason::DecodeFailed),
        (2, DropReason::OutOfState),
        (3, DropReason::DecodeFailed),
    ] {
        recorder.record(TelemetryEvent::ChunkDropped { arrival_index, reason });
    }

    let stats = recorder.snapshot().chunk_stats;
    assert_eq!(stats.dropped_truncated, 1);
    assert_eq!(stats.dropped_out_of_state, 1);
    assert_eq!(stats.dropped_decode_failed, 2);
}
