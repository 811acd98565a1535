use std::collections::VecDeque;

use serde::Serialize;

use super::event::{DropReason, TelemetryEvent, TurnBoundary};
use crate::kernel::event::Speaker;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub transitions: u64,
    pub frames_sent: u64,
    pub chunk_stats: ChunkStats,
    pub interruption_stats: InterruptionStats,
    pub turn_stats: TurnStats,
    pub injected_messages: u64,
    pub rejected_requests: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStats {
    pub scheduled: u64,
    pub dropped_truncated: u64,
    pub dropped_out_of_state: u64,
    pub dropped_decode_failed: u64,
    pub total_audio_ms: u64,
    pub max_queue_delay_ms: u64,
    pub avg_queue_delay_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterruptionStats {
    pub count: u64,
    pub flushed_items: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnStats {
    pub user_turns: u64,
    pub agent_turns: u64,
    pub system_turns: u64,
    pub closed_by_signal: u64,
    pub closed_by_switch: u64,
    pub closed_by_interrupt: u64,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();
    let mut total_delay_ms = 0u64;

    for event in events {
        match event {
            TelemetryEvent::StateTransition { .. } => snap.transitions += 1,
            TelemetryEvent::UplinkClosed { frames_sent } => snap.frames_sent += frames_sent,
            TelemetryEvent::ChunkScheduled { duration_ms, queue_delay_ms, .. } => {
                snap.chunk_stats.scheduled += 1;
                snap.chunk_stats.total_audio_ms += duration_ms;
                snap.chunk_stats.max_queue_delay_ms = snap.chunk_stats.max_queue_delay_ms.max(*queue_delay_ms);
                total_delay_ms += queue_delay_ms;
            }
            TelemetryEvent::ChunkDropped { reason, .. } => match reason {
                DropReason::Truncated => snap.chunk_stats.dropped_truncated += 1,
                DropReason::OutOfState => snap.chunk_stats.dropped_out_of_state += 1,
                DropReason::DecodeFailed => snap.chunk_stats.dropped_decode_failed += 1,
            },
            TelemetryEvent::Interruption { flushed_items } => {
                snap.interruption_stats.count += 1;
                snap.interruption_stats.flushed_items += *flushed_items as u64;
            }
            TelemetryEvent::TurnClosed { speaker, boundary } => {
                match speaker {
                    Speaker::User => snap.turn_stats.user_turns += 1,
                    Speaker::Agent => snap.turn_stats.agent_turns += 1,
                    Speaker::System => snap.turn_stats.system_turns += 1,
                }
                match boundary {
                    TurnBoundary::Signal => snap.turn_stats.closed_by_signal += 1,
                    TurnBoundary::SpeakerSwitch => snap.turn_stats.closed_by_switch += 1,
                    TurnBoundary::Interrupt => snap.turn_stats.closed_by_interrupt += 1,
                    TurnBoundary::Injection | TurnBoundary::Teardown => {}
                }
            }
            TelemetryEvent::MessageInjected { .. } => snap.injected_messages += 1,
            TelemetryEvent::RequestRejected { .. } => snap.rejected_requests += 1,
        }
    }

    if snap.chunk_stats.scheduled > 0 {
        snap.chunk_stats.avg_queue_delay_ms = total_delay_ms as f64 / snap.chunk_stats.scheduled as f64;
    }

    snap
}
