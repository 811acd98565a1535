use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::audio::codec::PcmBuffer;
use crate::audio::device::{OutputDevice, VoiceId};
use crate::kernel::time::AudioClock;

/// A decoded buffer from the moment it is enqueued until its scheduled end.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub voice: VoiceId,
    pub arrival_index: u64,
    pub buffer: PcmBuffer,
    pub start: Duration,
    pub end: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSlot {
    pub voice: VoiceId,
    pub start: Duration,
    pub end: Duration,
}

/// Gap-free, overlap-free playback of a stream of independently sized
/// buffers against the output device clock.
///
/// `next_start_time` is the only scheduling state. It is mutated through
/// `&mut self` only, so `enqueue` and `flush` are serialized by whoever
/// owns the scheduler (the session controller task). A flush can never be
/// undone by an enqueue that was already in flight.
pub struct PlaybackScheduler {
    output: Box<dyn OutputDevice>,
    clock: Arc<dyn AudioClock>,
    next_start_time: Duration,
    items: VecDeque<PlaybackItem>,
    next_voice: VoiceId,
    last_arrival: Option<u64>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputDevice>) -> Self {
        let clock = output.clock();
        let next_start_time = clock.now();
        Self {
            output,
            clock,
            next_start_time,
            items: VecDeque::new(),
            next_voice: 0,
            last_arrival: None,
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn next_start_time(&self) -> Duration {
        self.next_start_time
    }

    /// Schedule `buffer` right after everything already queued, never in the
    /// past. Buffers play in call order. Empty buffers are skipped.
    pub fn enqueue(&mut self, buffer: PcmBuffer, arrival_index: u64) -> Option<ScheduledSlot> {
        self.release_finished();

        if buffer.is_empty() {
            return None;
        }

        if let Some(last) = self.last_arrival {
            if arrival_index <= last {
                warn!("Playback arrival index went backwards ({} after {}), keeping call order", arrival_index, last);
            }
        }
        self.last_arrival = Some(arrival_index);

        let now = self.clock.now();
        let start = self.next_start_time.max(now);
        let end = start + buffer.duration();

        let voice = self.next_voice;
        self.next_voice += 1;

        self.output.schedule(voice, &buffer, start);
        self.next_start_time = end;

        debug!("Scheduled voice {} (arrival {}) at {:?} for {:?}", voice, arrival_index, start, end - start);

        self.items.push_back(PlaybackItem {
            voice,
            arrival_index,
            buffer,
            start,
            end,
        });

        Some(ScheduledSlot { voice, start, end })
    }

    /// True while any scheduled item has not reached its end time.
    pub fn is_speaking(&self) -> bool {
        self.scheduled_count() > 0
    }

    /// Items currently playing or waiting to play.
    pub fn scheduled_count(&self) -> usize {
        let now = self.clock.now();
        self.items.iter().filter(|item| item.end > now).count()
    }

    /// Drop items whose scheduled end has passed. Returns how many ended.
    pub fn release_finished(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.items.len();
        // Items are in start order and contiguous, so ended ones are a prefix.
        while self.items.front().is_some_and(|item| item.end <= now) {
            self.items.pop_front();
        }
        before - self.items.len()
    }

    /// Stop and discard everything playing or scheduled, and restart the
    /// timeline at `now`. Returns how many items were discarded.
    pub fn flush(&mut self) -> usize {
        self.release_finished();
        let discarded = self.items.len();

        self.output.stop_all();
        self.items.clear();
        self.next_start_time = self.clock.now();

        if discarded > 0 {
            debug!("Playback flushed, {} item(s) discarded", discarded);
        }
        discarded
    }

    /// Re-anchor the timeline at `now` without touching queued items.
    /// Used when the channel opens so greeting audio starts immediately.
    pub fn anchor_to_now(&mut self) {
        if self.items.is_empty() {
            self.next_start_time = self.clock.now();
        }
    }

    /// Flush and release the output device.
    pub fn close(&mut self) {
        self.flush();
        self.output.close();
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.output.close();
    }
}
