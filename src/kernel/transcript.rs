use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Speaker;
use super::scheduler::PlaybackScheduler;

pub type UtteranceId = u64;

/// One contiguous span of text from a single speaker.
/// Append-only while open, immutable once `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub id: UtteranceId,
    pub speaker: Speaker,
    pub text: String,
    pub started_at: DateTime<Utc>,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Empty delta, nothing touched.
    Ignored,
    Extended(UtteranceId),
    /// `closed` is the utterance that the speaker switch ended, if any.
    Opened {
        id: UtteranceId,
        closed: Option<UtteranceId>,
    },
}

/// Merges the per-speaker delta streams into one ordered transcript.
///
/// At most one utterance is open at a time, and it is always the last
/// entry: a delta from a different speaker closes it before opening a new
/// one, so a speaker switch is itself a turn boundary.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    utterances: Vec<Utterance>,
    open: Option<usize>,
    next_id: UtteranceId,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_delta(&mut self, speaker: Speaker, text: &str) -> DeltaOutcome {
        // Zero-length heartbeats never open or re-open anything.
        if text.is_empty() {
            return DeltaOutcome::Ignored;
        }

        if let Some(idx) = self.open {
            let current = &mut self.utterances[idx];
            if current.speaker == speaker {
                current.text.push_str(text);
                return DeltaOutcome::Extended(current.id);
            }
        }

        let closed = self.close_turn();
        let id = self.push(speaker, text.to_string(), false);
        DeltaOutcome::Opened { id, closed }
    }

    /// Close whatever is open. No-op when nothing is.
    pub fn close_turn(&mut self) -> Option<UtteranceId> {
        let idx = self.open.take()?;
        let utterance = &mut self.utterances[idx];
        utterance.complete = true;
        Some(utterance.id)
    }

    /// The remote turn was cut short: end the open utterance and drop the
    /// audio that was queued for it. Returns how many items were flushed.
    pub fn on_interrupt(&mut self, playback: &mut PlaybackScheduler) -> usize {
        self.close_turn();
        playback.flush()
    }

    /// Fold a complete, already-final message into the transcript (injected
    /// text or code). Closes the open utterance first to keep ordering.
    pub fn push_complete(&mut self, speaker: Speaker, text: &str) -> UtteranceId {
        self.close_turn();
        self.push(speaker, text.to_string(), true)
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn open_utterance(&self) -> Option<&Utterance> {
        self.open.map(|idx| &self.utterances[idx])
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn clear(&mut self) {
        self.utterances.clear();
        self.open = None;
    }

    fn push(&mut self, speaker: Speaker, text: String, complete: bool) -> UtteranceId {
        let id = self.next_id;
        self.next_id += 1;
        self.utterances.push(Utterance {
            id,
            speaker,
            text,
            started_at: Utc::now(),
            complete,
        });
        if !complete {
            self.open = Some(self.utterances.len() - 1);
        }
        id
    }
}

/// Text that appeared since the last `TranscriptCursor::advance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptGrowth {
    pub speaker: Speaker,
    pub text: String,
    /// Continues an utterance already reported earlier.
    pub continued: bool,
}

/// Follows snapshots of a transcript and reports only what is new, so a
/// console can print the conversation as it grows.
#[derive(Debug, Default)]
pub struct TranscriptCursor {
    shown: Vec<(UtteranceId, usize)>,
}

impl TranscriptCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, transcript: &[Utterance]) -> Vec<TranscriptGrowth> {
        // A new session clears the transcript; ids are never reused.
        let restarted = transcript.len() < self.shown.len()
            || self.shown.iter().zip(transcript).any(|((id, _), u)| *id != u.id);
        if restarted {
            self.shown.clear();
        }

        let mut growth = Vec::new();
        for (i, utterance) in transcript.iter().enumerate() {
            match self.shown.get_mut(i) {
                Some((_, len)) => {
                    if let Some(tail) = utterance.text.get(*len..).filter(|tail| !tail.is_empty()) {
                        growth.push(TranscriptGrowth {
                            speaker: utterance.speaker,
                            text: tail.to_string(),
                            continued: true,
                        });
                        *len = utterance.text.len();
                    }
                }
                None => {
                    growth.push(TranscriptGrowth {
                        speaker: utterance.speaker,
                        text: utterance.text.clone(),
                        continued: false,
                    });
                    self.shown.push((utterance.id, utterance.text.len()));
                }
            }
        }
        growth
    }
}
