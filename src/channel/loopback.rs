use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{DuplexChannel, DuplexConnector, BEGIN_TRIGGER};
use crate::audio::codec;
use crate::audio::processing::rms;
use crate::audio::resample::resample_linear;
use crate::audio::tone;
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::kernel::event::{ChannelEvent, OutboundMessage, Speaker};

const SPEECH_RMS: f32 = 0.02;
const CHANNEL_DEPTH: usize = 64;

/// A local stand-in for the remote agent: greets on the begin trigger,
/// transcribes "speech" as placeholder deltas, and answers each user turn
/// by echoing it back. Speaking over the echo interrupts it.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    pub open_delay: Duration,
}

#[async_trait]
impl DuplexConnector for LoopbackConnector {
    async fn open(&self, config: &SessionConfig) -> Result<DuplexChannel, TransportError> {
        let (channel, events, outbound) = DuplexChannel::pair(CHANNEL_DEPTH);
        let agent = LoopbackAgent {
            capture_rate: config.capture_rate,
            output_rate: config.output_rate,
            role: config.role.clone(),
            heard: Vec::new(),
            speaking_until: None,
        };
        let delay = self.open_delay;
        info!("Loopback agent starting for role '{}'", config.role);
        tokio::spawn(agent.run(delay, events, outbound));
        Ok(channel)
    }
}

struct LoopbackAgent {
    capture_rate: u32,
    output_rate: u32,
    role: String,
    heard: Vec<f32>,
    speaking_until: Option<Instant>,
}

impl LoopbackAgent {
    async fn run(mut self, delay: Duration, events: mpsc::Sender<ChannelEvent>, mut outbound: mpsc::Receiver<OutboundMessage>) {
        tokio::time::sleep(delay).await;
        if events.send(ChannelEvent::Opened).await.is_err() {
            return;
        }

        while let Some(message) = outbound.recv().await {
            let replies = match message {
                OutboundMessage::TextTrigger(text) => self.on_text(&text),
                OutboundMessage::AudioChunk { seq, bytes } => self.on_audio(seq, &bytes),
            };
            for event in replies {
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }

        debug!("Loopback agent: session side closed");
        let _ = events.send(ChannelEvent::Closed).await;
    }

    fn on_text(&mut self, text: &str) -> Vec<ChannelEvent> {
        let line = if text == BEGIN_TRIGGER {
            format!("Hi. Let's talk about the {} role. Tell me about yourself.", self.role)
        } else {
            "Thanks, I have your submission.".to_string()
        };
        let chirp = tone::test_tone(self.output_rate);
        self.speak(&line, &chirp.samples)
    }

    fn on_audio(&mut self, seq: u64, bytes: &[u8]) -> Vec<ChannelEvent> {
        let Ok(frame) = codec::decode(bytes, self.capture_rate) else {
            return Vec::new();
        };
        let loud = rms(&frame.samples) > SPEECH_RMS;
        let mut replies = Vec::new();

        if loud {
            if self.speaking_until.is_some_and(|until| Instant::now() < until) {
                self.speaking_until = None;
                replies.push(ChannelEvent::Interrupted);
            }
            self.heard.extend_from_slice(&frame.samples);
            replies.push(ChannelEvent::TranscriptDelta {
                speaker: Speaker::User,
                text: format!("[frame {}] ", seq),
            });
        } else if !self.heard.is_empty() {
            let heard = std::mem::take(&mut self.heard);
            let secs = heard.len() as f32 / self.capture_rate.max(1) as f32;
            let echo = resample_linear(&heard, self.capture_rate, self.output_rate);
            replies.extend(self.speak(&format!("I heard about {:.1} seconds.", secs), &echo));
        }

        replies
    }

    fn speak(&mut self, line: &str, audio: &[f32]) -> Vec<ChannelEvent> {
        let mut replies = Vec::new();
        for word in line.split_inclusive(' ') {
            replies.push(ChannelEvent::TranscriptDelta {
                speaker: Speaker::Agent,
                text: word.to_string(),
            });
        }
        // Half-second chunks, like a streaming synthesizer.
        let chunk = (self.output_rate as usize / 2).max(1);
        for part in audio.chunks(chunk) {
            replies.push(ChannelEvent::AudioChunk(codec::encode(part)));
        }
        replies.push(ChannelEvent::TurnComplete);

        let secs = audio.len() as f64 / self.output_rate.max(1) as f64;
        self.speaking_until = Some(Instant::now() + Duration::from_secs_f64(secs));
        replies
    }
}
