//! JSON framing for realtime transports. Inbound frames are decoded once
//! here into tagged `ChannelEvent`s; nothing past this module looks at
//! field names.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SessionConfig;
use crate::kernel::event::{ChannelEvent, OutboundMessage, Speaker};

#[derive(Debug, thiserror::Error)]
#[error("bad wire frame: {0}")]
pub struct WireError(#[from] serde_json::Error);

// --- Outbound ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage<'a> {
    Setup(&'a SessionConfig),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent<'a>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<Blob>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent<'a> {
    turns: Vec<Turn<'a>>,
    turn_complete: bool,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

pub fn encode_setup(config: &SessionConfig) -> Result<String, WireError> {
    serialize(&ClientMessage::Setup(config))
}

/// `capture_rate` labels the PCM mime type of audio chunks.
pub fn encode_outbound(message: &OutboundMessage, capture_rate: u32) -> Result<String, WireError> {
    match message {
        OutboundMessage::AudioChunk { bytes, .. } => serialize(&ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: Some(format!("audio/pcm;rate={}", capture_rate)),
                data: BASE64_STANDARD.encode(bytes),
            }],
        })),
        OutboundMessage::TextTrigger(text) => serialize(&ClientMessage::ClientContent(ClientContent {
            turns: vec![Turn {
                role: "user",
                parts: vec![TextPart { text }],
            }],
            turn_complete: true,
        })),
    }
}

fn serialize<T: Serialize>(value: &T) -> Result<String, WireError> {
    serde_json::to_string(value).map_err(|e| {
        warn!("Outbound frame not serializable: {}", e);
        WireError(e)
    })
}

// --- Inbound ---

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    turn_complete: bool,
    interrupted: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ModelTurn {
    parts: Vec<Part>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Part {
    inline_data: Option<Blob>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Transcription {
    text: Option<String>,
}

/// One server frame -> the events it carries, in the order they must be
/// applied: transcripts, then audio, then interruption, then turn end.
pub fn decode_server_message(raw: &str) -> Result<Vec<ChannelEvent>, WireError> {
    let msg: ServerMessage = serde_json::from_str(raw)?;
    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(ChannelEvent::Opened);
    }

    if let Some(content) = msg.server_content {
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            events.push(ChannelEvent::TranscriptDelta {
                speaker: Speaker::User,
                text,
            });
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            events.push(ChannelEvent::TranscriptDelta {
                speaker: Speaker::Agent,
                text,
            });
        }

        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            let Some(blob) = part.inline_data else { continue };
            match BASE64_STANDARD.decode(blob.data.as_bytes()) {
                Ok(bytes) => events.push(ChannelEvent::AudioChunk(bytes)),
                Err(e) => warn!("Dropping inline audio with invalid base64: {}", e),
            }
        }

        if content.interrupted {
            events.push(ChannelEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(ChannelEvent::TurnComplete);
        }
    }

    if msg.go_away.is_some() {
        events.push(ChannelEvent::Closed);
    }

    Ok(events)
}
