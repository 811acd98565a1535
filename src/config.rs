use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPTURE_RATE: u32 = 16000;
pub const DEFAULT_OUTPUT_RATE: u32 = 24000;

/// Forwarded unmodified to the remote agent at connect time.
/// Nothing here is interpreted by the session engine except the rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub role: String,
    pub persona: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_context: Option<String>,
    pub capture_rate: u32,
    pub output_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: "Software Engineer".to_string(),
            persona: "Senior Engineer".to_string(),
            candidate_context: None,
            capture_rate: DEFAULT_CAPTURE_RATE,
            output_rate: DEFAULT_OUTPUT_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    /// Samples per captured frame at the capture rate.
    pub frame_len: usize,
    /// Bounded queue between the capture line and the uplink task.
    pub frame_queue: usize,
    /// Lock-free ring between the device callback and the capture line.
    pub ring_capacity: usize,
    /// Connection log lines retained for the UI.
    pub log_capacity: usize,
    /// Inbound chunks larger than this are decoded on the blocking pool.
    pub decode_offload_bytes: usize,
    /// Command queue depth of the session controller.
    pub command_queue: usize,
    /// Upper bound on opening the duplex channel.
    pub connect_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            frame_len: 4096,
            frame_queue: 32,
            ring_capacity: 16384,
            log_capacity: 5,
            decode_offload_bytes: 32 * 1024,
            command_queue: 64,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// `LIVE_ROLE`, `LIVE_PERSONA` and `LIVE_CONTEXT` override the session
    /// labels when set.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(role) = lookup("LIVE_ROLE") {
            self.session.role = role;
        }
        if let Some(persona) = lookup("LIVE_PERSONA") {
            self.session.persona = persona;
        }
        if let Some(context) = lookup("LIVE_CONTEXT") {
            self.session.candidate_context = if context.trim().is_empty() { None } else { Some(context) };
        }
    }
}
