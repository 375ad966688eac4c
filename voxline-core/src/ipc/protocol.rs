//! Transport events exchanged with the assistant backend.
//!
//! Each message is a JSON object with an `event` name and an optional `data`
//! payload, mirroring a socket.io-style emit:
//!
//! ```text
//! {"event":"audio_chunk","data":"AID/fw=="}
//! {"event":"turn_ended","data":{"final_transcript":"hello"}}
//! {"event":"llm_complete"}
//! ```
//!
//! Inbound messages form the closed `ServerEvent` enum, so handling a new
//! event kind is a compile-checked addition to `VoiceSession::dispatch`.

use serde::{Deserialize, Serialize};

use crate::audio::pcm::encode_base64_pcm;

/// Messages the backend sends to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Base64-encoded PCM16 LE speech (44.1 kHz mono by default).
    AudioChunk(String),
    /// A new user turn began; any assistant speech must be cut off.
    TurnStarted,
    /// Interim recognition result.
    TurnDetected {
        #[serde(default)]
        transcript: String,
        #[serde(default)]
        end_of_turn: bool,
    },
    /// The user's turn is complete.
    TurnEnded { final_transcript: String },
    /// One sentence of the assistant's reply.
    LlmChunk { text: String },
    LlmComplete,
    LlmError { error: String },
    ConfigError { message: String },
}

impl ServerEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AudioChunk(_) => "audio_chunk",
            Self::TurnStarted => "turn_started",
            Self::TurnDetected { .. } => "turn_detected",
            Self::TurnEnded { .. } => "turn_ended",
            Self::LlmChunk { .. } => "llm_chunk",
            Self::LlmComplete => "llm_complete",
            Self::LlmError { .. } => "llm_error",
            Self::ConfigError { .. } => "config_error",
        }
    }
}

/// Messages the client sends to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Base64-encoded PCM16 LE microphone frame (16 kHz mono).
    Stream(String),
    /// Switch the assistant persona for subsequent replies.
    PersonaChange { persona: String },
}

impl ClientEvent {
    /// Wrap a raw PCM16 frame for the transport.
    pub fn stream(frame: &[u8]) -> Self {
        Self::Stream(encode_base64_pcm(frame))
    }
}
