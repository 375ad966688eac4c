//! Events emitted to the host application.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `PlaybackEvent` | `VoiceSession::subscribe_playback` |
//! | `ConversationEvent` | `VoiceSession::subscribe_conversation` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Playback lifecycle
// ---------------------------------------------------------------------------

/// Externally observable edges of the playback scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// The first buffer of a playback run became active.
    Started,
    /// The queue and the set of active buffers are both empty again.
    Idle,
    /// The output device failed; playback stays silent until the next reset.
    DeviceError { detail: String },
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Text-side updates derived from transport events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConversationEvent {
    /// Speech recognised from the user; partial until `is_final`.
    UserTranscript {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
    },
    /// Incremental assistant reply text.
    AssistantText { text: String },
    /// The assistant finished its reply.
    AssistantComplete,
    /// Backend-reported failure (LLM or configuration).
    Error { message: String },
}
