//! # voxline-core
//!
//! Streaming voice playback engine SDK for a real-time voice assistant client.
//!
//! ## Architecture
//!
//! ```text
//! ServerEvent (audio_chunk, turn_*, llm_*)
//!        │
//!  VoiceSession::dispatch ──► mpsc ──► session actor (tokio task)
//!                                          │
//!                              StreamingAudioScheduler
//!                                 │ PlaybackQueue → decode → schedule
//!                                 ▼
//!                     AudioOutput (cpal renderer | VirtualDevice)
//!                                 │
//!                  broadcast::Sender<PlaybackEvent>  (Started / Idle)
//!
//! Microphone → AudioCapture → SPSC RingBuffer → MicUplink(spawn_blocking)
//!                                   │ resample 16 kHz, 4096-sample PCM16 frames
//!                                   ▼
//!                          mpsc::Sender<Vec<u8>> → ClientEvent::Stream
//! ```
//!
//! Audio callbacks are allocation-free. Decoding, resampling and scheduling
//! happen off the real-time threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod scheduler;

// Convenience re-exports for downstream crates
pub use audio::virtual_device::VirtualDevice;
pub use audio::{AudioOutput, OutputBackend, OutputState};
pub use engine::uplink::{CaptureConfig, MicUplink};
pub use engine::{SessionConfig, VoiceSession};
pub use error::{Result, VoxlineError};
pub use ipc::events::{ConversationEvent, PlaybackEvent};
pub use ipc::protocol::{ClientEvent, ServerEvent};
pub use scheduler::{SchedulerConfig, SchedulerSnapshot, StreamingAudioScheduler};

#[cfg(feature = "audio-cpal")]
pub use audio::output::CpalBackend;
