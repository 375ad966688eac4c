use thiserror::Error;

/// All errors produced by voxline-core.
#[derive(Debug, Error)]
pub enum VoxlineError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("output context is closed")]
    OutputClosed,

    #[error("malformed PCM chunk: {0}")]
    MalformedChunk(String),

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("voice session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxlineError>;
