//! Decoded audio chunk handed from the playback queue to an output context.

use crate::audio::pcm::pcm16_le_to_f32;
use crate::error::{Result, VoxlineError};

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Built once per drained chunk on the scheduling side; ownership moves into
/// the output context when the chunk is scheduled.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0).
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode a raw PCM16 LE network chunk.
    ///
    /// # Errors
    /// `VoxlineError::MalformedChunk` for odd byte lengths or a zero sample rate.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(VoxlineError::MalformedChunk("sample rate is zero".into()));
        }
        Ok(Self::new(pcm16_le_to_f32(bytes)?, sample_rate))
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
