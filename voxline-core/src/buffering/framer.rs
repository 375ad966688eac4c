//! Fixed-size PCM16 framing for the microphone uplink.
//!
//! Resampled mono samples arrive in arbitrary slice sizes; the transport
//! expects frames of exactly `frame_samples` samples encoded as PCM16 LE.

use crate::audio::pcm::encode_pcm16_le;

/// Accumulates f32 samples and emits encoded PCM16 frames.
#[derive(Debug)]
pub struct Pcm16Framer {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl Pcm16Framer {
    /// A zero frame size is bumped to one sample.
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Push samples, returning every frame completed by this call.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.frame_samples {
            let end = consumed + self.frame_samples;
            frames.push(encode_pcm16_le(&self.pending[consumed..end]));
            consumed = end;
        }
        self.pending.drain(..consumed);
        frames
    }

    /// Samples waiting for the next complete frame.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Drop the partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_full_frames() {
        let mut framer = Pcm16Framer::new(4);
        assert!(framer.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(framer.pending_samples(), 3);

        let frames = framer.push(&[0.4, 0.5]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 8);
        assert_eq!(framer.pending_samples(), 1);
    }

    #[test]
    fn large_push_splits_into_several_frames() {
        let mut framer = Pcm16Framer::new(4096);
        let frames = framer.push(&vec![0.0; 4096 * 3 + 10]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 4096 * 2));
        assert_eq!(framer.pending_samples(), 10);
    }

    #[test]
    fn clear_discards_partial_frame() {
        let mut framer = Pcm16Framer::new(8);
        framer.push(&[0.5; 5]);
        framer.clear();
        assert_eq!(framer.pending_samples(), 0);
        assert!(framer.push(&[0.5; 7]).is_empty());
    }
}
