//! Sample buffering.
//!
//! - `PlaybackQueue`: FIFO of raw PCM16 chunks waiting to be scheduled.
//! - Capture ring: `ringbuf::HeapRb<f32>` whose `push_slice` is wait-free and
//!   safe to call from the real-time input callback.

pub mod chunk;
pub mod framer;

use std::collections::VecDeque;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half, held by the input callback thread.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the uplink worker.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^19 = 524 288 f32 samples ≈ 10.9 s at 48 kHz.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 19;

/// Create a matched producer/consumer pair for microphone samples.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}

/// Ordered backlog of raw PCM16 chunks awaiting playback.
///
/// Chunks are kept undecoded until they are dequeued, so decoding cost is
/// paid one chunk at a time by the drain loop.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    chunks: VecDeque<Vec<u8>>,
    queued_bytes: usize,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        self.queued_bytes += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.pop_front()?;
        self.queued_bytes -= chunk.len();
        Some(chunk)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes held across all queued chunks.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.queued_bytes = 0;
    }
}
