//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Two directions use it:
//!
//! - Capture: the microphone runs at the device rate (commonly 48 kHz) and the
//!   uplink wants 16 kHz. Input is a continuous stream, so `process` buffers
//!   any remainder until a full rubato block is available.
//! - Playback: TTS chunks arrive at 44.1 kHz and the output device may run at
//!   another rate. Back-to-back chunks form one continuous stream, so
//!   `process_contiguous` keeps rubato's state across chunks and hands each
//!   chunk exactly the number of samples its slot on the timeline holds.
//!
//! When both rates match, no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{Result, VoxlineError};

/// Extra lead-in samples on top of one rubato block of carried input.
const LEAD_SLACK: usize = 4;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input held by `process` between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
    /// Converted playback samples not yet handed out.
    pending: Vec<f32>,
    /// Input / output sample totals of the current playback stream.
    stream_in: u64,
    stream_out: u64,
    /// Resampler delay still to be trimmed from the stream head.
    skip: usize,
    primed: bool,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// Returns `VoxlineError::Resample` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(VoxlineError::Resample(format!(
                "invalid rates {source_rate} -> {target_rate}"
            )));
        }

        let ratio = target_rate as f64 / source_rate as f64;

        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
                pending: Vec::new(),
                stream_in: 0,
                stream_out: 0,
                skip: 0,
                primed: false,
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| VoxlineError::Resample(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();

        debug!(source_rate, target_rate, chunk_size, max_out, "resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            ratio,
            pending: Vec::new(),
            stream_in: 0,
            stream_out: 0,
            skip: 0,
            primed: false,
        })
    }

    /// Process a slice of a continuous stream, returning resampled output
    /// (may be empty while rubato's input block is still filling).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        let mut consumed = 0;
        while self.input_buf.len() - consumed >= self.chunk_size {
            let input_slice = &self.input_buf[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            consumed += self.chunk_size;
        }
        self.input_buf.drain(..consumed);

        result
    }

    /// Convert the next block of a contiguous playback stream.
    ///
    /// Returns exactly as many samples as keep the cumulative output at
    /// `round(total_input * ratio)`, so consecutive blocks tile the output
    /// timeline with no seams. Input that does not fill a rubato block is
    /// carried into the next call; the stream is delayed by a short silent
    /// lead-in instead of padding each block. Call `restart` before a block
    /// that does not continue the previous one.
    pub fn process_contiguous(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        if !self.primed {
            let lead = (self.chunk_size as f64 * self.ratio).ceil() as usize + LEAD_SLACK;
            self.pending.resize(lead, 0.0);
            self.skip = resampler.output_delay();
            self.primed = true;
        }

        self.input_buf.extend_from_slice(samples);
        let mut consumed = 0;
        while self.input_buf.len() - consumed >= self.chunk_size {
            let input_slice = &self.input_buf[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    let out = &self.output_buf[0][..produced];
                    let skip = self.skip.min(out.len());
                    self.skip -= skip;
                    self.pending.extend_from_slice(&out[skip..]);
                }
                Err(e) => {
                    error!("resampler block error: {e}");
                }
            }
            consumed += self.chunk_size;
        }
        self.input_buf.drain(..consumed);

        self.stream_in += samples.len() as u64;
        let target = (self.stream_in as f64 * self.ratio).round() as u64;
        let want = target.saturating_sub(self.stream_out) as usize;
        if self.pending.len() < want {
            debug!(short = want - self.pending.len(), "playback resampler underfilled");
            self.pending.resize(want, 0.0);
        }
        self.stream_out += want as u64;
        self.pending.drain(..want).collect()
    }

    /// Forget the current playback stream; the next `process_contiguous`
    /// call starts a new one.
    pub fn restart(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.input_buf.clear();
        self.pending.clear();
        self.stream_in = 0;
        self.stream_out = 0;
        self.skip = 0;
        self.primed = false;
    }

    /// Output length for a block of `input_len` samples.
    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len as f64 * self.ratio).round() as usize
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
