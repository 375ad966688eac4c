//! Audio I/O.
//!
//! # Output contexts
//!
//! The scheduler never talks to a device directly. It opens an
//! [`AudioOutput`] through an [`OutputBackend`], reads the context's own clock
//! via [`AudioOutput::current_time`], and pre-positions each decoded buffer on
//! that timeline with [`AudioOutput::schedule`]. Completions come back through
//! [`AudioOutput::take_ended`], polled from the session loop.
//!
//! Implementations:
//! - [`output::CpalOutput`] renders the timeline inside a cpal callback.
//! - [`virtual_device::VirtualDevice`] is a deterministic clock for tests and
//!   offline runs.
//!
//! # Capture
//!
//! [`capture::AudioCapture`] writes mono f32 microphone samples into an SPSC
//! ring from the real-time input callback.

pub mod capture;
pub mod device;
#[cfg(feature = "audio-cpal")]
pub mod output;
pub mod pcm;
pub mod resample;
pub mod virtual_device;

use crate::buffering::chunk::AudioChunk;
use crate::error::Result;

/// Handle for one scheduled buffer within an output context.
pub type SourceId = u64;

/// Power state of an output context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Clock is advancing and scheduled buffers are audible.
    Running,
    /// Context exists but its clock is halted until `resume()`.
    Suspended,
    /// Context has been released; every call is a no-op or error.
    Closed,
}

/// One output context: a clock plus a timeline of scheduled buffers.
pub trait AudioOutput: Send + 'static {
    fn state(&self) -> OutputState;

    /// Start (or restart) the context clock.
    ///
    /// # Errors
    /// Returns an error if the device refuses to start.
    fn resume(&mut self) -> Result<()>;

    /// Current position of the output clock in seconds since the context
    /// was created.
    fn current_time(&self) -> f64;

    /// Schedule `chunk` to start playing at `start_time` on this context's
    /// clock. Start times in the past play immediately.
    ///
    /// # Errors
    /// Returns an error if the context is closed or the device is gone.
    fn schedule(&mut self, chunk: AudioChunk, start_time: f64) -> Result<SourceId>;

    /// Force-stop one scheduled buffer. Unknown ids are ignored.
    fn stop(&mut self, source: SourceId);

    /// Drain completion notifications collected since the last call.
    fn take_ended(&mut self) -> Vec<SourceId>;

    /// Drain an asynchronous device failure (device unplugged, stream died).
    fn take_device_error(&mut self) -> Option<String>;

    /// Linear output gain in `[0, 1]`.
    fn set_gain(&mut self, gain: f32);

    /// Release the context. Idempotent.
    fn close(&mut self);
}

/// Factory for fresh output contexts.
pub trait OutputBackend: Send + 'static {
    /// Open a new context that accepts buffers at `sample_rate`.
    ///
    /// # Errors
    /// Returns an error if no device is available.
    fn open(&mut self, sample_rate: u32) -> Result<Box<dyn AudioOutput>>;
}
