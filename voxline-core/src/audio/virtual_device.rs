//! Deterministic output device driven by an explicit clock.
//!
//! `VirtualDevice` stands in for a sound card: every context it opens starts
//! at time 0 and only moves when [`VirtualDevice::advance`] is called. Buffers
//! whose end time has been reached are reported as ended, exactly like a real
//! device's completion callbacks. Every scheduled buffer is recorded so the
//! timeline can be inspected afterwards.
//!
//! The device handle is cheap to clone; clones share state, so a test can
//! keep one handle while the scheduler owns another as its backend.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioOutput, OutputBackend, OutputState, SourceId};
use crate::buffering::chunk::AudioChunk;
use crate::error::{Result, VoxlineError};

/// Tolerance when deciding whether a buffer's end time has been reached.
const END_EPSILON: f64 = 1e-9;

/// One buffer as it was placed on a virtual timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    /// 1-based index of the context the buffer was scheduled on.
    pub context: u64,
    pub source: SourceId,
    /// Effective start time on the context clock.
    pub start_time: f64,
    pub duration: f64,
    pub sample_count: usize,
}

#[derive(Debug)]
struct VirtualSource {
    id: SourceId,
    end_time: f64,
}

#[derive(Debug)]
struct ContextState {
    generation: u64,
    time: f64,
    state: OutputState,
    sources: Vec<VirtualSource>,
    ended: Vec<SourceId>,
    gain: f32,
    next_id: SourceId,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct DeviceState {
    contexts_opened: u64,
    current: Option<ContextState>,
    start_suspended: bool,
    fail_open: Option<String>,
    fail_schedule: Option<String>,
    resumes: usize,
    history: Vec<ScheduledBuffer>,
}

impl DeviceState {
    fn context_mut(&mut self, generation: u64) -> Option<&mut ContextState> {
        self.current
            .as_mut()
            .filter(|ctx| ctx.generation == generation)
    }

    fn context(&self, generation: u64) -> Option<&ContextState> {
        self.current.as_ref().filter(|ctx| ctx.generation == generation)
    }
}

/// Shared handle to a virtual sound card.
#[derive(Debug, Clone, Default)]
pub struct VirtualDevice {
    inner: Arc<Mutex<DeviceState>>,
}

impl VirtualDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open future contexts in the `Suspended` state.
    pub fn start_suspended(&self, suspended: bool) {
        self.inner.lock().start_suspended = suspended;
    }

    /// Make the next `open` call fail with `detail`.
    pub fn fail_next_open(&self, detail: impl Into<String>) {
        self.inner.lock().fail_open = Some(detail.into());
    }

    /// Make the next `schedule` call fail with `detail`.
    pub fn fail_next_schedule(&self, detail: impl Into<String>) {
        self.inner.lock().fail_schedule = Some(detail.into());
    }

    /// Simulate the device disappearing under the current context.
    pub fn revoke(&self, detail: impl Into<String>) {
        if let Some(ctx) = self.inner.lock().current.as_mut() {
            ctx.error = Some(detail.into());
            ctx.state = OutputState::Closed;
        }
    }

    /// Move the current context's clock forward by `seconds`, completing
    /// every buffer whose end time is reached. Suspended contexts don't move.
    pub fn advance(&self, seconds: f64) {
        let mut dev = self.inner.lock();
        let Some(ctx) = dev.current.as_mut() else {
            return;
        };
        if ctx.state != OutputState::Running {
            return;
        }

        ctx.time += seconds.max(0.0);
        let now = ctx.time;
        ctx.sources
            .sort_by(|a, b| a.end_time.total_cmp(&b.end_time));
        let done = ctx
            .sources
            .iter()
            .take_while(|s| s.end_time <= now + END_EPSILON)
            .count();
        let finished: Vec<SourceId> = ctx.sources.drain(..done).map(|s| s.id).collect();
        ctx.ended.extend(finished);
    }

    /// Clock of the current context, or 0 when no context is open.
    pub fn current_time(&self) -> f64 {
        self.inner.lock().current.as_ref().map(|c| c.time).unwrap_or(0.0)
    }

    pub fn contexts_opened(&self) -> u64 {
        self.inner.lock().contexts_opened
    }

    /// State of the current context, `None` when none is open.
    pub fn context_state(&self) -> Option<OutputState> {
        self.inner.lock().current.as_ref().map(|c| c.state)
    }

    /// Every buffer scheduled on any context, in scheduling order.
    pub fn scheduled(&self) -> Vec<ScheduledBuffer> {
        self.inner.lock().history.clone()
    }

    /// Buffers on the current context that have not finished yet.
    pub fn playing(&self) -> usize {
        self.inner
            .lock()
            .current
            .as_ref()
            .map(|c| c.sources.len())
            .unwrap_or(0)
    }

    pub fn resume_count(&self) -> usize {
        self.inner.lock().resumes
    }

    pub fn gain(&self) -> Option<f32> {
        self.inner.lock().current.as_ref().map(|c| c.gain)
    }
}

impl OutputBackend for VirtualDevice {
    fn open(&mut self, _sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
        let mut dev = self.inner.lock();
        if let Some(detail) = dev.fail_open.take() {
            return Err(VoxlineError::AudioDevice(detail));
        }

        dev.contexts_opened += 1;
        let generation = dev.contexts_opened;
        let state = if dev.start_suspended {
            OutputState::Suspended
        } else {
            OutputState::Running
        };
        dev.current = Some(ContextState {
            generation,
            time: 0.0,
            state,
            sources: Vec::new(),
            ended: Vec::new(),
            gain: 1.0,
            next_id: 1,
            error: None,
        });

        Ok(Box::new(VirtualOutput {
            device: Arc::clone(&self.inner),
            generation,
        }))
    }
}

/// A context opened on a [`VirtualDevice`].
#[derive(Debug)]
pub struct VirtualOutput {
    device: Arc<Mutex<DeviceState>>,
    generation: u64,
}

impl AudioOutput for VirtualOutput {
    fn state(&self) -> OutputState {
        self.device
            .lock()
            .context(self.generation)
            .map(|c| c.state)
            .unwrap_or(OutputState::Closed)
    }

    fn resume(&mut self) -> Result<()> {
        let mut dev = self.device.lock();
        dev.resumes += 1;
        let ctx = dev
            .context_mut(self.generation)
            .ok_or(VoxlineError::OutputClosed)?;
        match ctx.state {
            OutputState::Closed => Err(VoxlineError::OutputClosed),
            _ => {
                ctx.state = OutputState::Running;
                Ok(())
            }
        }
    }

    fn current_time(&self) -> f64 {
        self.device
            .lock()
            .context(self.generation)
            .map(|c| c.time)
            .unwrap_or(0.0)
    }

    fn schedule(&mut self, chunk: AudioChunk, start_time: f64) -> Result<SourceId> {
        let mut dev = self.device.lock();
        if let Some(detail) = dev.fail_schedule.take() {
            return Err(VoxlineError::AudioStream(detail));
        }

        let ctx = dev
            .context_mut(self.generation)
            .ok_or(VoxlineError::OutputClosed)?;
        if ctx.state == OutputState::Closed {
            return Err(VoxlineError::OutputClosed);
        }

        let id = ctx.next_id;
        ctx.next_id += 1;
        let start = start_time.max(ctx.time);
        let duration = chunk.duration_secs();
        ctx.sources.push(VirtualSource {
            id,
            end_time: start + duration,
        });

        let record = ScheduledBuffer {
            context: self.generation,
            source: id,
            start_time: start,
            duration,
            sample_count: chunk.len(),
        };
        dev.history.push(record);
        Ok(id)
    }

    fn stop(&mut self, source: SourceId) {
        let mut dev = self.device.lock();
        if let Some(ctx) = dev.context_mut(self.generation) {
            if let Some(pos) = ctx.sources.iter().position(|s| s.id == source) {
                ctx.sources.remove(pos);
                ctx.ended.push(source);
            }
        }
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        self.device
            .lock()
            .context_mut(self.generation)
            .map(|c| std::mem::take(&mut c.ended))
            .unwrap_or_default()
    }

    fn take_device_error(&mut self) -> Option<String> {
        self.device
            .lock()
            .context_mut(self.generation)
            .and_then(|c| c.error.take())
    }

    fn set_gain(&mut self, gain: f32) {
        if let Some(ctx) = self.device.lock().context_mut(self.generation) {
            ctx.gain = gain;
        }
    }

    fn close(&mut self) {
        let mut dev = self.device.lock();
        if dev.context(self.generation).is_some() {
            dev.current = None;
        }
    }
}
