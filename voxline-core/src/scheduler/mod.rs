//! `StreamingAudioScheduler`: gapless playback of streamed PCM16 chunks.
//!
//! ## Timeline
//!
//! ```text
//! enqueue(bytes) ─► PlaybackQueue ─► drain_next()
//!                                        │ decode i16 → f32
//!                                        │ start = max(next_start_time, output.current_time())
//!                                        ▼
//!                               AudioOutput::schedule(chunk, start)
//!                                        │ next_start_time = start + duration
//!                                        ▼
//!                                  active sources ─► poll() ─► Idle
//! ```
//!
//! Each buffer is positioned on the output clock as soon as it is decoded,
//! so bursty or jittery arrival never opens a gap as long as the backlog is
//! ahead of the device.
//!
//! ## Lifecycle edges
//!
//! `PlaybackEvent::Started` is sent when a buffer becomes active while the
//! scheduler is not already speaking. `PlaybackEvent::Idle` is sent once the
//! queue and the active set are empty together. `reset()` ends a run early
//! and reports `Idle` for it.
//!
//! The scheduler is a plain `&mut self` state machine; `VoiceSession` owns it
//! inside a single task and routes every mutation through one channel.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{AudioOutput, OutputBackend, OutputState, SourceId},
    buffering::{chunk::AudioChunk, PlaybackQueue},
    ipc::events::PlaybackEvent,
};

/// Default stream sample rate for TTS audio.
pub const DEFAULT_STREAM_SAMPLE_RATE: u32 = 44_100;

/// Configuration for `StreamingAudioScheduler`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sample rate of incoming PCM16 chunks (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Initial linear output gain in `[0, 1]`. Default: 1.0.
    pub volume: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_STREAM_SAMPLE_RATE,
            volume: 1.0,
        }
    }
}

/// Point-in-time view of scheduler state and counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSnapshot {
    pub queued: usize,
    pub active: usize,
    /// PlaybackClock: next free start time in output seconds.
    pub next_start_time: f64,
    pub speaking: bool,
    pub dormant: bool,
    pub chunks_enqueued: usize,
    pub chunks_scheduled: usize,
    pub chunks_dropped: usize,
    pub resets: usize,
}

/// Plays a stream of raw PCM16 chunks back to back on an output clock.
pub struct StreamingAudioScheduler {
    config: SchedulerConfig,
    backend: Box<dyn OutputBackend>,
    output: Option<Box<dyn AudioOutput>>,
    queue: PlaybackQueue,
    /// PlaybackClock.
    next_start_time: f64,
    active: Vec<SourceId>,
    speaking: bool,
    /// Set after a device failure; cleared by `reset()`.
    dormant: bool,
    volume: f32,
    events: broadcast::Sender<PlaybackEvent>,
    chunks_enqueued: usize,
    chunks_scheduled: usize,
    chunks_dropped: usize,
    resets: usize,
}

impl StreamingAudioScheduler {
    pub fn new(
        config: SchedulerConfig,
        backend: Box<dyn OutputBackend>,
        events: broadcast::Sender<PlaybackEvent>,
    ) -> Self {
        let volume = config.volume.clamp(0.0, 1.0);
        Self {
            config,
            backend,
            output: None,
            queue: PlaybackQueue::new(),
            next_start_time: 0.0,
            active: Vec::new(),
            speaking: false,
            dormant: false,
            volume,
            events,
            chunks_enqueued: 0,
            chunks_scheduled: 0,
            chunks_dropped: 0,
            resets: 0,
        }
    }

    /// Queue one raw PCM16 LE chunk. Empty chunks are dropped silently.
    ///
    /// Returns `true` when the chunk was queued and the drain loop has work.
    pub fn enqueue(&mut self, chunk: Vec<u8>) -> bool {
        if chunk.is_empty() {
            debug!("dropping empty audio chunk");
            return false;
        }
        self.chunks_enqueued += 1;
        self.queue.push(chunk);
        self.has_pending()
    }

    /// Whether the drain loop should keep running.
    pub fn has_pending(&self) -> bool {
        !self.dormant && !self.queue.is_empty()
    }

    /// Decode and schedule the next queued chunk.
    ///
    /// Returns `false` when nothing was dequeued (empty queue, dormant, or
    /// the output could not be brought up).
    pub fn drain_next(&mut self) -> bool {
        if !self.has_pending() {
            return false;
        }
        if !self.ensure_output() {
            return false;
        }
        let Some(raw) = self.queue.pop() else {
            return false;
        };

        let chunk = match AudioChunk::from_pcm16_le(&raw, self.config.sample_rate) {
            Ok(chunk) if !chunk.is_empty() => chunk,
            Ok(_) => {
                self.chunks_dropped += 1;
                self.maybe_idle();
                return true;
            }
            Err(e) => {
                warn!(bytes = raw.len(), "dropping undecodable audio chunk: {e}");
                self.chunks_dropped += 1;
                self.maybe_idle();
                return true;
            }
        };
        drop(raw);

        let Some(output) = self.output.as_mut() else {
            return false;
        };
        let now = output.current_time();
        let start = self.next_start_time.max(now);
        let duration = chunk.duration_secs();
        let samples = chunk.len();

        match output.schedule(chunk, start) {
            Ok(id) => {
                self.next_start_time = start + duration;
                self.active.push(id);
                self.chunks_scheduled += 1;
                debug!(
                    source = id,
                    samples,
                    start = format_args!("{start:.4}"),
                    lead = format_args!("{:.4}", start - now),
                    "scheduled audio chunk"
                );
                if !self.speaking {
                    self.speaking = true;
                    let _ = self.events.send(PlaybackEvent::Started);
                }
            }
            Err(e) => {
                self.chunks_dropped += 1;
                self.enter_dormant(e.to_string());
            }
        }
        true
    }

    /// Drain the whole queue without yielding.
    pub fn drain_all(&mut self) -> usize {
        let mut drained = 0;
        while self.drain_next() {
            drained += 1;
        }
        drained
    }

    /// Collect completions and asynchronous device errors from the output.
    pub fn poll(&mut self) {
        let Some(output) = self.output.as_mut() else {
            return;
        };

        if let Some(detail) = output.take_device_error() {
            self.enter_dormant(detail);
            return;
        }

        let ended = output.take_ended();
        if ended.is_empty() {
            return;
        }
        self.active.retain(|id| !ended.contains(id));
        self.maybe_idle();
    }

    /// Cut playback: stop active buffers, empty the queue, zero the clock
    /// and release the output context. A no-op when already idle.
    pub fn reset(&mut self) {
        if self.output.is_none() && self.queue.is_empty() && self.active.is_empty() && !self.dormant
        {
            return;
        }

        let active = std::mem::take(&mut self.active);
        let stopped = active.len();
        if let Some(mut output) = self.output.take() {
            for id in active {
                output.stop(id);
            }
            output.close();
        }

        let discarded = self.queue.len();
        self.queue.clear();
        self.next_start_time = 0.0;
        self.dormant = false;
        self.resets += 1;
        info!(stopped, discarded, "playback reset");

        if self.speaking {
            self.speaking = false;
            let _ = self.events.send(PlaybackEvent::Idle);
        }
    }

    /// Set output gain; applies to the current and all future contexts.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(output) = self.output.as_mut() {
            output.set_gain(self.volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// PlaybackClock value.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_dormant(&self) -> bool {
        self.dormant
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            queued: self.queue.len(),
            active: self.active.len(),
            next_start_time: self.next_start_time,
            speaking: self.speaking,
            dormant: self.dormant,
            chunks_enqueued: self.chunks_enqueued,
            chunks_scheduled: self.chunks_scheduled,
            chunks_dropped: self.chunks_dropped,
            resets: self.resets,
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Make sure a running output context exists. Opening a new context
    /// restarts the PlaybackClock at 0.
    fn ensure_output(&mut self) -> bool {
        if self.output.is_none() {
            match self.backend.open(self.config.sample_rate) {
                Ok(mut output) => {
                    output.set_gain(self.volume);
                    self.output = Some(output);
                    self.next_start_time = 0.0;
                }
                Err(e) => {
                    self.enter_dormant(e.to_string());
                    return false;
                }
            }
        }

        let Some(output) = self.output.as_mut() else {
            return false;
        };
        match output.state() {
            OutputState::Running => true,
            OutputState::Suspended => match output.resume() {
                Ok(()) => true,
                Err(e) => {
                    self.enter_dormant(e.to_string());
                    false
                }
            },
            OutputState::Closed => {
                let detail = output
                    .take_device_error()
                    .unwrap_or_else(|| "output context closed unexpectedly".into());
                self.enter_dormant(detail);
                false
            }
        }
    }

    fn enter_dormant(&mut self, detail: String) {
        if self.dormant {
            return;
        }
        error!(%detail, queued = self.queue.len(), "output device failed; playback dormant until reset");
        self.dormant = true;
        let _ = self.events.send(PlaybackEvent::DeviceError { detail });
    }

    fn maybe_idle(&mut self) {
        if self.speaking && self.active.is_empty() && self.queue.is_empty() {
            self.speaking = false;
            debug!("playback idle");
            let _ = self.events.send(PlaybackEvent::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::virtual_device::VirtualDevice;
    use approx::assert_relative_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    const RATE: u32 = 44_100;

    fn pcm(samples: usize) -> Vec<u8> {
        vec![0x10; samples * 2]
    }

    fn scheduler(device: &VirtualDevice) -> (StreamingAudioScheduler, broadcast::Receiver<PlaybackEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let sched = StreamingAudioScheduler::new(
            SchedulerConfig::default(),
            Box::new(device.clone()),
            tx,
        );
        (sched, rx)
    }

    fn drain_events(rx: &mut broadcast::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) => return out,
                Err(e) => panic!("unexpected channel state: {e:?}"),
            }
        }
    }

    #[test]
    fn clock_equals_sum_of_chunk_durations() {
        let device = VirtualDevice::new();
        let (mut sched, _rx) = scheduler(&device);

        let sizes = [4096usize, 1024, 333, 8000, 1];
        for &n in &sizes {
            sched.enqueue(pcm(n));
        }
        assert_eq!(sched.drain_all(), sizes.len());

        let expected: f64 = sizes.iter().map(|&n| n as f64 / RATE as f64).sum();
        assert_relative_eq!(sched.next_start_time(), expected, epsilon = 1e-12);
        assert_eq!(sched.active_count(), sizes.len());
    }

    #[test]
    fn chunks_play_in_enqueue_order() {
        let device = VirtualDevice::new();
        let (mut sched, _rx) = scheduler(&device);

        let sizes = [4096usize, 1024, 333, 8000, 1];
        for &n in &sizes {
            sched.enqueue(pcm(n));
        }
        sched.drain_all();

        let buffers = device.scheduled();
        let counts: Vec<usize> = buffers.iter().map(|b| b.sample_count).collect();
        assert_eq!(counts, sizes);
        assert_relative_eq!(buffers[0].start_time, 0.0);
        for pair in buffers.windows(2) {
            assert_relative_eq!(
                pair[1].start_time,
                pair[0].start_time + pair[0].sample_count as f64 / RATE as f64,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn three_chunks_are_back_to_back() {
        let device = VirtualDevice::new();
        let (mut sched, _rx) = scheduler(&device);

        for _ in 0..3 {
            sched.enqueue(pcm(4096));
        }
        sched.drain_all();

        let buffers = device.scheduled();
        assert_eq!(buffers.len(), 3);
        let d = 4096.0 / RATE as f64;
        assert_relative_eq!(d, 0.0929, epsilon = 1e-4);
        assert_relative_eq!(buffers[0].start_time, 0.0);
        assert_relative_eq!(buffers[1].start_time, d, epsilon = 1e-12);
        assert_relative_eq!(buffers[2].start_time, 2.0 * d, epsilon = 1e-12);
        for pair in buffers.windows(2) {
            let gap = pair[1].start_time - (pair[0].start_time + pair[0].duration);
            assert!(gap <= 1e-12, "gap {gap}");
        }
    }

    #[test]
    fn late_chunk_starts_at_current_time() {
        let device = VirtualDevice::new();
        let (mut sched, _rx) = scheduler(&device);

        sched.enqueue(pcm(4410));
        sched.drain_all();
        device.advance(0.5);
        sched.poll();

        sched.enqueue(pcm(4410));
        sched.drain_all();
        let buffers = device.scheduled();
        assert_relative_eq!(buffers[1].start_time, 0.5);
        assert_relative_eq!(sched.next_start_time(), 0.6, epsilon = 1e-9);
    }

    #[test]
    fn empty_chunk_changes_nothing() {
        let device = VirtualDevice::new();
        let (mut sched, mut rx) = scheduler(&device);

        assert!(!sched.enqueue(Vec::new()));
        sched.drain_all();
        assert_eq!(sched.next_start_time(), 0.0);
        assert_eq!(sched.active_count(), 0);
        assert_eq!(device.contexts_opened(), 0);
        assert!(drain_events(&mut rx).is_empty());
    }

    #[test]
    fn odd_length_chunk_is_dropped_without_stopping_the_stream() {
        let device = VirtualDevice::new();
        let (mut sched, _rx) = scheduler(&device);

        sched.enqueue(pcm(100));
        sched.enqueue(vec![1, 2, 3]);
        sched.enqueue(pcm(100));
        sched.drain_all();

        assert_eq!(device.scheduled().len(), 2);
        let snap = sched.snapshot();
        assert_eq!(snap.chunks_dropped, 1);
        assert_eq!(snap.chunks_scheduled, 2);
        assert_relative_eq!(sched.next_start_time(), 200.0 / RATE as f64, epsilon = 1e-12);
    }

    #[test]
    fn started_fires_once_per_run_and_idle_after_everything_ends() {
        let device = VirtualDevice::new();
        let (mut sched, mut rx) = scheduler(&device);

        for _ in 0..4 {
            sched.enqueue(pcm(441));
            sched.drain_next();
        }
        assert_eq!(drain_events(&mut rx), vec![PlaybackEvent::Started]);

        device.advance(0.025);
        sched.poll();
        assert!(drain_events(&mut rx).is_empty(), "two buffers still active");
        assert_eq!(sched.active_count(), 2);

        device.advance(0.1);
        sched.poll();
        assert_eq!(drain_events(&mut rx), vec![PlaybackEvent::Idle]);

        sched.poll();
        assert!(drain_events(&mut rx).is_empty());
    }

    #[test]
    fn idle_waits_for_queue_to_empty() {
        let device = VirtualDevice::new();
        let (mut sched, mut rx) = scheduler(&device);

        sched.enqueue(pcm(441));
        sched.drain_next();
        sched.enqueue(pcm(441));

        // First buffer ends while the second is still queued.
        device.advance(0.02);
        sched.poll();
        assert_eq!(drain_events(&mut rx), vec![PlaybackEvent::Started]);

        sched.drain_next();
        assert!(drain_events(&mut rx).is_empty(), "run continues without a second Started");

        device.advance(0.02);
        sched.poll();
        assert_eq!(drain_events(&mut rx), vec![PlaybackEvent::Idle]);
    }

    #[test]
    fn reset_when_idle_is_a_noop() {
        let device = VirtualDevice::new();
        let (mut sched, mut rx) = scheduler(&device);

        sched.reset();
        sched.reset();
        assert!(drain_events(&mut rx).is_empty());
        assert_eq!(sched.snapshot().resets, 0);
        assert_eq!(device.contexts_opened(), 0);
    }

    #[test]
    fn reset_mid_playback_starts_a_fresh_timeline() {
        let device = VirtualDevice::new();
        let (mut sched, mut rx) = scheduler(&device);

        sched.enqueue(pcm(44_100));
        sched.enqueue(pcm(44_100));
        sched.drain_next();
        device.advance(0.3);
        sched.poll();

        sched.reset();
        assert_eq!(sched.active_count(), 0);
        assert_eq!(sched.queued(), 0);
        assert_eq!(sched.next_start_time(), 0.0);
        assert_eq!(device.context_state(), None);
        assert_eq!(
            drain_events(&mut rx),
            vec![PlaybackEvent::Started, PlaybackEvent::Idle]
        );

        sched.enqueue(pcm(4096));
        sched.drain_all();
        assert_eq!(device.contexts_opened(), 2);
        let last = device.scheduled().pop().unwrap();
        assert_eq!(last.context, 2);
        assert_eq!(last.start_time, 0.0);

        device.advance(1.0);
        sched.poll();
        assert_eq!(
            drain_events(&mut rx),
            vec![PlaybackEvent::Started, PlaybackEvent::Idle]
        );
    }

    #[test]
    fn suspended_output_is_resumed_before_first_buffer() {
        let device = VirtualDevice::new();
        device.start_suspended(true);
        let (mut sched, _rx) = scheduler(&device);

        sched.enqueue(pcm(100));
        sched.enqueue(pcm(100));
        sched.drain_all();
        assert_eq!(device.resume_count(), 1);
        assert_eq!(device.context_state(), Some(OutputState::Running));
        assert_eq!(device.scheduled().len(), 2);
    }

    #[test]
    fn open_failure_goes_dormant_and_buffers_until_reset() {
        let device = VirtualDevice::new();
        device.fail_next_open("no output device");
        let (mut sched, mut rx) = scheduler(&device);

        sched.enqueue(pcm(100));
        assert!(!sched.drain_next());
        assert!(sched.is_dormant());
        assert_eq!(
            drain_events(&mut rx),
            vec![PlaybackEvent::DeviceError {
                detail: "audio device error: no output device".into()
            }]
        );

        assert!(!sched.enqueue(pcm(100)));
        assert_eq!(sched.queued(), 2);
        assert_eq!(sched.drain_all(), 0);

        sched.reset();
        assert!(!sched.is_dormant());
        assert_eq!(sched.queued(), 0);

        sched.enqueue(pcm(100));
        assert_eq!(sched.drain_all(), 1);
        assert_eq!(device.scheduled().len(), 1);
    }

    #[test]
    fn revoked_device_is_reported_from_poll() {
        let device = VirtualDevice::new();
        let (mut sched, mut rx) = scheduler(&device);

        sched.enqueue(pcm(44_100));
        sched.drain_all();
        device.revoke("device removed");
        sched.poll();

        assert!(sched.is_dormant());
        assert_eq!(
            drain_events(&mut rx),
            vec![
                PlaybackEvent::Started,
                PlaybackEvent::DeviceError {
                    detail: "device removed".into()
                }
            ]
        );

        sched.reset();
        assert_eq!(drain_events(&mut rx), vec![PlaybackEvent::Idle]);
    }

    #[test]
    fn schedule_failure_loses_only_that_chunk() {
        let device = VirtualDevice::new();
        let (mut sched, _rx) = scheduler(&device);

        sched.enqueue(pcm(100));
        sched.drain_all();
        device.fail_next_schedule("xrun");
        sched.enqueue(pcm(100));
        sched.enqueue(pcm(100));
        sched.drain_all();

        assert!(sched.is_dormant());
        assert_eq!(sched.queued(), 1, "chunk after the failure stays buffered");
        assert_eq!(sched.snapshot().chunks_dropped, 1);
    }

    #[test]
    fn volume_is_clamped_and_applied_to_new_contexts() {
        let device = VirtualDevice::new();
        let (mut sched, _rx) = scheduler(&device);

        sched.set_volume(1.7);
        assert_eq!(sched.volume(), 1.0);
        sched.set_volume(0.4);
        sched.enqueue(pcm(10));
        sched.drain_all();
        assert_eq!(device.gain(), Some(0.4));

        sched.set_volume(-2.0);
        assert_eq!(device.gain(), Some(0.0));
    }

    #[test]
    fn reset_then_full_cycle_reaches_idle_again() {
        let device = VirtualDevice::new();
        let (mut sched, mut rx) = scheduler(&device);

        sched.enqueue(pcm(4096));
        sched.drain_all();
        sched.reset();
        drain_events(&mut rx);

        for _ in 0..3 {
            sched.enqueue(pcm(4096));
        }
        sched.drain_all();
        device.advance(1.0);
        sched.poll();
        assert_eq!(
            drain_events(&mut rx),
            vec![PlaybackEvent::Started, PlaybackEvent::Idle]
        );
        assert!(!sched.is_speaking());
    }
}
