//! Output contexts backed by a cpal stream.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It must not allocate, free, block or perform I/O. The renderer therefore:
//! - receives voices and stop requests over a bounded crossbeam channel,
//! - mixes every voice overlapping the current callback block,
//! - hands finished voices back over another channel, so their sample
//!   buffers are freed on the scheduling side,
//! - publishes the number of frames rendered so far, which is the context
//!   clock.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. Each context spawns a keeper
//! thread that builds the stream, owns it for the context's lifetime and drops
//! it on `close()`. Open errors are reported back to `open()` over a sync
//! oneshot channel.

use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use super::{
    device::{resolve_device, DeviceDirection},
    resample::RateConverter,
    AudioOutput, OutputBackend, OutputState, SourceId,
};
use crate::buffering::chunk::AudioChunk;
use crate::error::{Result, VoxlineError};

/// Voices in flight per context before new ones are rejected.
const VOICE_CAPACITY: usize = 256;

/// Rubato block size for playback conversion. Bounds the carried input and
/// with it the silent lead-in of a resampled stream (about 3 ms).
const RESAMPLE_BLOCK: usize = 128;

/// Backend opening contexts on a named or default output device.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    preferred_device: Option<String>,
}

impl CpalBackend {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl OutputBackend for CpalBackend {
    fn open(&mut self, sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalOutput::open(
            self.preferred_device.as_deref(),
            sample_rate,
        )?))
    }
}

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

enum RenderCommand {
    Play(Voice),
    Stop(SourceId),
}

enum KeeperCommand {
    Play(Sender<Result<()>>),
    Shutdown,
}

/// State moved into the cpal callback.
struct Renderer {
    commands: Receiver<RenderCommand>,
    finished: Sender<Voice>,
    voices: Vec<Voice>,
    frames_rendered: Arc<AtomicU64>,
    gain_bits: Arc<AtomicU32>,
    channels: usize,
}

impl Renderer {
    fn retire(&self, voice: Voice) {
        if let Err(TrySendError::Full(_)) = self.finished.try_send(voice) {
            warn!("finished-voice channel full; completion lost");
        }
    }

    fn render<T>(&mut self, data: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let base = self.frames_rendered.load(Ordering::Relaxed);
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                RenderCommand::Play(mut voice) => {
                    // A start already behind the clock plays from its first sample now.
                    voice.start_frame = voice.start_frame.max(base);
                    self.voices.push(voice);
                }
                RenderCommand::Stop(id) => {
                    if let Some(pos) = self.voices.iter().position(|v| v.id == id) {
                        let voice = self.voices.swap_remove(pos);
                        self.retire(voice);
                    }
                }
            }
        }

        let gain = f32::from_bits(self.gain_bits.load(Ordering::Relaxed));
        let mut frames = 0u64;

        for frame in data.chunks_mut(self.channels) {
            let t = base + frames;
            let mut acc = 0f32;
            for voice in &self.voices {
                if t >= voice.start_frame {
                    if let Some(s) = voice.samples.get((t - voice.start_frame) as usize) {
                        acc += *s;
                    }
                }
            }
            let value = T::from_sample((acc * gain).clamp(-1.0, 1.0));
            for out in frame.iter_mut() {
                *out = value;
            }
            frames += 1;
        }

        let end = base + frames;
        self.frames_rendered.store(end, Ordering::Release);

        let mut i = 0;
        while i < self.voices.len() {
            let v = &self.voices[i];
            if v.start_frame + v.samples.len() as u64 <= end {
                let voice = self.voices.swap_remove(i);
                self.retire(voice);
            } else {
                i += 1;
            }
        }
    }
}

/// An output context rendering onto a cpal stream.
pub struct CpalOutput {
    commands: Sender<RenderCommand>,
    finished: Receiver<Voice>,
    errors: Receiver<String>,
    keeper: Sender<KeeperCommand>,
    keeper_thread: Option<JoinHandle<()>>,
    frames_rendered: Arc<AtomicU64>,
    gain_bits: Arc<AtomicU32>,
    converter: RateConverter,
    device_rate: u32,
    /// Frame just past the last scheduled voice.
    stream_end: Option<u64>,
    next_id: SourceId,
    state: OutputState,
}

impl CpalOutput {
    /// Open a paused stream on the preferred (or default) output device.
    ///
    /// # Errors
    /// `VoxlineError::NoDefaultOutputDevice` when no device exists, or
    /// `VoxlineError::AudioStream` if cpal fails to build the stream.
    pub fn open(preferred_device: Option<&str>, stream_rate: u32) -> Result<Self> {
        let (cmd_tx, cmd_rx) = bounded::<RenderCommand>(VOICE_CAPACITY);
        let (finished_tx, finished_rx) = bounded::<Voice>(VOICE_CAPACITY);
        let (error_tx, error_rx) = bounded::<String>(16);
        let (keeper_tx, keeper_rx) = crossbeam_channel::unbounded::<KeeperCommand>();
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let frames_rendered = Arc::new(AtomicU64::new(0));
        let gain_bits = Arc::new(AtomicU32::new(1.0f32.to_bits()));

        let preferred_device = preferred_device.map(str::to_owned);
        let renderer_frames = Arc::clone(&frames_rendered);
        let renderer_gain = Arc::clone(&gain_bits);

        let keeper_thread = std::thread::Builder::new()
            .name("voxline-output".into())
            .spawn(move || {
                let built = build_stream(preferred_device.as_deref(), error_tx, |channels| {
                    Renderer {
                        commands: cmd_rx,
                        finished: finished_tx,
                        voices: Vec::with_capacity(VOICE_CAPACITY),
                        frames_rendered: renderer_frames,
                        gain_bits: renderer_gain,
                        channels,
                    }
                });
                let (stream, device_rate) = match built {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let _ = open_tx.send(Ok(device_rate));

                while let Ok(cmd) = keeper_rx.recv() {
                    match cmd {
                        KeeperCommand::Play(reply) => {
                            let result = stream
                                .play()
                                .map_err(|e| VoxlineError::AudioStream(e.to_string()));
                            let _ = reply.send(result);
                        }
                        KeeperCommand::Shutdown => break,
                    }
                }

                // Stream drops here, releasing the device on this thread.
                drop(stream);
                debug!("output stream released");
            })
            .map_err(VoxlineError::Io)?;

        let device_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = keeper_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = keeper_thread.join();
                return Err(VoxlineError::AudioStream(
                    "output thread died before the stream opened".into(),
                ));
            }
        };

        let converter = RateConverter::new(stream_rate, device_rate, RESAMPLE_BLOCK)?;
        info!(
            stream_rate,
            device_rate,
            passthrough = converter.is_passthrough(),
            "output context opened"
        );

        Ok(Self {
            commands: cmd_tx,
            finished: finished_rx,
            errors: error_rx,
            keeper: keeper_tx,
            keeper_thread: Some(keeper_thread),
            frames_rendered,
            gain_bits,
            converter,
            device_rate,
            stream_end: None,
            next_id: 1,
            state: OutputState::Suspended,
        })
    }
}

fn build_stream(
    preferred_device: Option<&str>,
    error_tx: Sender<String>,
    make_renderer: impl FnOnce(usize) -> Renderer,
) -> Result<(Stream, u32)> {
    let device = resolve_device(DeviceDirection::Output, preferred_device)?;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| VoxlineError::AudioDevice(e.to_string()))?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: StreamConfig = supported.config();

    info!(device_rate, channels, format = ?supported.sample_format(), "output config selected");

    let renderer = make_renderer(channels as usize);
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, renderer, error_tx),
        SampleFormat::I16 => build_typed::<i16>(&device, &config, renderer, error_tx),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, renderer, error_tx),
        SampleFormat::I32 => build_typed::<i32>(&device, &config, renderer, error_tx),
        fmt => {
            return Err(VoxlineError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }?;

    Ok((stream, device_rate))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut renderer: Renderer,
    error_tx: Sender<String>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info| renderer.render(data),
            move |err| {
                error!("audio output stream error: {err}");
                let _ = error_tx.try_send(err.to_string());
            },
            None,
        )
        .map_err(|e| VoxlineError::AudioStream(e.to_string()))
}

impl AudioOutput for CpalOutput {
    fn state(&self) -> OutputState {
        self.state
    }

    fn resume(&mut self) -> Result<()> {
        match self.state {
            OutputState::Running => Ok(()),
            OutputState::Closed => Err(VoxlineError::OutputClosed),
            OutputState::Suspended => {
                let (reply_tx, reply_rx) = bounded(1);
                self.keeper
                    .send(KeeperCommand::Play(reply_tx))
                    .map_err(|_| VoxlineError::AudioStream("output thread is gone".into()))?;
                reply_rx
                    .recv()
                    .map_err(|_| VoxlineError::AudioStream("output thread is gone".into()))??;
                self.state = OutputState::Running;
                debug!("output context resumed");
                Ok(())
            }
        }
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, chunk: AudioChunk, start_time: f64) -> Result<SourceId> {
        if self.state == OutputState::Closed {
            return Err(VoxlineError::OutputClosed);
        }

        let requested = (start_time.max(0.0) * self.device_rate as f64).round() as u64;
        let start_frame = match self.stream_end {
            Some(end) if requested.abs_diff(end) <= 1 => end,
            _ => {
                self.converter.restart();
                requested
            }
        };
        let samples = self.converter.process_contiguous(&chunk.samples);
        let end = start_frame + samples.len() as u64;

        let id = self.next_id;
        self.next_id += 1;
        let voice = Voice {
            id,
            start_frame,
            samples,
        };

        self.commands.try_send(RenderCommand::Play(voice)).map_err(|e| match e {
            TrySendError::Full(_) => VoxlineError::AudioStream("too many voices in flight".into()),
            TrySendError::Disconnected(_) => {
                VoxlineError::AudioStream("output stream is gone".into())
            }
        })?;
        self.stream_end = Some(end);
        Ok(id)
    }

    fn stop(&mut self, source: SourceId) {
        let _ = self.commands.try_send(RenderCommand::Stop(source));
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        self.finished.try_iter().map(|voice| voice.id).collect()
    }

    fn take_device_error(&mut self) -> Option<String> {
        self.errors.try_recv().ok()
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn close(&mut self) {
        if self.state == OutputState::Closed {
            return;
        }
        self.state = OutputState::Closed;
        let _ = self.keeper.send(KeeperCommand::Shutdown);
        if let Some(handle) = self.keeper_thread.take() {
            if handle.join().is_err() {
                warn!("output thread panicked during shutdown");
            }
        }
        info!("output context closed");
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
