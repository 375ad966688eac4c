//! `VoiceSession`: one conversation's playback state behind a single actor.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceSession::spawn(backend, config)
//!     └─► dispatch(ServerEvent) / enqueue / reset / set_volume
//!         └─► shutdown()     → scheduler reset, device released, task joined
//! ```
//!
//! ## Threading
//!
//! Every mutation is a `SessionCommand` sent over one unbounded mpsc channel
//! to a tokio task that owns the `StreamingAudioScheduler`. The task is the
//! only place the scheduler is touched, so `reset()` can never interleave with
//! a half-finished drain step.
//!
//! While chunks are pending the task handles any waiting command first, then
//! schedules one chunk and yields. Otherwise it sleeps until a command arrives
//! or the poll interval elapses, at which point buffer completions and device
//! errors are collected.
//!
//! Dropping the handle without `shutdown()` closes the channel; the task then
//! resets the scheduler and exits on its own.

pub mod uplink;

use std::time::Duration;

use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{pcm::decode_base64_pcm, OutputBackend},
    error::{Result, VoxlineError},
    ipc::{
        events::{ConversationEvent, PlaybackEvent},
        protocol::ServerEvent,
    },
    scheduler::{SchedulerConfig, SchedulerSnapshot, StreamingAudioScheduler},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `VoiceSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sample rate of incoming PCM16 chunks (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Initial output gain in `[0, 1]`. Default: 1.0.
    pub volume: f32,
    /// How often completions are collected while nothing is queued.
    /// Default: 10 ms.
    pub poll_interval: Duration,
    /// Capacity of each broadcast channel. Default: 256.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::scheduler::DEFAULT_STREAM_SAMPLE_RATE,
            volume: 1.0,
            poll_interval: Duration::from_millis(10),
            event_capacity: BROADCAST_CAP,
        }
    }
}

enum SessionCommand {
    Enqueue(Vec<u8>),
    Reset,
    SetVolume(f32),
    Snapshot(oneshot::Sender<SchedulerSnapshot>),
    Shutdown,
}

/// Handle to a running playback session.
///
/// Cheap operations (`enqueue`, `reset`, `dispatch`) only post a command and
/// return immediately; they never wait for the audio device.
pub struct VoiceSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    playback_tx: broadcast::Sender<PlaybackEvent>,
    conversation_tx: broadcast::Sender<ConversationEvent>,
    task: JoinHandle<()>,
}

impl VoiceSession {
    /// Start the session actor on the current tokio runtime.
    ///
    /// No output context is opened until the first chunk is drained.
    pub fn spawn(backend: Box<dyn OutputBackend>, config: SessionConfig) -> Self {
        let capacity = config.event_capacity.max(1);
        let (playback_tx, _) = broadcast::channel(capacity);
        let (conversation_tx, _) = broadcast::channel(capacity);
        let (commands, rx) = mpsc::unbounded_channel();

        let scheduler = StreamingAudioScheduler::new(
            SchedulerConfig {
                sample_rate: config.sample_rate,
                volume: config.volume,
            },
            backend,
            playback_tx.clone(),
        );

        info!(
            sample_rate = config.sample_rate,
            poll_ms = config.poll_interval.as_millis() as u64,
            "voice session started"
        );
        let task = tokio::spawn(run(scheduler, rx, config.poll_interval));

        Self {
            commands,
            playback_tx,
            conversation_tx,
            task,
        }
    }

    /// Queue one raw PCM16 LE chunk for gapless playback.
    ///
    /// # Errors
    /// `VoxlineError::SessionClosed` after the actor has exited.
    pub fn enqueue(&self, chunk: Vec<u8>) -> Result<()> {
        self.send(SessionCommand::Enqueue(chunk))
    }

    /// Stop all playback immediately and discard the backlog.
    pub fn reset(&self) -> Result<()> {
        self.send(SessionCommand::Reset)
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.send(SessionCommand::SetVolume(volume))
    }

    /// Scheduler state after every command sent before this call.
    pub async fn snapshot(&self) -> Result<SchedulerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx))?;
        rx.await.map_err(|_| VoxlineError::SessionClosed)
    }

    /// Route one inbound transport event.
    ///
    /// Undecodable audio is logged and dropped; it never fails the session.
    pub fn dispatch(&self, event: ServerEvent) -> Result<()> {
        debug!(event = event.name(), "transport event");
        match event {
            ServerEvent::AudioChunk(payload) => match decode_base64_pcm(&payload) {
                Ok(bytes) => self.enqueue(bytes)?,
                Err(e) => warn!(len = payload.len(), "dropping audio_chunk: {e}"),
            },
            ServerEvent::TurnStarted => self.reset()?,
            ServerEvent::TurnDetected {
                transcript,
                end_of_turn,
            } => {
                if !end_of_turn && !transcript.trim().is_empty() {
                    self.emit(ConversationEvent::UserTranscript {
                        text: transcript,
                        is_final: false,
                    });
                }
            }
            ServerEvent::TurnEnded { final_transcript } => {
                // An empty final transcript leaves the assistant talking.
                if !final_transcript.trim().is_empty() {
                    self.emit(ConversationEvent::UserTranscript {
                        text: final_transcript,
                        is_final: true,
                    });
                    self.reset()?;
                }
            }
            ServerEvent::LlmChunk { text } => {
                self.emit(ConversationEvent::AssistantText { text });
            }
            ServerEvent::LlmComplete => self.emit(ConversationEvent::AssistantComplete),
            ServerEvent::LlmError { error } => {
                warn!(%error, "assistant backend error");
                self.emit(ConversationEvent::Error { message: error });
            }
            ServerEvent::ConfigError { message } => {
                warn!(%message, "assistant configuration error");
                self.emit(ConversationEvent::Error { message });
            }
        }
        Ok(())
    }

    /// Subscribe to `Started` / `Idle` / `DeviceError` edges.
    pub fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.playback_tx.subscribe()
    }

    /// Subscribe to transcript and assistant text updates.
    pub fn subscribe_conversation(&self) -> broadcast::Receiver<ConversationEvent> {
        self.conversation_tx.subscribe()
    }

    /// Reset playback, release the output device and wait for the actor.
    pub async fn shutdown(self) -> Result<()> {
        // The actor may already be gone; joining below still succeeds.
        let _ = self.commands.send(SessionCommand::Shutdown);
        self.task
            .await
            .map_err(|e| VoxlineError::Other(anyhow::anyhow!("session task failed: {e}")))?;
        info!("voice session shut down");
        Ok(())
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| VoxlineError::SessionClosed)
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.conversation_tx.send(event);
    }
}

/// Run device work that may block (opening, resuming or closing an output
/// context). On a multi-thread runtime the worker hands its other tasks off
/// first; a current-thread runtime runs it inline.
fn off_reactor<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// Returns `false` when the actor should exit.
fn handle(scheduler: &mut StreamingAudioScheduler, command: SessionCommand) -> bool {
    match command {
        SessionCommand::Enqueue(chunk) => {
            scheduler.enqueue(chunk);
        }
        SessionCommand::Reset => scheduler.reset(),
        SessionCommand::SetVolume(volume) => scheduler.set_volume(volume),
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(scheduler.snapshot());
        }
        SessionCommand::Shutdown => return false,
    }
    true
}

async fn run(
    mut scheduler: StreamingAudioScheduler,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if scheduler.has_pending() {
            match commands.try_recv() {
                Ok(command) => {
                    if !off_reactor(|| handle(&mut scheduler, command)) {
                        break;
                    }
                    continue;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
            off_reactor(|| scheduler.drain_next());
            scheduler.poll();
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    if !off_reactor(|| handle(&mut scheduler, command)) {
                        break;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => scheduler.poll(),
        }
    }

    off_reactor(|| scheduler.reset());
    let snap = scheduler.snapshot();
    info!(
        chunks_enqueued = snap.chunks_enqueued,
        chunks_scheduled = snap.chunks_scheduled,
        chunks_dropped = snap.chunks_dropped,
        resets = snap.resets,
        "session actor stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::virtual_device::VirtualDevice;

    fn session(device: &VirtualDevice) -> VoiceSession {
        VoiceSession::spawn(Box::new(device.clone()), SessionConfig::default())
    }

    #[tokio::test]
    async fn snapshot_reflects_prior_commands() {
        let device = VirtualDevice::new();
        let session = session(&device);

        session.enqueue(vec![0u8; 882]).unwrap();
        session.enqueue(vec![0u8; 882]).unwrap();
        let snap = session.snapshot().await.unwrap();
        assert_eq!(snap.chunks_enqueued, 2);

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn llm_events_become_conversation_events() {
        let device = VirtualDevice::new();
        let session = session(&device);
        let mut rx = session.subscribe_conversation();

        session
            .dispatch(ServerEvent::LlmChunk {
                text: "Arr, ".into(),
            })
            .unwrap();
        session.dispatch(ServerEvent::LlmComplete).unwrap();
        session
            .dispatch(ServerEvent::ConfigError {
                message: "missing key".into(),
            })
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ConversationEvent::AssistantText {
                text: "Arr, ".into()
            }
        );
        assert_eq!(rx.recv().await.unwrap(), ConversationEvent::AssistantComplete);
        assert_eq!(
            rx.recv().await.unwrap(),
            ConversationEvent::Error {
                message: "missing key".into()
            }
        );
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn end_of_turn_and_blank_partials_are_not_reported() {
        let device = VirtualDevice::new();
        let session = session(&device);
        let mut rx = session.subscribe_conversation();

        session
            .dispatch(ServerEvent::TurnDetected {
                transcript: "   ".into(),
                end_of_turn: false,
            })
            .unwrap();
        session
            .dispatch(ServerEvent::TurnDetected {
                transcript: "hello".into(),
                end_of_turn: true,
            })
            .unwrap();
        session
            .dispatch(ServerEvent::TurnDetected {
                transcript: "hello there".into(),
                end_of_turn: false,
            })
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ConversationEvent::UserTranscript {
                text: "hello there".into(),
                is_final: false
            }
        );
        assert!(rx.try_recv().is_err());
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_the_output_context() {
        let device = VirtualDevice::new();
        let session = session(&device);
        let mut rx = session.subscribe_playback();

        session.enqueue(vec![0u8; 44_100 * 2]).unwrap();
        assert_eq!(rx.recv().await.unwrap(), PlaybackEvent::Started);
        session.shutdown().await.unwrap();

        assert_eq!(device.contexts_opened(), 1);
        assert_eq!(device.context_state(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn device_work_runs_on_a_multi_thread_runtime() {
        let device = VirtualDevice::new();
        let session = session(&device);
        let mut rx = session.subscribe_playback();

        session.enqueue(vec![0u8; 4410 * 2]).unwrap();
        assert_eq!(rx.recv().await.unwrap(), PlaybackEvent::Started);
        session.reset().unwrap();
        assert_eq!(rx.recv().await.unwrap(), PlaybackEvent::Idle);

        session.shutdown().await.unwrap();
        assert_eq!(device.context_state(), None);
    }
}
