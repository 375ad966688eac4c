//! Microphone uplink: capture → 16 kHz mono → fixed PCM16 frames.
//!
//! ```text
//! AudioCapture (cpal callback) → SPSC ring → worker (spawn_blocking)
//!                                              │ RateConverter::process
//!                                              │ Pcm16Framer::push
//!                                              ▼
//!                                   mpsc::Sender<Vec<u8>>  (4096-sample frames)
//! ```
//!
//! `cpal::Stream` is `!Send`, so `AudioCapture` is opened inside the blocking
//! worker and dropped there. A sync channel carries the open result back to
//! `start()`, which blocks until the device is confirmed.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{
    audio::{capture::AudioCapture, resample::RateConverter},
    buffering::{create_capture_ring, framer::Pcm16Framer, CaptureConsumer, Consumer},
    error::{Result, VoxlineError},
};

/// Samples drained from the capture ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// Configuration for `MicUplink`.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate the transport expects (Hz). Default: 16000.
    pub target_sample_rate: u32,
    /// Samples per emitted frame. Default: 4096.
    pub frame_samples: usize,
    /// Preferred input device name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            frame_samples: 4096,
            preferred_input_device: None,
        }
    }
}

/// Everything the worker loop needs, moved into the blocking task.
pub(crate) struct UplinkContext {
    pub consumer: CaptureConsumer,
    pub running: Arc<AtomicBool>,
    pub capture_sample_rate: u32,
    pub target_sample_rate: u32,
    pub frame_samples: usize,
    pub frames_tx: mpsc::Sender<Vec<u8>>,
    pub frames_sent: Arc<AtomicUsize>,
}

/// Running microphone capture.
pub struct MicUplink {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    frames_sent: Arc<AtomicUsize>,
}

impl MicUplink {
    /// Open the microphone and start streaming encoded frames into
    /// `frames_tx`. Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `VoxlineError::NoDefaultInputDevice` / `VoxlineError::AudioStream`
    ///   when the device cannot be opened.
    pub fn start(config: CaptureConfig, frames_tx: mpsc::Sender<Vec<u8>>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let frames_sent = Arc::new(AtomicUsize::new(0));
        let (producer, consumer) = create_capture_ring();

        let worker_running = Arc::clone(&running);
        let worker_frames_sent = Arc::clone(&frames_sent);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let worker = tokio::task::spawn_blocking(move || {
            // ── Open device on THIS thread (cpal::Stream is !Send) ──
            let capture = match AudioCapture::open(
                producer,
                Arc::clone(&worker_running),
                config.preferred_input_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    worker_running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            run(UplinkContext {
                consumer,
                running: worker_running,
                capture_sample_rate: capture.sample_rate,
                target_sample_rate: config.target_sample_rate,
                frame_samples: config.frame_samples,
                frames_tx,
                frames_sent: worker_frames_sent,
            });

            capture.stop();
            drop(capture);
        });

        match open_rx.recv() {
            Ok(Ok(capture_sample_rate)) => {
                info!(capture_sample_rate, "microphone uplink started");
                Ok(Self {
                    running,
                    worker: Some(worker),
                    frames_sent,
                })
            }
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                Err(VoxlineError::Other(anyhow::anyhow!(
                    "uplink worker died before opening the device"
                )))
            }
        }
    }

    /// Frames delivered to the channel so far.
    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Stop capture and wait for the worker to release the device.
    /// A trailing partial frame is discarded.
    pub async fn stop(mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker
                .await
                .map_err(|e| VoxlineError::Other(anyhow::anyhow!("uplink worker failed: {e}")))?;
        }
        info!(frames = self.frames_sent(), "microphone uplink stopped");
        Ok(())
    }
}

impl Drop for MicUplink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Blocking worker loop. Runs until `running` is cleared or the receiver
/// goes away.
pub(crate) fn run(mut ctx: UplinkContext) {
    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.target_sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create uplink resampler: {e}");
            ctx.running.store(false, Ordering::SeqCst);
            return;
        }
    };
    if !resampler.is_passthrough() {
        info!(
            from = ctx.capture_sample_rate,
            to = ctx.target_sample_rate,
            "uplink resampling enabled"
        );
    }

    let mut framer = Pcm16Framer::new(ctx.frame_samples);
    let mut raw = vec![0f32; DRAIN_CHUNK];

    'outer: while ctx.running.load(Ordering::Relaxed) {
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(EMPTY_SLEEP);
            continue;
        }

        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            continue;
        }

        for frame in framer.push(&resampled) {
            if ctx.frames_tx.blocking_send(frame).is_err() {
                warn!("uplink receiver dropped; stopping capture");
                break 'outer;
            }
            ctx.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    ctx.running.store(false, Ordering::SeqCst);
    let discarded = framer.pending_samples();
    framer.clear();
    info!(
        frames = ctx.frames_sent.load(Ordering::Relaxed),
        discarded, "uplink worker stopped"
    );
}
