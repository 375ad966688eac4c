//! Microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread. It must not block on
//! a mutex or perform I/O. Samples are downmixed to mono in a scratch buffer
//! sized on the first callback, then written into an SPSC ring whose
//! `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send`. `AudioCapture` must be created and dropped on
//! the same thread; the uplink worker does both inside `spawn_blocking`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    buffering::CaptureProducer,
    error::{Result, VoxlineError},
};

/// Handle to an active capture stream.
///
/// **Not `Send`**: keep it on its creation thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: cpal::Stream,
    /// Set to `false` to make the callback no-op.
    running: Arc<AtomicBool>,
    /// Capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

/// Average interleaved frames down to mono, writing into `out`.
pub fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    let channels = channels.max(1);
    let frames = interleaved.len() / channels;
    out.resize(frames, 0.0);
    if channels == 1 {
        out.copy_from_slice(&interleaved[..frames]);
        return;
    }
    for (dst, frame) in out.iter_mut().zip(interleaved.chunks_exact(channels)) {
        *dst = frame.iter().sum::<f32>() / channels as f32;
    }
}

impl AudioCapture {
    /// Open the preferred (or default) input device and push mono f32
    /// samples into `producer`.
    ///
    /// # Errors
    /// `VoxlineError::NoDefaultInputDevice` when no microphone is available,
    /// or `VoxlineError::AudioStream` if cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        producer: CaptureProducer,
        running: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::{DeviceTrait, StreamTrait};
        use cpal::SampleFormat;

        use super::device::{resolve_device, DeviceDirection};

        let device = resolve_device(DeviceDirection::Input, preferred_device)?;
        tracing::info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| VoxlineError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config = supported.config();

        tracing::info!(sample_rate, channels, "capture config selected");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_typed::<f32>(&device, &config, channels, producer, Arc::clone(&running))
            }
            SampleFormat::I16 => {
                build_typed::<i16>(&device, &config, channels, producer, Arc::clone(&running))
            }
            SampleFormat::U16 => {
                build_typed::<u16>(&device, &config, channels, producer, Arc::clone(&running))
            }
            SampleFormat::U8 => {
                build_typed::<u8>(&device, &config, channels, producer, Arc::clone(&running))
            }
            fmt => {
                return Err(VoxlineError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| VoxlineError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stub when the `audio-cpal` feature is disabled.
    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _producer: CaptureProducer,
        _running: Arc<AtomicBool>,
        _preferred_device: Option<&str>,
    ) -> Result<Self> {
        Err(VoxlineError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut producer: CaptureProducer,
    running: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;
    use cpal::Sample;

    use crate::buffering::Producer;

    let mut as_f32: Vec<f32> = Vec::new();
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                as_f32.resize(data.len(), 0.0);
                for (dst, s) in as_f32.iter_mut().zip(data) {
                    *dst = (*s).to_sample::<f32>();
                }
                downmix_into(&as_f32, channels, &mut mono);

                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    tracing::warn!("capture ring full: dropped {} frames", mono.len() - written);
                }
            },
            |err| tracing::error!("audio input stream error: {err}"),
            None,
        )
        .map_err(|e| VoxlineError::AudioStream(e.to_string()))
}
