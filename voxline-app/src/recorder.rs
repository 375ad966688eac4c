//! `voxline capture`: microphone → NDJSON `stream` events (and optionally WAV).

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;
use voxline_core::{CaptureConfig, ClientEvent, MicUplink};

use crate::{
    cli::CaptureArgs,
    emit::emit_line,
    settings::{normalize_persona, AppSettings},
};

/// Encoded frames buffered between the uplink worker and stdout.
const FRAME_CHANNEL_CAP: usize = 64;

type Wav = hound::WavWriter<BufWriter<File>>;

pub async fn run(args: CaptureArgs, settings: &AppSettings) -> anyhow::Result<()> {
    let persona = normalize_persona(args.persona.as_deref().unwrap_or(settings.persona.as_str()));
    emit_line(&ClientEvent::PersonaChange { persona })?;

    let config = CaptureConfig {
        target_sample_rate: settings.capture_sample_rate,
        frame_samples: settings.capture_frame_samples,
        preferred_input_device: args
            .device
            .or_else(|| settings.preferred_input_device.clone()),
    };
    let mut wav = match args.wav.as_deref() {
        Some(path) => Some(create_wav(path, config.target_sample_rate)?),
        None => None,
    };

    let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<u8>>(FRAME_CHANNEL_CAP);
    // `start` blocks until the device is open.
    let uplink = tokio::task::block_in_place(|| MicUplink::start(config, frames_tx))
        .context("failed to open microphone")?;

    let deadline = args
        .seconds
        .map(|s| Instant::now() + Duration::from_secs_f64(s));
    let until_deadline = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(until_deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut frames = 0usize;
    loop {
        tokio::select! {
            frame = frames_rx.recv() => match frame {
                Some(frame) => {
                    emit_line(&ClientEvent::stream(&frame))?;
                    if let Some(writer) = wav.as_mut() {
                        write_frame(writer, &frame)?;
                    }
                    frames += 1;
                }
                None => break,
            },
            _ = &mut until_deadline => break,
            _ = &mut ctrl_c => break,
        }
    }

    uplink.stop().await?;
    if let Some(writer) = wav {
        writer.finalize().context("failed to finalize WAV file")?;
    }
    info!(frames, "capture finished");
    Ok(())
}

fn create_wav(path: &Path, sample_rate: u32) -> anyhow::Result<Wav> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))
}

/// Append one PCM16 LE frame.
fn write_frame<W>(writer: &mut hound::WavWriter<W>, frame: &[u8]) -> anyhow::Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    for pair in frame.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_core::audio::pcm::encode_pcm16_le;

    #[test]
    fn frames_land_in_a_16_bit_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mic.wav");

        let mut writer = create_wav(&path, 16_000).unwrap();
        let frame = encode_pcm16_le(&[0.0, 0.5, -0.5, 1.0]);
        write_frame(&mut writer, &frame).unwrap();
        write_frame(&mut writer, &frame).unwrap();
        writer.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -16384, 32767, 0, 16383, -16384, 32767]);
    }
}
