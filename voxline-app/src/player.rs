//! `voxline play`: feed NDJSON server events into a `VoiceSession`.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use voxline_core::{
    CpalBackend, OutputBackend, SchedulerSnapshot, ServerEvent, SessionConfig, VoiceSession,
};

use crate::{cli::PlayArgs, emit, settings::AppSettings};

/// How often to check for the end of playback once input is exhausted.
const DRAIN_POLL: Duration = Duration::from_millis(20);

pub async fn run(args: PlayArgs, settings: &AppSettings) -> anyhow::Result<()> {
    let device = args.device.or_else(|| settings.preferred_output_device.clone());
    let config = SessionConfig {
        sample_rate: args.sample_rate.unwrap_or(settings.playback_sample_rate),
        volume: args.volume.unwrap_or(settings.volume).clamp(0.0, 1.0),
        ..SessionConfig::default()
    };
    let backend = CpalBackend::new(device);

    match args.input.as_deref() {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            play_stream(Box::new(backend), config, BufReader::new(file), path).await
        }
        None => {
            let stdin = BufReader::new(tokio::io::stdin());
            play_stream(Box::new(backend), config, stdin, Path::new("<stdin>")).await
        }
    }
}

/// Dispatch every line of `reader`, then wait until the backlog has played.
pub async fn play_stream<R>(
    backend: Box<dyn OutputBackend>,
    config: SessionConfig,
    reader: R,
    source: &Path,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let session = VoiceSession::spawn(backend, config);
    let playback = emit::forward(session.subscribe_playback(), "playback");
    let conversation = emit::forward(session.subscribe_conversation(), "conversation");

    let (events, skipped) = dispatch_lines(&session, reader, source).await?;
    info!(events, skipped, "input exhausted; waiting for playback to finish");

    let snap = wait_for_drain(&session).await?;
    if snap.dormant {
        warn!("playback stopped early: output device unavailable");
    }

    session.shutdown().await?;
    let _ = playback.await;
    let _ = conversation.await;
    Ok(())
}

async fn dispatch_lines<R>(
    session: &VoiceSession,
    reader: R,
    source: &Path,
) -> anyhow::Result<(usize, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut events = 0usize;
    let mut skipped = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("failed to read {}", source.display()))?
    {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ServerEvent>(line) {
            Ok(event) => {
                session.dispatch(event)?;
                events += 1;
            }
            Err(e) => {
                warn!(line = line_no, "skipping malformed server event: {e}");
                skipped += 1;
            }
        }
    }
    Ok((events, skipped))
}

/// Resolve once nothing is queued or playing, or the device has failed.
async fn wait_for_drain(session: &VoiceSession) -> anyhow::Result<SchedulerSnapshot> {
    loop {
        let snap = session.snapshot().await?;
        if snap.dormant || (snap.queued == 0 && snap.active == 0) {
            return Ok(snap);
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_core::audio::pcm::{encode_base64_pcm, encode_pcm16_le};
    use voxline_core::VirtualDevice;

    #[tokio::test]
    async fn plays_script_and_skips_garbage_lines() {
        let device = VirtualDevice::new();
        let chunk = encode_base64_pcm(&encode_pcm16_le(&[0.2; 441]));
        let script = format!(
            "{{\"event\":\"audio_chunk\",\"data\":\"{chunk}\"}}\n\
             not json at all\n\
             \n\
             {{\"event\":\"audio_chunk\",\"data\":\"{chunk}\"}}\n"
        );

        // Complete buffers in the background so the drain wait can finish.
        let clock = device.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                clock.advance(0.05);
            }
        });

        let session = VoiceSession::spawn(Box::new(device.clone()), SessionConfig::default());
        let (events, skipped) = dispatch_lines(&session, script.as_bytes(), Path::new("script"))
            .await
            .unwrap();
        assert_eq!((events, skipped), (2, 1));

        let snap = tokio::time::timeout(Duration::from_secs(2), wait_for_drain(&session))
            .await
            .unwrap()
            .unwrap();
        ticker.abort();

        assert_eq!(snap.chunks_scheduled, 2);
        assert!(!snap.dormant);
        assert_eq!(device.scheduled().len(), 2);
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dead_device_does_not_hang_the_drain() {
        let device = VirtualDevice::new();
        device.fail_next_open("no output device");
        let chunk = encode_base64_pcm(&encode_pcm16_le(&[0.2; 441]));
        let script = format!("{{\"event\":\"audio_chunk\",\"data\":\"{chunk}\"}}\n");

        let session = VoiceSession::spawn(Box::new(device), SessionConfig::default());
        dispatch_lines(&session, script.as_bytes(), Path::new("script"))
            .await
            .unwrap();
        let snap = tokio::time::timeout(Duration::from_secs(2), wait_for_drain(&session))
            .await
            .unwrap()
            .unwrap();
        assert!(snap.dormant);
        session.shutdown().await.unwrap();
    }
}
