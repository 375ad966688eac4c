//! Command-line parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Voxline - streaming voice client for a conversational assistant
#[derive(Debug, Parser)]
#[command(name = "voxline", version, about)]
pub struct Cli {
    /// Settings file (default: platform data directory)
    #[arg(long = "settings", global = true, value_name = "FILE")]
    pub settings_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Play NDJSON server events (stdin or --input) and print host events
    Play(PlayArgs),
    /// Stream the microphone as NDJSON client events
    Capture(CaptureArgs),
    /// List audio input and output devices as JSON
    Devices,
    /// Print the effective settings
    Settings {
        /// Save the effective settings back to the settings file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
pub struct PlayArgs {
    /// Read server events from a file instead of stdin
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Output volume in [0, 1]
    #[arg(long)]
    pub volume: Option<f32>,

    /// Output device name
    #[arg(long)]
    pub device: Option<String>,

    /// Sample rate of the incoming audio chunks (Hz)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
pub struct CaptureArgs {
    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long, value_parser = parse_seconds)]
    pub seconds: Option<f64>,

    /// Also write the captured 16 kHz audio to a WAV file
    #[arg(long, value_name = "FILE")]
    pub wav: Option<PathBuf>,

    /// Input device name
    #[arg(long)]
    pub device: Option<String>,

    /// Persona announced in the config message
    #[arg(long)]
    pub persona: Option<String>,
}

fn parse_seconds(value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s > 0.0)
        .ok_or_else(|| format!("expected a positive number of seconds, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("voxline").chain(args.iter().copied()))
    }

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn play_flags() {
        let cli = parse(&[
            "play",
            "--input",
            "reply.ndjson",
            "--volume",
            "0.5",
            "--sample-rate",
            "24000",
            "--settings",
            "custom.json",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Play(PlayArgs {
                input: Some(PathBuf::from("reply.ndjson")),
                volume: Some(0.5),
                device: None,
                sample_rate: Some(24_000),
            })
        );
        assert_eq!(cli.settings_path, Some(PathBuf::from("custom.json")));
    }

    #[test]
    fn capture_flags() {
        let cli = parse(&["capture", "--seconds", "2.5", "--wav", "mic.wav", "--persona", "wizard"])
            .unwrap();
        let Command::Capture(cap) = cli.command else {
            panic!("expected capture");
        };
        assert_eq!(cap.seconds, Some(2.5));
        assert_eq!(cap.wav, Some(PathBuf::from("mic.wav")));
        assert_eq!(cap.persona.as_deref(), Some("wizard"));
    }

    #[test]
    fn flags_are_scoped_to_their_command() {
        assert!(parse(&["devices", "--volume", "1"]).is_err());
        assert!(parse(&["play", "--wav", "x.wav"]).is_err());
        assert!(parse(&["capture", "--sample-rate", "16000"]).is_err());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse(&["play", "--volume"]).is_err());
        assert!(parse(&["play", "--sample-rate", "0"]).is_err());
        assert!(parse(&["capture", "--seconds", "-1"]).is_err());
        assert!(parse(&["record"]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn settings_write_and_global_settings_path() {
        let cli = parse(&["--settings", "s.json", "settings", "--write"]).unwrap();
        assert_eq!(cli.command, Command::Settings { write: true });
        assert_eq!(cli.settings_path, Some(PathBuf::from("s.json")));
        assert_eq!(
            parse(&["settings"]).unwrap().command,
            Command::Settings { write: false }
        );
    }
}
