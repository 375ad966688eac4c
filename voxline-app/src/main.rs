//! `voxline`: command-line host for the voxline voice client engine.
//!
//! Host events and transport messages are written to stdout as NDJSON;
//! logs go to stderr (`RUST_LOG` overrides the default `voxline=info`).

mod cli;
mod emit;
mod player;
mod recorder;
mod settings;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use settings::{default_settings_path, load_settings, save_settings};
use tracing::info;
use voxline_core::audio::device::{list_input_devices, list_output_devices};

#[tokio::main]
async fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxline=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("voxline: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli.settings_path.unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);

    match cli.command {
        Command::Play(args) => {
            info!(settings = %settings_path.display(), "voxline play");
            player::run(args, &settings).await?;
        }
        Command::Capture(args) => {
            info!(settings = %settings_path.display(), "voxline capture");
            recorder::run(args, &settings).await?;
        }
        Command::Devices => {
            emit::emit_line(&serde_json::json!({
                "outputs": list_output_devices(),
                "inputs": list_input_devices(),
            }))?;
        }
        Command::Settings { write } => {
            if write {
                save_settings(&settings_path, &settings).with_context(|| {
                    format!("failed to write settings to {}", settings_path.display())
                })?;
                info!(path = %settings_path.display(), "settings saved");
            }
            emit::emit_line(&settings)?;
        }
    }
    Ok(())
}
