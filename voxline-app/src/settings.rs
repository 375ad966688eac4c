//! Persistent client settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Personas the assistant backend understands.
pub const PERSONAS: &[&str] = &[
    "default",
    "pirate",
    "scientist",
    "wizard",
    "robot",
    "chef",
    "detective",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_output_device: Option<String>,
    pub preferred_input_device: Option<String>,
    pub volume: f32,
    pub playback_sample_rate: u32,
    pub capture_sample_rate: u32,
    pub capture_frame_samples: usize,
    pub persona: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_output_device: None,
            preferred_input_device: None,
            volume: 1.0,
            playback_sample_rate: 44_100,
            capture_sample_rate: 16_000,
            capture_frame_samples: 4096,
            persona: "default".into(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.playback_sample_rate = self.playback_sample_rate.clamp(8_000, 192_000);
        self.capture_sample_rate = self.capture_sample_rate.clamp(8_000, 48_000);
        self.capture_frame_samples = self.capture_frame_samples.clamp(256, 16_384);
        self.persona = normalize_persona(&self.persona);
        self.preferred_output_device = normalize_device_name(self.preferred_output_device.as_deref());
        self.preferred_input_device = normalize_device_name(self.preferred_input_device.as_deref());
    }
}

/// Unknown personas fall back to `default`, matching the backend.
pub fn normalize_persona(raw: &str) -> String {
    let persona = raw.trim().to_ascii_lowercase();
    if PERSONAS.contains(&persona.as_str()) {
        persona
    } else {
        "default".into()
    }
}

fn normalize_device_name(raw: Option<&str>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Voxline")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voxline")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
