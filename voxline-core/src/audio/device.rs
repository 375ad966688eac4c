//! Audio device enumeration and lookup.

use serde::{Deserialize, Serialize};

/// Which side of the audio graph a device sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
}

/// Order devices default-first, then by case-insensitive name.
pub fn sort_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

#[cfg(feature = "audio-cpal")]
fn collect(direction: DeviceDirection) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let (default_name, devices) = match direction {
        DeviceDirection::Input => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices().map(|it| it.collect::<Vec<_>>()),
        ),
        DeviceDirection::Output => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices().map(|it| it.collect::<Vec<_>>()),
        ),
    };

    match devices {
        Ok(devices) => {
            let mut list = devices
                .into_iter()
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    DeviceInfo {
                        name,
                        direction,
                        is_default,
                    }
                })
                .collect::<Vec<_>>();
            sort_devices(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!(?direction, "failed to enumerate devices: {e}");
            default_name
                .map(|name| {
                    vec![DeviceInfo {
                        name,
                        direction,
                        is_default: true,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

/// Resolve a device by preferred name, falling back to the default device and
/// then to the first device of that direction.
#[cfg(feature = "audio-cpal")]
pub fn resolve_device(
    direction: DeviceDirection,
    preferred_name: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use crate::error::VoxlineError;
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let mut all = match direction {
        DeviceDirection::Input => host.input_devices().map(|it| it.collect::<Vec<_>>()),
        DeviceDirection::Output => host.output_devices().map(|it| it.collect::<Vec<_>>()),
    }
    .map_err(|e| VoxlineError::AudioDevice(e.to_string()))?;

    if let Some(preferred) = preferred_name {
        if let Some(pos) = all
            .iter()
            .position(|d| d.name().map(|n| n == preferred).unwrap_or(false))
        {
            return Ok(all.swap_remove(pos));
        }
        tracing::warn!(?direction, "preferred device '{preferred}' not found, falling back");
    }

    let default = match direction {
        DeviceDirection::Input => host.default_input_device(),
        DeviceDirection::Output => host.default_output_device(),
    };
    if let Some(device) = default {
        return Ok(device);
    }

    if all.is_empty() {
        return Err(match direction {
            DeviceDirection::Input => VoxlineError::NoDefaultInputDevice,
            DeviceDirection::Output => VoxlineError::NoDefaultOutputDevice,
        });
    }
    tracing::warn!(?direction, "no default device, using first available");
    Ok(all.swap_remove(0))
}

/// List all available audio output devices.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    collect(DeviceDirection::Output)
}

/// List all available audio input devices.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    collect(DeviceDirection::Input)
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction: DeviceDirection::Output,
            is_default,
        }
    }

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![info("b speakers", false), info("Z Headphones", true), info("A Dock", false)];
        sort_devices(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Z Headphones", "A Dock", "b speakers"]);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let json = serde_json::to_value(info("Speakers", true)).unwrap();
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["direction"], "output");
    }
}
