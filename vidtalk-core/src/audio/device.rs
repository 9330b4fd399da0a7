//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Which side of the conversation a device serves.
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
    /// Input devices only: likely captures system output rather than a voice.
    pub is_loopback_like: bool,
    /// Best guess for the device to use.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "speakers (",
    "headphones (",
];

const MIC_POSITIVE_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "input",
    "line in",
    "usb",
    "webcam",
];

/// Heuristic for capture devices that record system output. A live
/// conversation fed from one of these hears the model talking to itself.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score a device name for likely voice-microphone intent. Higher is better.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_POSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if lowered.contains("default") {
        score += 1;
    }
    score
}

/// Mark the best entry as recommended and sort recommended/default first.
fn rank(list: &mut Vec<DeviceInfo>) {
    if let Some((idx, _)) = list.iter().enumerate().max_by_key(|(_, d)| {
        let base = match d.direction {
            DeviceDirection::Input => mic_preference_score(&d.name),
            DeviceDirection::Output => 0,
        };
        base + if d.is_default { 2 } else { 0 }
    }) {
        list[idx].is_recommended = true;
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
}

#[cfg(feature = "audio-cpal")]
fn describe<I>(devices: I, direction: DeviceDirection, default_name: Option<String>) -> Vec<DeviceInfo>
where
    I: Iterator<Item = cpal::Device>,
{
    use cpal::traits::DeviceTrait;

    let mut list = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: direction == DeviceDirection::Input
                    && is_loopback_like_name(&name),
                is_recommended: false,
                direction,
                name,
            }
        })
        .collect::<Vec<_>>();
    rank(&mut list);
    list
}

/// List microphones. Returns an empty `Vec` when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    match host.input_devices() {
        Ok(devices) => describe(devices, DeviceDirection::Input, default_name),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

/// List speakers. Returns an empty `Vec` when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    match host.output_devices() {
        Ok(devices) => describe(devices, DeviceDirection::Output, default_name),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    }
}

/// Resolve a device by preferred name, falling back to the host default and
/// then to the first device listed.
#[cfg(feature = "audio-cpal")]
pub fn select_device(
    host: &cpal::Host,
    direction: DeviceDirection,
    preferred_name: Option<&str>,
) -> Option<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let list = || match direction {
        DeviceDirection::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
        DeviceDirection::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
    };

    if let Some(preferred) = preferred_name {
        match list() {
            Ok(devices) => {
                let found = devices
                    .into_iter()
                    .find(|d| d.name().map(|n| n == preferred).unwrap_or(false));
                if found.is_some() {
                    return found;
                }
                tracing::warn!(device = preferred, ?direction, "preferred device not found, falling back");
            }
            Err(e) => tracing::warn!("failed to list devices while resolving preference: {e}"),
        }
    }

    let default = match direction {
        DeviceDirection::Input => host.default_input_device(),
        DeviceDirection::Output => host.default_output_device(),
    };
    default.or_else(|| {
        let first = list().ok()?.into_iter().next();
        if first.is_some() {
            tracing::warn!(?direction, "no default device, using first available");
        }
        first
    })
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
