//! Persistent CLI settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vidtalk_core::capture::CaptureConfig;
use vidtalk_core::live::{normalize_voice, LiveConfig, DEFAULT_LIVE_MODEL, DEFAULT_VOICE};
use vidtalk_core::service::{
    language::normalize_language_tag, ClientConfig, DEFAULT_BASE_URL, DEFAULT_SUMMARY_MODEL,
    DEFAULT_TTS_MODEL,
};

/// Environment variable that overrides the stored API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub voice: String,
    pub language: String,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub live_model: String,
    pub summary_model: String,
    pub tts_model: String,
    pub request_timeout_secs: u64,
    /// Summary of the most recently summarized video; grounds `live` when no
    /// other context is given.
    pub last_summary: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            voice: DEFAULT_VOICE.into(),
            language: "en".into(),
            preferred_input_device: None,
            preferred_output_device: None,
            live_model: DEFAULT_LIVE_MODEL.into(),
            summary_model: DEFAULT_SUMMARY_MODEL.into(),
            tts_model: DEFAULT_TTS_MODEL.into(),
            request_timeout_secs: 120,
            last_summary: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = AppSettings::default();
        self.api_key = trimmed(self.api_key.take());
        self.voice = normalize_voice(&self.voice);
        self.language = normalize_language_tag(&self.language);
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.preferred_output_device = trimmed(self.preferred_output_device.take());
        self.live_model = normalize_model(&self.live_model, &defaults.live_model);
        self.summary_model = normalize_model(&self.summary_model, &defaults.summary_model);
        self.tts_model = normalize_model(&self.tts_model, &defaults.tts_model);
        self.request_timeout_secs = self.request_timeout_secs.clamp(5, 900);
        self.last_summary = trimmed(self.last_summary.take());
    }

    /// Stored key, unless the environment provides one.
    pub fn resolve_api_key(&self) -> Option<String> {
        trimmed(std::env::var(API_KEY_ENV).ok()).or_else(|| self.api_key.clone())
    }

    pub fn client_config(&self, api_key: String) -> ClientConfig {
        ClientConfig {
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            summary_model: self.summary_model.clone(),
            tts_model: self.tts_model.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            model: self.live_model.clone(),
            capture: CaptureConfig::default(),
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Strip a `models/` prefix and fall back to `default` when empty.
pub fn normalize_model(raw: &str, default: &str) -> String {
    let model = raw.trim().trim_start_matches("models/");
    if model.is_empty() {
        default.into()
    } else {
        model.into()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vidtalk")
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
            .join("vidtalk")
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
