//! Live audio conversation with a remote model.
//!
//! [`LiveSession`] is the entry point: it runs a [`SessionController`] on a
//! dedicated thread, wiring the microphone to a [`DuplexTransport`] and
//! inbound audio to gapless playback. The controller can also be driven
//! directly when the caller owns the thread.

pub mod controller;
pub mod gemini;
pub mod session;
pub mod transport;

pub use controller::{SessionController, SessionObservers, SessionState};
pub use gemini::{GeminiLiveConfig, GeminiLiveTransport, LIVE_ENDPOINT};
pub use session::LiveSession;
pub use transport::{AudioSender, DuplexTransport, LiveConnection, LiveSetup, OutboundMessage, TransportEvent};

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::Serialize;

use crate::{
    capture::{CaptureConfig, InputDevice},
    playback::PlaybackDevice,
    service::language::{language_directive, normalize_language_tag},
};

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

pub const DEFAULT_VOICE: &str = "Puck";

/// Prebuilt voices accepted by the live and TTS models.
pub const PREBUILT_VOICES: &[&str] = &[
    "Puck", "Charon", "Kore", "Fenrir", "Aoede", "Leda", "Orus", "Zephyr",
];

/// Match a voice name case-insensitively, falling back to [`DEFAULT_VOICE`].
pub fn normalize_voice(raw: &str) -> String {
    let trimmed = raw.trim();
    PREBUILT_VOICES
        .iter()
        .find(|v| v.eq_ignore_ascii_case(trimmed))
        .unwrap_or(&DEFAULT_VOICE)
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    pub model: String,
    pub capture: CaptureConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            capture: CaptureConfig::default(),
        }
    }
}

/// Grounding for one conversation: the video summary, the reply voice and
/// the reply language. Fixed when the session opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemContext {
    pub text: String,
    pub voice: String,
    pub language: String,
}

impl SystemContext {
    pub fn new(text: impl Into<String>, voice: &str, language: &str) -> Self {
        Self {
            text: text.into(),
            voice: normalize_voice(voice),
            language: normalize_language_tag(language),
        }
    }

    /// System instruction sent with the live setup.
    pub fn system_instruction(&self) -> String {
        format!(
            "You are having a spoken conversation with a user about a video they shared. \
             Answer from the video summary below, keep replies short and conversational, \
             and say so when the summary does not cover a question.\n\n\
             Video summary:\n{}\n\n{}",
            self.text.trim(),
            language_directive(&self.language)
        )
    }
}

/// External collaborators for one session.
pub struct LiveBackends {
    pub transport: Box<dyn DuplexTransport>,
    pub input: Arc<dyn InputDevice>,
    pub playback: Box<dyn PlaybackDevice>,
}

/// Counters updated from the capture worker and the session thread.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_captured: AtomicU64,
    pub frames_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub units_scheduled: AtomicU64,
    pub units_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub messages_received: u64,
    pub units_scheduled: u64,
    pub units_dropped: u64,
}

impl SessionDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            units_scheduled: self.units_scheduled.load(Ordering::Relaxed),
            units_dropped: self.units_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_matching_is_case_insensitive() {
        assert_eq!(normalize_voice(" kore "), "Kore");
        assert_eq!(normalize_voice("nobody"), DEFAULT_VOICE);
    }

    #[test]
    fn context_normalizes_voice_and_language() {
        let ctx = SystemContext::new("summary", "AOEDE", "fr-CA");
        assert_eq!(ctx.voice, "Aoede");
        assert_eq!(ctx.language, "fr");
        let instruction = ctx.system_instruction();
        assert!(instruction.contains("Video summary:\nsummary"));
        assert!(instruction.ends_with("Respond only in French."));
    }

    #[test]
    fn diagnostics_snapshot_reads_counters() {
        let diag = SessionDiagnostics::default();
        diag.frames_sent.fetch_add(3, Ordering::Relaxed);
        diag.units_dropped.fetch_add(1, Ordering::Relaxed);
        let snap = diag.snapshot();
        assert_eq!(snap.frames_sent, 3);
        assert_eq!(snap.units_dropped, 1);
        assert_eq!(snap.messages_received, 0);
    }
}
