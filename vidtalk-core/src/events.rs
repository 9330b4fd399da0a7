//! Events broadcast to callers of a live session.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON (the CLI prints them with `--json-events`).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Lifecycle phase of one live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Constructed, `open()` not yet called.
    Idle,
    /// Duplex connection requested, waiting for the remote to accept setup.
    Connecting,
    /// Connected; microphone streaming and playback active.
    Open,
    /// Teardown in progress.
    Closing,
    /// Terminal. A new session is needed to talk again.
    Closed,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Open => "open",
            SessionPhase::Closing => "closing",
            SessionPhase::Closed => "closed",
        }
    }
}

/// Emitted whenever the session phase changes.
///
/// The transition into `Closed` is the terminal event; `error` is set when
/// the session ended because of a fatal failure rather than `close()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub phase: SessionPhase,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// Emitted for every inbound audio unit placed on the output timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackEvent {
    /// Monotonically increasing per session.
    pub seq: u64,
    /// Scheduled start on the output clock (seconds).
    pub start_time: f64,
    pub duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_lowercase_phase() {
        let event = SessionStatusEvent {
            phase: SessionPhase::Connecting,
            error: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["phase"], "connecting");
        assert!(json["error"].is_null());

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.phase, SessionPhase::Connecting);
    }

    #[test]
    fn terminal_event_carries_error() {
        let event = SessionStatusEvent {
            phase: SessionPhase::Closed,
            error: Some("live connection error: reset".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["phase"], "closed");
        assert_eq!(json["error"], "live connection error: reset");
    }

    #[test]
    fn playback_event_uses_camel_case() {
        let event = PlaybackEvent {
            seq: 2,
            start_time: 2.3,
            duration: 0.2,
        };
        let json = serde_json::to_value(&event).expect("serialize playback event");
        assert_eq!(json["seq"], 2);
        assert!((json["startTime"].as_f64().unwrap() - 2.3).abs() < 1e-12);
        assert!((json["duration"].as_f64().unwrap() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn phase_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<SessionPhase>(r#""Open""#).is_err());
        assert_eq!(SessionPhase::Open.as_str(), "open");
    }
}
