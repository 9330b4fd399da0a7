use thiserror::Error;

/// All errors produced by vidtalk-core.
#[derive(Debug, Error)]
pub enum VidtalkError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("live connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed audio payload: {0}")]
    MalformedAudio(String),

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("speech synthesis returned no audio: {0}")]
    Synthesis(String),

    #[error("invalid media: {0}")]
    InvalidMedia(String),

    #[error("operation not valid in session phase {0}")]
    InvalidState(&'static str),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VidtalkError {
    /// Whether this error ends a live session (as opposed to dropping one message).
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            VidtalkError::MalformedAudio(_) | VidtalkError::Decode(_) | VidtalkError::Synthesis(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VidtalkError>;
