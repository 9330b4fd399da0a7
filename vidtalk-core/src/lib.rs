//! # vidtalk-core
//!
//! Live spoken conversation about a summarized video.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CpalInput → SPSC RingBuffer → capture worker (resample, frame)
//!                                                   │ PCM16 + base64
//!                                                   ▼
//!                                     DuplexTransport (Gemini Live WebSocket)
//!                                                   │ server audio
//!                                                   ▼
//!                    SessionController → PlaybackScheduler → CpalPlayback
//!                            │
//!                  broadcast::Sender<SessionStatusEvent / PlaybackEvent>
//! ```
//!
//! The audio callbacks only move samples. Encoding, network I/O and
//! scheduling happen on worker threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod events;
pub mod live;
pub mod playback;
pub mod protocol;
pub mod service;

// Convenience re-exports for downstream crates
pub use audio::CpalInput;
pub use capture::{CaptureConfig, CapturePipeline};
pub use codec::EncodedChunk;
pub use error::{Result, VidtalkError};
pub use events::{PlaybackEvent, SessionPhase, SessionStatusEvent};
pub use live::{
    GeminiLiveTransport, LiveBackends, LiveConfig, LiveSession, SessionController, SystemContext,
};
pub use playback::{PlaybackScheduler, ScheduledPlayback};
pub use service::{media::VideoInput, ClientConfig, GenAiClient};

#[cfg(feature = "audio-cpal")]
pub use playback::{CpalPlayback, CpalPlaybackDevice};
