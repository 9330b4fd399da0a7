//! PCM codec and transport-text encoding.
//!
//! ```text
//! AudioFrame (f32) ──float_to_pcm16──► bytes ──bytes_to_transport_text──► base64
//! base64 ──transport_text_to_bytes──► bytes ──pcm16_to_float──► per-channel f32
//! ```
//!
//! Everything here is pure and allocation-only; no I/O.

pub mod pcm;
pub mod transport;

pub use pcm::{float_to_pcm16, pcm16_to_float};
pub use transport::{bytes_to_transport_text, transport_text_to_bytes};

use crate::buffering::frame::AudioFrame;
use crate::error::Result;

/// Sample rate assumed for inbound audio whose mime tag carries no `rate=`.
pub const DEFAULT_INBOUND_SAMPLE_RATE: u32 = 24_000;

/// Transport-ready 16-bit little-endian PCM payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mime/encoding tag, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

impl EncodedChunk {
    /// Encode a captured frame as PCM16.
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            data: float_to_pcm16(&frame.samples),
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            mime_type: Self::pcm_mime(frame.sample_rate),
        }
    }

    /// Rebuild a chunk from an inbound `(mime, base64)` pair.
    ///
    /// # Errors
    /// `MalformedAudio` if the base64 text does not decode.
    pub fn from_transport(mime_type: &str, text: &str) -> Result<Self> {
        Ok(Self {
            data: transport_text_to_bytes(text)?,
            sample_rate: parse_pcm_rate(mime_type).unwrap_or(DEFAULT_INBOUND_SAMPLE_RATE),
            channels: 1,
            mime_type: mime_type.to_string(),
        })
    }

    pub fn pcm_mime(sample_rate: u32) -> String {
        format!("audio/pcm;rate={sample_rate}")
    }

    pub fn to_transport_text(&self) -> String {
        bytes_to_transport_text(&self.data)
    }

    /// Samples per channel carried by this chunk.
    pub fn sample_count(&self) -> usize {
        self.data.len() / (2 * self.channels.max(1) as usize)
    }
}

/// Extract the `rate=` parameter from a mime tag such as `audio/pcm;rate=24000`.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}
