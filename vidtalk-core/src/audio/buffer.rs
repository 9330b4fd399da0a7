//! Decode adapter: raw inbound PCM bytes → playable `PlaybackUnit`.

use crate::codec::pcm16_to_float;
use crate::error::{Result, VidtalkError};

/// Planar f32 audio buffer: one `Vec` per channel, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Average all channels into one mono sequence.
    pub fn mixdown(&self) -> Vec<f32> {
        match self.channels.as_slice() {
            [] => Vec::new(),
            [only] => only.clone(),
            many => {
                let scale = 1.0 / many.len() as f32;
                (0..self.frame_count())
                    .map(|i| many.iter().map(|ch| ch[i]).sum::<f32>() * scale)
                    .collect()
            }
        }
    }
}

/// A decoded inbound chunk awaiting playback. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUnit {
    buffer: AudioBuffer,
    duration: f64,
}

impl PlaybackUnit {
    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    /// Playback length in seconds (always > 0).
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn into_buffer(self) -> AudioBuffer {
        self.buffer
    }
}

/// Interpret `bytes` as interleaved 16-bit PCM and build a playback unit.
///
/// # Errors
/// `Decode` if the payload holds no whole frame, is not a multiple of the
/// frame stride, or declares zero channels / zero sample rate.
pub fn decode(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PlaybackUnit> {
    if sample_rate == 0 {
        return Err(VidtalkError::Decode("sample rate is zero".into()));
    }
    let channels = pcm16_to_float(bytes, channels).map_err(|e| match e {
        VidtalkError::MalformedAudio(msg) => VidtalkError::Decode(msg),
        other => other,
    })?;

    let frame_count = channels.first().map_or(0, Vec::len);
    if frame_count == 0 {
        return Err(VidtalkError::Decode("payload contains no audio frames".into()));
    }

    Ok(PlaybackUnit {
        duration: frame_count as f64 / sample_rate as f64,
        buffer: AudioBuffer {
            channels,
            sample_rate,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::float_to_pcm16;

    #[test]
    fn decodes_mono_duration() {
        let bytes = float_to_pcm16(&vec![0.1; 12_000]);
        let unit = decode(&bytes, 24_000, 1).unwrap();
        assert_eq!(unit.buffer().frame_count(), 12_000);
        assert_eq!(unit.buffer().channel_count(), 1);
        assert!((unit.duration() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn decodes_stereo_into_equal_channels() {
        let bytes = float_to_pcm16(&[0.5, -0.5, 0.5, -0.5, 0.5, -0.5]);
        let unit = decode(&bytes, 48_000, 2).unwrap();
        let buffer = unit.buffer();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 3);
        assert_eq!(buffer.channel(0).unwrap().len(), buffer.channel(1).unwrap().len());
        assert!(buffer.mixdown().iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn empty_payload_is_a_decode_error() {
        assert!(matches!(decode(&[], 24_000, 1), Err(VidtalkError::Decode(_))));
    }

    #[test]
    fn ragged_payload_is_a_decode_error() {
        assert!(matches!(decode(&[1, 2, 3], 24_000, 1), Err(VidtalkError::Decode(_))));
        assert!(matches!(decode(&[0; 6], 24_000, 2), Err(VidtalkError::Decode(_))));
    }

    #[test]
    fn zero_rate_or_channels_rejected() {
        assert!(matches!(decode(&[0; 4], 0, 1), Err(VidtalkError::Decode(_))));
        assert!(matches!(decode(&[0; 4], 24_000, 0), Err(VidtalkError::Decode(_))));
    }
}
