//! f32 <-> signed 16-bit little-endian PCM.

use crate::error::{Result, VidtalkError};

/// Convert f32 samples to 16-bit little-endian PCM.
///
/// Samples are clamped to [-1, 1]; negative values scale by 32768 and
/// non-negative values by 32767 so both rails map exactly onto `i16`.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
        out.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    out
}

/// Convert interleaved 16-bit little-endian PCM to one f32 sequence per channel.
///
/// # Errors
/// `MalformedAudio` if `channels` is zero or `bytes.len()` is not a
/// multiple of `2 * channels`.
pub fn pcm16_to_float(bytes: &[u8], channels: u16) -> Result<Vec<Vec<f32>>> {
    if channels == 0 {
        return Err(VidtalkError::MalformedAudio("channel count is zero".into()));
    }
    let ch = channels as usize;
    let stride = 2 * ch;
    if bytes.len() % stride != 0 {
        return Err(VidtalkError::MalformedAudio(format!(
            "{} bytes is not a multiple of the {}-byte frame stride",
            bytes.len(),
            stride
        )));
    }

    let frames = bytes.len() / stride;
    let mut out = vec![Vec::with_capacity(frames); ch];
    for frame in bytes.chunks_exact(stride) {
        for (c, pair) in frame.chunks_exact(2).enumerate() {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            out[c].push(sample as f32 / 32768.0);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rails_map_to_i16_extremes() {
        let bytes = float_to_pcm16(&[1.0, -1.0, 0.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn out_of_range_is_clamped_not_rejected() {
        assert_eq!(float_to_pcm16(&[3.5]), float_to_pcm16(&[1.0]));
        assert_eq!(float_to_pcm16(&[-7.0]), float_to_pcm16(&[-1.0]));
        assert_eq!(float_to_pcm16(&[f32::NAN]), vec![0, 0]);
    }

    #[test]
    fn truncates_toward_zero() {
        // 0.5 * 32767 = 16383.5 -> 16383
        let bytes = float_to_pcm16(&[0.5, -0.5]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 16_383);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -16_384);
    }

    // Positive samples scale by 32767 but decode by 32768, so the error
    // there can reach two LSBs; negative samples stay within one.
    #[test]
    fn round_trip_within_quantisation_error() {
        let samples: Vec<f32> = (0..2001).map(|i| (i as f32 / 1000.0) - 1.0).collect();
        let decoded = pcm16_to_float(&float_to_pcm16(&samples), 1).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].len(), samples.len());
        for (orig, back) in samples.iter().zip(&decoded[0]) {
            let bound = if *orig < 0.0 { 1.0 } else { 2.0 } / 32768.0;
            assert!(
                (orig - back).abs() <= bound + f32::EPSILON,
                "{orig} decoded as {back}"
            );
        }
    }

    #[test]
    fn deinterleaves_stereo() {
        let bytes = float_to_pcm16(&[0.5, -0.5, 0.25, -0.25]);
        let channels = pcm16_to_float(&bytes, 2).unwrap();
        assert_eq!(channels.len(), 2);
        assert!(channels[0].iter().all(|s| *s > 0.0));
        assert!(channels[1].iter().all(|s| *s < 0.0));
        assert_eq!(channels[0].len(), 2);
    }

    #[test]
    fn rejects_partial_frames() {
        assert!(matches!(
            pcm16_to_float(&[0, 0, 0], 1),
            Err(VidtalkError::MalformedAudio(_))
        ));
        assert!(matches!(
            pcm16_to_float(&[0, 0, 0, 0, 0, 0], 2),
            Err(VidtalkError::MalformedAudio(_))
        ));
        assert!(matches!(
            pcm16_to_float(&[0, 0], 0),
            Err(VidtalkError::MalformedAudio(_))
        ));
    }
}
