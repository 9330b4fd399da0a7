//! WAV export of synthesized speech.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use vidtalk_core::audio::buffer::AudioBuffer;

/// Write `buffer` as 16-bit PCM, interleaving its channels.
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> Result<()> {
    let channels = buffer.channel_count().max(1);
    let spec = WavSpec {
        channels: channels as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut writer: WavWriter<BufWriter<File>> =
        WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;

    for frame in 0..buffer.frame_count() {
        for ch in 0..channels {
            let sample = buffer
                .channel(ch)
                .and_then(|c| c.get(frame))
                .copied()
                .unwrap_or(0.0);
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(value)?;
        }
    }

    writer.finalize().context("finalizing WAV file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidtalk_core::audio::buffer::decode;
    use vidtalk_core::codec::float_to_pcm16;

    #[test]
    fn writes_readable_wav() {
        let samples: Vec<f32> = (0..2400).map(|i| ((i as f32) / 2400.0) - 0.5).collect();
        let unit = decode(&float_to_pcm16(&samples), 24_000, 1).unwrap();

        let path = std::env::temp_dir().join(format!("vidtalk-wav-{}.wav", std::process::id()));
        write_wav(&path, unit.buffer()).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        let _ = std::fs::remove_file(&path);

        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(read.len(), 2400);
        assert!(read[0] < 0 && read[2399] > 0);
    }
}
