//! Platform audio via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal callbacks run on an OS audio thread at elevated priority. The
//! input callback therefore only downmixes into a reusable scratch buffer and
//! pushes into an SPSC ring producer (`push_slice` is lock-free).
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Streams built here are created and dropped on the same thread: the
//! capture worker for input, the session thread for output.

pub mod buffer;
pub mod device;
pub mod resample;

use std::sync::{atomic::AtomicBool, Arc};

use crate::{
    buffering::AudioProducer,
    capture::{InputDevice, InputStream},
    error::{Result, VidtalkError},
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::Ordering;
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Classify a backend error message. cpal has no dedicated permission
/// variant, so platform wording is inspected.
pub(crate) fn classify_device_error(message: String) -> VidtalkError {
    let lowered = message.to_ascii_lowercase();
    if ["permission", "denied", "not authorized", "unauthorized", "access is denied"]
        .iter()
        .any(|k| lowered.contains(k))
    {
        VidtalkError::PermissionDenied(message)
    } else {
        VidtalkError::DeviceUnavailable(message)
    }
}

/// The system microphone, selected by preferred name or host default.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    preferred_device: Option<String>,
}

impl CpalInput {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

/// An open cpal input stream. Dropping it releases the microphone.
#[cfg(feature = "audio-cpal")]
pub struct CpalInputStream {
    _stream: Stream,
    sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl InputStream for CpalInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(feature = "audio-cpal")]
impl InputDevice for CpalInput {
    fn open(&self, producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Box<dyn InputStream>> {
        use device::{select_device, DeviceDirection};

        let host = cpal::default_host();
        let device = select_device(&host, DeviceDirection::Input, self.preferred_device.as_deref())
            .ok_or_else(|| VidtalkError::DeviceUnavailable("no input device found".into()))?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device.default_input_config().map_err(|e| match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                VidtalkError::DeviceUnavailable(e.to_string())
            }
            other => classify_device_error(other.to_string()),
        })?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, format = ?supported.sample_format(), "input config selected");

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_input::<f32>(&device, &config, producer, running),
            SampleFormat::I16 => build_mono_input::<i16>(&device, &config, producer, running),
            SampleFormat::U16 => build_mono_input::<u16>(&device, &config, producer, running),
            SampleFormat::U8 => build_mono_input::<u8>(&device, &config, producer, running),
            fmt => {
                return Err(VidtalkError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                VidtalkError::DeviceUnavailable(e.to_string())
            }
            cpal::BuildStreamError::BackendSpecific { err } => classify_device_error(err.description),
            other => VidtalkError::AudioStream(other.to_string()),
        })?;

        stream.play().map_err(|e| match e {
            cpal::PlayStreamError::DeviceNotAvailable => {
                VidtalkError::DeviceUnavailable(e.to_string())
            }
            other => classify_device_error(other.to_string()),
        })?;

        Ok(Box::new(CpalInputStream {
            _stream: stream,
            sample_rate,
        }))
    }
}

/// Build an input stream that downmixes every callback to mono f32.
#[cfg(feature = "audio-cpal")]
fn build_mono_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    use crate::buffering::Producer;

    let ch = config.channels.max(1) as usize;
    let mut mix_buf: Vec<f32> = Vec::new();

    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let frames = data.len() / ch;
            mix_buf.resize(frames, 0.0);
            for (f, out) in mix_buf.iter_mut().enumerate() {
                let base = f * ch;
                let sum: f32 = data[base..base + ch]
                    .iter()
                    .map(|s| f32::from_sample(*s))
                    .sum();
                *out = sum / ch as f32;
            }
            let written = producer.push_slice(&mix_buf);
            if written < mix_buf.len() {
                warn!("capture ring full: dropped {} frames", mix_buf.len() - written);
            }
        },
        |err| error!("input stream error: {err}"),
        None,
    )
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl InputDevice for CpalInput {
    fn open(&self, _producer: AudioProducer, _running: Arc<AtomicBool>) -> Result<Box<dyn InputStream>> {
        Err(VidtalkError::DeviceUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
