//! Sample-accurate output timeline on a cpal stream.
//!
//! The output clock is the number of frames the device callback has rendered,
//! divided by the device rate. `start_at` converts a unit to the device rate
//! and queues it at an absolute start frame; the callback renders queued audio
//! where it overlaps the current block and silence everywhere else.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    audio::{buffer::PlaybackUnit, resample::convert_all},
    error::{Result, VidtalkError},
};

#[cfg(feature = "audio-cpal")]
use super::{PlaybackDevice, PlaybackOutput};
#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info};

/// Mono audio pinned to an absolute frame on the output clock.
#[derive(Debug)]
struct QueuedAudio {
    start_frame: u64,
    samples: Vec<f32>,
    started: bool,
}

impl QueuedAudio {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Queue of scheduled audio, ordered by start frame.
#[derive(Debug, Default)]
pub(crate) struct Timeline {
    queue: VecDeque<QueuedAudio>,
}

impl Timeline {
    fn insert(&mut self, start_frame: u64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let idx = self.queue.partition_point(|q| q.start_frame <= start_frame);
        self.queue.insert(
            idx,
            QueuedAudio {
                start_frame,
                samples,
                started: false,
            },
        );
    }

    /// Fill `out` with the mono signal for frames `first_frame..first_frame + out.len()`.
    ///
    /// A unit whose start frame has already passed when it reaches the front
    /// is rebased to the current frame, so it always plays from its first
    /// sample.
    pub(crate) fn render(&mut self, first_frame: u64, out: &mut [f32]) {
        for (i, slot) in out.iter_mut().enumerate() {
            let frame = first_frame + i as u64;
            while self
                .queue
                .front()
                .is_some_and(|q| q.started && q.end_frame() <= frame)
            {
                self.queue.pop_front();
            }
            *slot = match self.queue.front_mut() {
                Some(q) if q.start_frame <= frame => {
                    if !q.started {
                        q.start_frame = frame;
                        q.started = true;
                    }
                    q.samples[(frame - q.start_frame) as usize]
                }
                _ => 0.0,
            };
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// State shared between the scheduling side and the device callback.
#[derive(Debug, Default)]
pub(crate) struct OutputShared {
    frames_rendered: AtomicU64,
    timeline: Mutex<Timeline>,
    closed: AtomicBool,
}

impl OutputShared {
    /// Device-callback side: render one block and advance the clock.
    ///
    /// The clock always advances; if the scheduling side holds the lock the
    /// block is rendered as silence instead of waiting.
    pub(crate) fn render_block(&self, out: &mut [f32]) {
        let first = self.frames_rendered.load(Ordering::Acquire);
        match self.timeline.try_lock() {
            Some(mut timeline) if !self.closed.load(Ordering::Acquire) => {
                timeline.render(first, out)
            }
            _ => out.fill(0.0),
        }
        self.frames_rendered
            .fetch_add(out.len() as u64, Ordering::AcqRel);
    }

    pub(crate) fn clock_secs(&self, sample_rate: u32) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / sample_rate as f64
    }

    pub(crate) fn enqueue(&self, unit: &PlaybackUnit, at: f64, sample_rate: u32) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VidtalkError::AudioStream("playback output is closed".into()));
        }
        let buffer = unit.buffer();
        let samples = convert_all(&buffer.mixdown(), buffer.sample_rate(), sample_rate)?;
        let requested = (at.max(0.0) * sample_rate as f64).round() as u64;

        // Frames already rendered cannot be played; late audio starts at the next one.
        let mut timeline = self.timeline.lock();
        let start_frame = requested.max(self.frames_rendered.load(Ordering::Acquire));
        timeline.insert(start_frame, samples);
        Ok(())
    }

    pub(crate) fn shut(&self) {
        self.closed.store(true, Ordering::Release);
        self.timeline.lock().clear();
    }

    pub(crate) fn queued(&self) -> usize {
        self.timeline.lock().len()
    }
}

/// The system speaker as a [`PlaybackOutput`].
///
/// **Not `Send`**: holds a `cpal::Stream`.
#[cfg(feature = "audio-cpal")]
pub struct CpalPlayback {
    stream: Option<Stream>,
    shared: Arc<OutputShared>,
    sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl CpalPlayback {
    /// Open the preferred (or default) output device and start rendering
    /// silence so the clock runs from zero.
    pub fn open(preferred_device: Option<&str>) -> Result<Self> {
        use crate::audio::{
            classify_device_error,
            device::{select_device, DeviceDirection},
        };

        let host = cpal::default_host();
        let device = select_device(&host, DeviceDirection::Output, preferred_device)
            .ok_or_else(|| VidtalkError::DeviceUnavailable("no output device found".into()))?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let supported = device
            .default_output_config()
            .map_err(|e| classify_device_error(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(sample_rate, channels = config.channels, "output config selected");

        let shared = Arc::new(OutputShared::default());
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_output::<f32>(&device, &config, Arc::clone(&shared)),
            SampleFormat::I16 => build_output::<i16>(&device, &config, Arc::clone(&shared)),
            SampleFormat::U16 => build_output::<u16>(&device, &config, Arc::clone(&shared)),
            fmt => {
                return Err(VidtalkError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                VidtalkError::DeviceUnavailable(e.to_string())
            }
            other => VidtalkError::AudioStream(other.to_string()),
        })?;

        stream
            .play()
            .map_err(|e| VidtalkError::AudioStream(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            shared,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Units queued but not yet fully rendered.
    pub fn queued_units(&self) -> usize {
        self.shared.queued()
    }
}

#[cfg(feature = "audio-cpal")]
impl PlaybackOutput for CpalPlayback {
    fn current_time(&self) -> f64 {
        self.shared.clock_secs(self.sample_rate)
    }

    fn start_at(&mut self, unit: PlaybackUnit, at: f64) -> Result<()> {
        self.shared.enqueue(&unit, at, self.sample_rate)
    }

    fn close(&mut self) {
        self.shared.shut();
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            info!("output device released");
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "audio-cpal")]
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<OutputShared>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let ch = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _info| {
            let frames = data.len() / ch;
            mono.resize(frames, 0.0);
            shared.render_block(&mut mono);
            for (frame, sample) in data.chunks_mut(ch).zip(&mono) {
                let value = T::from_sample(*sample);
                frame.fill(value);
            }
        },
        |err| error!("output stream error: {err}"),
        None,
    )
}

/// Opens [`CpalPlayback`] on the session thread.
#[cfg(feature = "audio-cpal")]
#[derive(Debug, Clone, Default)]
pub struct CpalPlaybackDevice {
    preferred_device: Option<String>,
}

#[cfg(feature = "audio-cpal")]
impl CpalPlaybackDevice {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

#[cfg(feature = "audio-cpal")]
impl PlaybackDevice for CpalPlaybackDevice {
    fn open(&self) -> Result<Box<dyn PlaybackOutput>> {
        Ok(Box::new(CpalPlayback::open(self.preferred_device.as_deref())?))
    }
}
