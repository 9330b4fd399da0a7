//! Capture pipeline: microphone → ring buffer → resample → fixed-size frames.
//!
//! ```text
//! InputDevice callback ──push_slice──► SPSC ring ──► capture worker thread
//!                                                     │ RateConverter (device → 16 kHz)
//!                                                     │ Framer (4096-sample frames)
//!                                                     ▼
//!                                                  on_frame(AudioFrame)
//! ```
//!
//! The input stream is opened *on the worker thread* because cpal streams are
//! bound to the thread that created them. `start()` blocks only until the
//! device open has succeeded or failed, then returns.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{create_audio_ring, frame::AudioFrame, AudioProducer, Consumer},
    error::{Result, VidtalkError},
};

/// Samples drained from the ring per worker iteration.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// Capture format sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Frame sample rate in Hz. Default: 16000.
    pub sample_rate: u32,
    /// Samples per delivered frame. Default: 4096 (256 ms at 16 kHz).
    pub frame_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: 4096,
        }
    }
}

/// A platform microphone.
///
/// `open` runs on the capture worker thread and must push mono f32 samples
/// into `producer` from its audio callback until `running` turns false.
pub trait InputDevice: Send + Sync + 'static {
    /// # Errors
    /// `PermissionDenied` or `DeviceUnavailable` when the microphone cannot
    /// be acquired; `AudioStream` for other stream failures.
    fn open(&self, producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Box<dyn InputStream>>;
}

/// Keeps an opened input stream alive; dropping it releases the device.
pub trait InputStream {
    /// Actual rate the device delivers samples at (Hz).
    fn sample_rate(&self) -> u32;
}

/// Slices a continuous sample stream into fixed-length frames.
#[derive(Debug)]
pub struct Framer {
    frame_len: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len),
        }
    }

    /// Append samples and return every frame that is now complete, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_len - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_len {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_len),
                ));
            }
        }
        frames
    }

    /// Samples buffered towards the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Starts capture sessions on one input device.
#[derive(Clone)]
pub struct CapturePipeline {
    device: Arc<dyn InputDevice>,
    config: CaptureConfig,
}

impl CapturePipeline {
    pub fn new(device: Arc<dyn InputDevice>, config: CaptureConfig) -> Self {
        Self { device, config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Acquire the microphone and start delivering frames to `on_frame`.
    ///
    /// `on_frame` runs on the capture worker thread, once per frame, in
    /// capture order. It must not block.
    ///
    /// # Errors
    /// Device acquisition errors are returned as-is; nothing is retried.
    pub fn start<F>(&self, mut on_frame: F) -> Result<CaptureHandle>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        let (producer, mut consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let device = Arc::clone(&self.device);
        let config = self.config.clone();
        let worker_running = Arc::clone(&running);

        let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();

        let worker = std::thread::Builder::new()
            .name("vidtalk-capture".into())
            .spawn(move || {
                // ── Open device (must happen on THIS thread) ─────────────────
                let stream = match device.open(producer, Arc::clone(&worker_running)) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let device_rate = stream.sample_rate();
                let mut resampler = match RateConverter::new(device_rate, config.sample_rate, DRAIN_CHUNK) {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let _ = open_tx.send(Ok(device_rate));

                let mut framer = Framer::new(config.frame_samples);
                let mut raw = vec![0f32; DRAIN_CHUNK];
                let mut delivered = 0u64;

                while worker_running.load(Ordering::Acquire) {
                    let n = consumer.pop_slice(&mut raw);
                    if n == 0 {
                        std::thread::sleep(EMPTY_SLEEP);
                        continue;
                    }

                    let resampled = resampler.process(&raw[..n]);
                    for samples in framer.push(&resampled) {
                        if !worker_running.load(Ordering::Acquire) {
                            break;
                        }
                        on_frame(AudioFrame::mono(samples, config.sample_rate));
                        delivered += 1;
                    }
                }

                debug!(delivered, pending = framer.pending(), "capture worker exiting");
                // Stream drops here, releasing the device on this thread.
                drop(stream);
            })
            .map_err(VidtalkError::Io)?;

        match open_rx.recv() {
            Ok(Ok(device_rate)) => {
                info!(
                    device_rate,
                    frame_rate = self.config.sample_rate,
                    frame_samples = self.config.frame_samples,
                    "capture started"
                );
                Ok(CaptureHandle {
                    running,
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                running.store(false, Ordering::Release);
                let _ = worker.join();
                warn!("capture failed to start: {e}");
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::Release);
                let _ = worker.join();
                Err(VidtalkError::AudioStream("capture worker died before opening the device".into()))
            }
        }
    }
}

/// Handle to a running capture session.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop delivering frames and release the device. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture worker panicked");
            }
            info!("capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
