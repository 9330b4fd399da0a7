//! Gapless playback scheduling.
//!
//! ## Algorithm
//!
//! The scheduler keeps one cursor, `next_start_time`, on the output clock.
//! For each unit, in arrival order:
//!
//! 1. `start = max(output.current_time(), next_start_time)`. If processing
//!    lagged and the cursor is already in the past, play now instead of
//!    queueing a burst.
//! 2. Schedule the unit at `start`.
//! 3. `next_start_time = start + unit.duration()`.
//!
//! Consecutive units therefore never overlap; silence appears only when the
//! network is slower than real time.

pub mod output;

#[cfg(feature = "audio-cpal")]
pub use output::{CpalPlayback, CpalPlaybackDevice};

use tracing::{debug, warn};

use crate::{
    audio::buffer::{decode, PlaybackUnit},
    codec::EncodedChunk,
    error::Result,
};

/// A playback-side audio context with a sample-accurate clock.
///
/// Not required to be `Send`: platform output streams are usually bound to
/// the thread that opened them.
pub trait PlaybackOutput {
    /// Current output clock position in seconds.
    fn current_time(&self) -> f64;

    /// Queue `unit` to begin exactly at `at` seconds on the output clock.
    fn start_at(&mut self, unit: PlaybackUnit, at: f64) -> Result<()>;

    /// Stop rendering and release the device. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Opens playback contexts. Held by the session and invoked on its thread.
pub trait PlaybackDevice: Send + 'static {
    /// # Errors
    /// `DeviceUnavailable` when no output device can be opened.
    fn open(&self) -> Result<Box<dyn PlaybackOutput>>;
}

/// Where a unit landed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledPlayback {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Back-to-back scheduler for units arriving at irregular intervals.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start_time: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest time the next unit may start without overlapping.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Schedule a decoded unit right after everything scheduled before it.
    ///
    /// # Errors
    /// Propagates output errors; the cursor is left untouched in that case.
    pub fn schedule(
        &mut self,
        output: &mut dyn PlaybackOutput,
        unit: PlaybackUnit,
    ) -> Result<ScheduledPlayback> {
        let now = output.current_time();
        let start_time = now.max(self.next_start_time);
        let duration = unit.duration();

        if now > self.next_start_time && self.next_start_time > 0.0 {
            debug!(
                late_by = now - self.next_start_time,
                "playback cursor behind output clock, starting immediately"
            );
        }

        output.start_at(unit, start_time)?;
        self.next_start_time = start_time + duration;

        Ok(ScheduledPlayback {
            start_time,
            duration,
        })
    }

    /// Decode an inbound PCM chunk and schedule it.
    ///
    /// # Errors
    /// `Decode` for an undecodable payload; the unit is dropped and the
    /// cursor keeps its last valid value.
    pub fn schedule_chunk(
        &mut self,
        output: &mut dyn PlaybackOutput,
        chunk: &EncodedChunk,
    ) -> Result<ScheduledPlayback> {
        let unit = decode(&chunk.data, chunk.sample_rate, chunk.channels).map_err(|e| {
            warn!(bytes = chunk.data.len(), mime = %chunk.mime_type, "dropping undecodable audio: {e}");
            e
        })?;
        self.schedule(output, unit)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A manually clocked output used by scheduler and session tests.

    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    pub struct ManualClockState {
        pub now: f64,
        pub started: Vec<(f64, f64)>,
        pub closed: usize,
    }

    /// Output whose clock only moves when the test says so.
    #[derive(Clone, Default)]
    pub struct ManualOutput {
        pub state: Arc<Mutex<ManualClockState>>,
    }

    impl ManualOutput {
        pub fn advance_to(&self, t: f64) {
            self.state.lock().now = t;
        }

        pub fn starts(&self) -> Vec<f64> {
            self.state.lock().started.iter().map(|(s, _)| *s).collect()
        }
    }

    impl PlaybackOutput for ManualOutput {
        fn current_time(&self) -> f64 {
            self.state.lock().now
        }

        fn start_at(&mut self, unit: PlaybackUnit, at: f64) -> Result<()> {
            self.state.lock().started.push((at, unit.duration()));
            Ok(())
        }

        fn close(&mut self) {
            self.state.lock().closed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::testing::ManualOutput;
    use super::*;
    use crate::codec::float_to_pcm16;
    use crate::error::VidtalkError;

    fn chunk(seconds: f64) -> EncodedChunk {
        let samples = vec![0.1f32; (seconds * 24_000.0).round() as usize];
        EncodedChunk {
            data: float_to_pcm16(&samples),
            sample_rate: 24_000,
            channels: 1,
            mime_type: EncodedChunk::pcm_mime(24_000),
        }
    }

    #[test]
    fn consecutive_units_never_overlap() {
        let mut output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new();
        let durations = [0.25, 0.1, 0.5, 0.04, 0.3, 0.2];
        let clock = [0.0, 0.05, 0.1, 0.6, 0.61, 2.0];

        let mut scheduled = Vec::new();
        for (d, t) in durations.iter().zip(clock) {
            output.advance_to(t);
            scheduled.push(scheduler.schedule_chunk(&mut output, &chunk(*d)).unwrap());
        }

        for pair in scheduled.windows(2) {
            assert!(
                pair[1].start_time >= pair[0].end_time() - 1e-9,
                "{:?} overlaps {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn catches_up_to_clock_after_late_arrival() {
        let mut output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.schedule_chunk(&mut output, &chunk(0.5)).unwrap();
        assert_relative_eq!(scheduler.next_start_time(), 0.5);

        output.advance_to(3.25);
        let late = scheduler.schedule_chunk(&mut output, &chunk(0.5)).unwrap();
        assert_relative_eq!(late.start_time, 3.25);
        assert_relative_eq!(scheduler.next_start_time(), 3.75);
    }

    #[test]
    fn queues_behind_cursor_when_clock_is_early() {
        let mut output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new();
        output.advance_to(1.0);
        scheduler.schedule_chunk(&mut output, &chunk(0.4)).unwrap();
        output.advance_to(1.1);
        let second = scheduler.schedule_chunk(&mut output, &chunk(0.4)).unwrap();
        assert_relative_eq!(second.start_time, 1.4, epsilon = 1e-9);
    }

    #[test]
    fn malformed_unit_leaves_cursor_alone() {
        let mut output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.schedule_chunk(&mut output, &chunk(0.5)).unwrap();
        let bad = EncodedChunk {
            data: vec![1, 2, 3],
            sample_rate: 24_000,
            channels: 1,
            mime_type: EncodedChunk::pcm_mime(24_000),
        };
        assert!(matches!(
            scheduler.schedule_chunk(&mut output, &bad),
            Err(VidtalkError::Decode(_))
        ));
        assert_relative_eq!(scheduler.next_start_time(), 0.5);

        let next = scheduler.schedule_chunk(&mut output, &chunk(0.25)).unwrap();
        assert_relative_eq!(next.start_time, 0.5);
        assert_eq!(output.starts().len(), 2);
    }
}
