//! Live session state machine.
//!
//! ```text
//! Idle ──open()──► Connecting ──Opened──► Open ──close()/Error/Closed──► Closing ──► Closed
//!                      │                                                  ▲
//!                      └───────────── close()/Error/Closed ───────────────┘
//! ```
//!
//! The controller is driven from a single thread: `open`, `handle_event` and
//! `close` are never called concurrently, so the scheduling cursor and the
//! resource slots need no locking. Each acquired resource lives in an
//! `Option` and is released with `take()`, which makes teardown safe from any
//! phase and any number of times.

use std::sync::{atomic::Ordering, Arc};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{
    transport::{DuplexTransport, LiveConnection, LiveSetup, TransportEvent},
    LiveBackends, LiveConfig, SessionDiagnostics, SystemContext,
};
use crate::{
    capture::{CaptureHandle, CapturePipeline},
    codec::EncodedChunk,
    error::{Result, VidtalkError},
    events::{PlaybackEvent, SessionPhase, SessionStatusEvent},
    playback::{PlaybackDevice, PlaybackOutput, PlaybackScheduler},
    protocol::ServerMessage,
};

/// Capacity of each caller-facing broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Everything a caller can observe about a session from another thread.
#[derive(Clone)]
pub struct SessionObservers {
    pub status: broadcast::Sender<SessionStatusEvent>,
    pub playback: broadcast::Sender<PlaybackEvent>,
    pub phase: Arc<Mutex<SessionPhase>>,
    pub diagnostics: Arc<SessionDiagnostics>,
}

impl Default for SessionObservers {
    fn default() -> Self {
        let (status, _) = broadcast::channel(EVENT_CAPACITY);
        let (playback, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            status,
            playback,
            phase: Arc::new(Mutex::new(SessionPhase::Idle)),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }
}

/// Per-session mutable record handed to every event handler.
#[derive(Debug)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub scheduler: PlaybackScheduler,
    pub context: Option<SystemContext>,
    playback_seq: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            scheduler: PlaybackScheduler::new(),
            context: None,
            playback_seq: 0,
        }
    }
}

pub struct SessionController {
    config: LiveConfig,
    transport: Box<dyn DuplexTransport>,
    capture: CapturePipeline,
    playback_device: Box<dyn PlaybackDevice>,
    observers: SessionObservers,
    state: SessionState,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    connection: Option<LiveConnection>,
    capture_handle: Option<CaptureHandle>,
    output: Option<Box<dyn PlaybackOutput>>,
}

impl SessionController {
    pub fn new(config: LiveConfig, backends: LiveBackends, observers: SessionObservers) -> Self {
        let (events_tx, events_rx) = unbounded();
        let capture = CapturePipeline::new(backends.input, config.capture.clone());
        Self {
            config,
            transport: backends.transport,
            capture,
            playback_device: backends.playback,
            observers,
            state: SessionState::default(),
            events_tx,
            events_rx,
            connection: None,
            capture_handle: None,
            output: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Transport events for this session, to be fed back into
    /// [`handle_event`](Self::handle_event) in order.
    pub fn events(&self) -> &Receiver<TransportEvent> {
        &self.events_rx
    }

    pub fn observers(&self) -> &SessionObservers {
        &self.observers
    }

    /// Open the playback output and request the duplex connection.
    ///
    /// # Errors
    /// `InvalidState` outside `Idle`. Device or connection failures close
    /// the session and are returned as well as broadcast.
    pub fn open(&mut self, context: SystemContext) -> Result<()> {
        if self.state.phase != SessionPhase::Idle {
            return Err(VidtalkError::InvalidState(self.state.phase.as_str()));
        }
        self.set_phase(SessionPhase::Connecting, None);

        match self.playback_device.open() {
            Ok(output) => self.output = Some(output),
            Err(e) => {
                error!("failed to open playback output: {e}");
                self.shutdown(Some(e.to_string()));
                return Err(e);
            }
        }

        let setup = LiveSetup {
            model: self.config.model.clone(),
            voice: context.voice.clone(),
            system_instruction: context.system_instruction(),
        };
        match self.transport.connect(&setup, self.events_tx.clone()) {
            Ok(connection) => self.connection = Some(connection),
            Err(e) => {
                error!("failed to start live connection: {e}");
                self.shutdown(Some(e.to_string()));
                return Err(e);
            }
        }

        info!(model = %self.config.model, voice = %context.voice, language = %context.language, "live session connecting");
        self.state.context = Some(context);
        Ok(())
    }

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match (self.state.phase, event) {
            (SessionPhase::Connecting, TransportEvent::Opened) => self.on_open(),
            (SessionPhase::Open, TransportEvent::Message(msg)) => self.on_message(&msg),
            (SessionPhase::Connecting | SessionPhase::Open, TransportEvent::Error(message)) => {
                error!("live connection error: {message}");
                self.shutdown(Some(VidtalkError::Connection(message).to_string()));
            }
            (SessionPhase::Connecting | SessionPhase::Open, TransportEvent::Closed { reason }) => {
                let message = match reason {
                    Some(r) if !r.is_empty() => format!("closed by server: {r}"),
                    _ => "closed by server".to_string(),
                };
                warn!("{message}");
                self.shutdown(Some(VidtalkError::Connection(message).to_string()));
            }
            (phase, event) => debug!(phase = phase.as_str(), ?event, "ignoring transport event"),
        }
    }

    /// Release everything. Safe from any phase, any number of times.
    pub fn close(&mut self) {
        self.shutdown(None);
    }

    fn on_open(&mut self) {
        self.set_phase(SessionPhase::Open, None);
        if let Some(context) = &self.state.context {
            info!(
                voice = %context.voice,
                language = %context.language,
                context_chars = context.text.chars().count(),
                "live session open"
            );
        }

        let Some(connection) = self.connection.as_ref() else {
            self.shutdown(Some("connection handle missing after open".into()));
            return;
        };
        let sender = connection.audio_sender();
        let diagnostics = Arc::clone(&self.observers.diagnostics);

        let started = self.capture.start(move |frame| {
            diagnostics.frames_captured.fetch_add(1, Ordering::Relaxed);
            if sender.send(EncodedChunk::from_frame(&frame)) {
                diagnostics.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
        });

        match started {
            Ok(handle) => self.capture_handle = Some(handle),
            Err(e) => {
                error!("microphone capture failed: {e}");
                self.shutdown(Some(e.to_string()));
            }
        }
    }

    fn on_message(&mut self, msg: &ServerMessage) {
        let diagnostics = &self.observers.diagnostics;
        diagnostics.messages_received.fetch_add(1, Ordering::Relaxed);

        for blob in msg.audio_blobs() {
            let chunk = match EncodedChunk::from_transport(&blob.mime_type, &blob.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(mime = %blob.mime_type, "dropping inbound audio: {e}");
                    diagnostics.units_dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            let Some(output) = self.output.as_deref_mut() else {
                return;
            };

            match self.state.scheduler.schedule_chunk(output, &chunk) {
                Ok(scheduled) => {
                    debug!(
                        samples = chunk.sample_count(),
                        rate = chunk.sample_rate,
                        start = scheduled.start_time,
                        "inbound audio scheduled"
                    );
                    diagnostics.units_scheduled.fetch_add(1, Ordering::Relaxed);
                    let seq = self.state.playback_seq;
                    self.state.playback_seq += 1;
                    let _ = self.observers.playback.send(PlaybackEvent {
                        seq,
                        start_time: scheduled.start_time,
                        duration: scheduled.duration,
                    });
                }
                Err(e) if e.is_session_fatal() => {
                    error!("playback output failed: {e}");
                    self.shutdown(Some(e.to_string()));
                    return;
                }
                Err(e) => {
                    warn!("inbound audio not scheduled: {e}");
                    diagnostics.units_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn shutdown(&mut self, error: Option<String>) {
        if self.state.phase == SessionPhase::Closed {
            return;
        }
        self.set_phase(SessionPhase::Closing, None);

        if let Some(mut capture) = self.capture_handle.take() {
            capture.stop();
        }
        if let Some(mut output) = self.output.take() {
            output.close();
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }

        let diag = self.observers.diagnostics.snapshot();
        info!(
            frames_sent = diag.frames_sent,
            units_scheduled = diag.units_scheduled,
            units_dropped = diag.units_dropped,
            "live session closed"
        );
        self.set_phase(SessionPhase::Closed, error);
    }

    fn set_phase(&mut self, phase: SessionPhase, error: Option<String>) {
        self.state.phase = phase;
        *self.observers.phase.lock() = phase;
        let _ = self.observers.status.send(SessionStatusEvent { phase, error });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}
