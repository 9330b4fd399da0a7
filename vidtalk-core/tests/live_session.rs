use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use vidtalk_core::audio::buffer::PlaybackUnit;
use vidtalk_core::buffering::{AudioProducer, Producer};
use vidtalk_core::capture::{CaptureConfig, InputDevice, InputStream};
use vidtalk_core::codec::{bytes_to_transport_text, float_to_pcm16, pcm16_to_float};
use vidtalk_core::live::{
    DuplexTransport, LiveBackends, LiveConfig, LiveConnection, LiveSession, LiveSetup,
    OutboundMessage, SessionObservers, SystemContext, TransportEvent,
};
use vidtalk_core::playback::{PlaybackDevice, PlaybackOutput};
use vidtalk_core::protocol::{Content, Part, ServerContent, ServerMessage};
use vidtalk_core::{PlaybackEvent, Result, SessionPhase, SessionStatusEvent};

const WAIT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Hands the session's event sender to the test so it can play the server.
#[derive(Clone, Default)]
struct ScriptedTransport {
    link: Arc<Mutex<Option<ServerLink>>>,
}

struct ServerLink {
    events: Sender<TransportEvent>,
    outbound: Receiver<OutboundMessage>,
    cancelled: Arc<AtomicBool>,
    setup: LiveSetup,
}

impl DuplexTransport for ScriptedTransport {
    fn connect(&self, setup: &LiveSetup, events: Sender<TransportEvent>) -> Result<LiveConnection> {
        let (tx, rx) = unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        *self.link.lock() = Some(ServerLink {
            events,
            outbound: rx,
            cancelled: Arc::clone(&cancelled),
            setup: setup.clone(),
        });
        Ok(LiveConnection::new(tx, cancelled))
    }
}

impl ScriptedTransport {
    fn send(&self, event: TransportEvent) {
        let link = self.link.lock();
        link.as_ref()
            .expect("connected")
            .events
            .send(event)
            .expect("session listening");
    }

    fn outbound(&self) -> Receiver<OutboundMessage> {
        self.link.lock().as_ref().expect("connected").outbound.clone()
    }

    fn cancelled(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .expect("connected")
            .cancelled
            .load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ClockState {
    now: f64,
    closes: usize,
}

/// Output whose clock only moves when the test says so.
#[derive(Clone, Default)]
struct ManualSpeaker {
    state: Arc<Mutex<ClockState>>,
}

impl PlaybackOutput for ManualSpeaker {
    fn current_time(&self) -> f64 {
        self.state.lock().now
    }

    fn start_at(&mut self, _unit: PlaybackUnit, _at: f64) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().closes += 1;
    }
}

impl PlaybackDevice for ManualSpeaker {
    fn open(&self) -> Result<Box<dyn PlaybackOutput>> {
        Ok(Box::new(self.clone()))
    }
}

/// Microphone that plays back a fixed recording at 16 kHz.
struct RecordedMic {
    samples: Vec<f32>,
    released: Arc<AtomicUsize>,
}

struct RecordedMicStream {
    released: Arc<AtomicUsize>,
    _producer: AudioProducer,
}

impl InputStream for RecordedMicStream {
    fn sample_rate(&self) -> u32 {
        16_000
    }
}

impl Drop for RecordedMicStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl InputDevice for RecordedMic {
    fn open(&self, mut producer: AudioProducer, _running: Arc<AtomicBool>) -> Result<Box<dyn InputStream>> {
        producer.push_slice(&self.samples);
        Ok(Box::new(RecordedMicStream {
            released: Arc::clone(&self.released),
            _producer: producer,
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Running {
    session: LiveSession,
    server: ScriptedTransport,
    speaker: ManualSpeaker,
    mic_released: Arc<AtomicUsize>,
    status: broadcast::Receiver<SessionStatusEvent>,
    playback: broadcast::Receiver<PlaybackEvent>,
}

fn start(mic_samples: Vec<f32>) -> Running {
    let server = ScriptedTransport::default();
    let speaker = ManualSpeaker::default();
    let mic_released = Arc::new(AtomicUsize::new(0));

    let observers = SessionObservers::default();
    let status = observers.status.subscribe();
    let playback = observers.playback.subscribe();

    let session = LiveSession::start_with_observers(
        LiveConfig {
            model: "live-test".into(),
            capture: CaptureConfig::default(),
        },
        LiveBackends {
            transport: Box::new(server.clone()),
            input: Arc::new(RecordedMic {
                samples: mic_samples,
                released: Arc::clone(&mic_released),
            }),
            playback: Box::new(speaker.clone()),
        },
        SystemContext::new("A chef explains how to fold dumplings.", "Charon", "en"),
        observers,
    )
    .expect("session starts");

    Running {
        session,
        server,
        speaker,
        mic_released,
        status,
        playback,
    }
}

fn wait_for_phase(rx: &mut broadcast::Receiver<SessionStatusEvent>, phase: SessionPhase) -> SessionStatusEvent {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) if event.phase == phase => return event,
            Ok(_) => {}
            Err(_) => std::thread::sleep(Duration::from_millis(2)),
        }
    }
    panic!("timed out waiting for phase {phase:?}");
}

fn next_playback(rx: &mut broadcast::Receiver<PlaybackEvent>) -> PlaybackEvent {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if let Ok(event) = rx.try_recv() {
            return event;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out waiting for a playback event");
}

fn audio(seconds: f64) -> TransportEvent {
    let samples = vec![0.2f32; (seconds * 24_000.0).round() as usize];
    TransportEvent::Message(ServerMessage {
        server_content: Some(ServerContent {
            model_turn: Some(Content {
                role: Some("model".into()),
                parts: vec![Part::inline(
                    "audio/pcm;rate=24000",
                    bytes_to_transport_text(&float_to_pcm16(&samples)),
                )],
            }),
            ..ServerContent::default()
        }),
        ..ServerMessage::default()
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn irregular_arrivals_play_back_to_back() {
    let mut run = start(Vec::new());
    run.server.send(TransportEvent::Opened);
    wait_for_phase(&mut run.status, SessionPhase::Open);

    run.server.send(audio(0.5));
    let first = next_playback(&mut run.playback);

    run.speaker.state.lock().now = 2.0;
    run.server.send(audio(0.3));
    let second = next_playback(&mut run.playback);
    run.server.send(audio(0.2));
    let third = next_playback(&mut run.playback);

    assert_relative_eq!(first.start_time, 0.0);
    assert_relative_eq!(second.start_time, 2.0);
    assert_relative_eq!(third.start_time, 2.3, epsilon = 1e-9);
    assert_relative_eq!(third.duration, 0.2, epsilon = 1e-9);
    assert_eq!((first.seq, second.seq, third.seq), (0, 1, 2));

    assert_eq!(run.session.diagnostics().units_scheduled, 3);
}

#[test]
fn microphone_frames_reach_the_transport_in_order() {
    let ramp: Vec<f32> = (0..4096 * 3).map(|i| ((i % 4096) as f32 / 4096.0) - 0.5).collect();
    let mut run = start(ramp.clone());

    let setup = run.server.link.lock().as_ref().map(|l| l.setup.clone()).unwrap();
    assert_eq!(setup.model, "live-test");
    assert_eq!(setup.voice, "Charon");
    assert!(setup.system_instruction.contains("fold dumplings"));

    run.server.send(TransportEvent::Opened);
    wait_for_phase(&mut run.status, SessionPhase::Open);

    let outbound = run.server.outbound();
    for frame in 0..3 {
        match outbound.recv_timeout(WAIT).expect("audio frame") {
            OutboundMessage::Audio(chunk) => {
                assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
                assert_eq!(chunk.data.len(), 2 * 4096);
                let decoded = pcm16_to_float(&chunk.data, 1).unwrap();
                let expected = &ramp[frame * 4096..(frame + 1) * 4096];
                for (got, want) in decoded[0].iter().zip(expected) {
                    assert!((got - want).abs() <= 1.0 / 16_384.0);
                }
            }
            OutboundMessage::Close => panic!("closed early"),
        }
    }
    run.session.close();
    assert!(run.session.diagnostics().frames_sent >= 3);
}

#[test]
fn close_twice_releases_each_resource_once() {
    let mut run = start(vec![0.0; 4096]);
    run.server.send(TransportEvent::Opened);
    wait_for_phase(&mut run.status, SessionPhase::Open);

    run.session.close();
    run.session.close();

    assert_eq!(run.session.phase(), SessionPhase::Closed);
    assert_eq!(run.speaker.state.lock().closes, 1);
    assert_eq!(run.mic_released.load(Ordering::SeqCst), 1);
    assert!(run.server.cancelled());

    let closes = run
        .server
        .outbound()
        .try_iter()
        .filter(|m| matches!(m, OutboundMessage::Close))
        .count();
    assert_eq!(closes, 1);

    let terminal = wait_for_phase(&mut run.status, SessionPhase::Closed);
    assert!(terminal.error.is_none());
}

#[test]
fn close_while_connecting_cancels_the_attempt() {
    let mut run = start(Vec::new());
    run.session.close();

    assert!(run.server.cancelled());
    assert_eq!(run.session.phase(), SessionPhase::Closed);
    assert_eq!(run.speaker.state.lock().closes, 1);
    assert_eq!(run.mic_released.load(Ordering::SeqCst), 0, "microphone never opened");
}

#[test]
fn connection_error_is_surfaced_as_terminal_event() {
    let mut run = start(Vec::new());
    run.server.send(TransportEvent::Opened);
    wait_for_phase(&mut run.status, SessionPhase::Open);

    run.server.send(TransportEvent::Error("connection reset".into()));
    let terminal = wait_for_phase(&mut run.status, SessionPhase::Closed);
    assert!(terminal.error.unwrap().contains("connection reset"));
    assert_eq!(run.speaker.state.lock().closes, 1);

    run.session.close();
    assert_eq!(run.speaker.state.lock().closes, 1);
}

#[test]
fn undecodable_audio_does_not_stop_playback() {
    let mut run = start(Vec::new());
    run.server.send(TransportEvent::Opened);
    wait_for_phase(&mut run.status, SessionPhase::Open);

    run.server.send(audio(0.4));
    next_playback(&mut run.playback);
    run.server.send(TransportEvent::Message(ServerMessage {
        server_content: Some(ServerContent {
            model_turn: Some(Content::user(vec![Part::inline("audio/pcm;rate=24000", "AAEC")])),
            ..ServerContent::default()
        }),
        ..ServerMessage::default()
    }));
    run.server.send(audio(0.1));
    let next = next_playback(&mut run.playback);

    assert_relative_eq!(next.start_time, 0.4, epsilon = 1e-9);
    assert_eq!(run.session.phase(), SessionPhase::Open);
    let diag = run.session.diagnostics();
    assert_eq!(diag.units_dropped, 1);
    assert_eq!(diag.units_scheduled, 2);
}

#[test]
fn late_subscribers_receive_later_events() {
    let run = start(Vec::new());
    let mut status = run.session.subscribe_status();
    let mut playback = run.session.subscribe_playback();

    run.server.send(TransportEvent::Opened);
    wait_for_phase(&mut status, SessionPhase::Open);
    run.server.send(audio(0.25));

    let event = next_playback(&mut playback);
    assert_eq!(event.seq, 0);
    assert_relative_eq!(event.duration, 0.25, epsilon = 1e-9);
}
