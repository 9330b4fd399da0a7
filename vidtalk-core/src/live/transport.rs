//! The duplex-connection seam between the session controller and a remote
//! live model.
//!
//! A transport's `connect` returns immediately with a [`LiveConnection`];
//! the outcome of the attempt and everything received afterwards arrive as
//! [`TransportEvent`]s on the channel handed to `connect`, in receipt order.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::{
    codec::EncodedChunk,
    error::Result,
    protocol::{Content, GenerationConfig, ServerMessage, Setup, SetupMessage},
};

/// Parameters fixed when a live connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSetup {
    /// Model id without the `models/` prefix.
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

impl LiveSetup {
    /// The `setup` message sent as the first frame of the connection.
    pub fn to_message(&self) -> SetupMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        SetupMessage {
            setup: Setup {
                model,
                generation_config: GenerationConfig::audio(self.voice.clone()),
                system_instruction: Content::system(self.system_instruction.clone()),
            },
        }
    }
}

/// What the transport reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The remote accepted the setup; audio may flow.
    Opened,
    /// One parsed server message.
    Message(ServerMessage),
    /// The connection failed or broke.
    Error(String),
    /// The remote closed the connection.
    Closed { reason: Option<String> },
}

/// Queued for the transport worker to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Audio(EncodedChunk),
    Close,
}

/// Opens duplex connections to a live model.
pub trait DuplexTransport: Send + 'static {
    /// Start a connection attempt and return its handle without waiting for
    /// the remote. Completion is signalled with `TransportEvent::Opened` or
    /// `TransportEvent::Error` on `events`.
    ///
    /// # Errors
    /// Only for failures detected before any I/O (e.g. a bad endpoint).
    fn connect(&self, setup: &LiveSetup, events: Sender<TransportEvent>) -> Result<LiveConnection>;
}

/// Cloneable, non-blocking sender for microphone audio.
#[derive(Debug, Clone)]
pub struct AudioSender {
    outbound: Sender<OutboundMessage>,
    cancelled: Arc<AtomicBool>,
}

impl AudioSender {
    /// Queue one chunk. Returns `false` once the connection is closed.
    pub fn send(&self, chunk: EncodedChunk) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        self.outbound.send(OutboundMessage::Audio(chunk)).is_ok()
    }
}

/// Handle to one connection attempt.
///
/// Closing marks the attempt cancelled and asks the worker to send a close
/// frame; it never blocks on the network.
#[derive(Debug)]
pub struct LiveConnection {
    outbound: Sender<OutboundMessage>,
    cancelled: Arc<AtomicBool>,
}

impl LiveConnection {
    pub fn new(outbound: Sender<OutboundMessage>, cancelled: Arc<AtomicBool>) -> Self {
        Self { outbound, cancelled }
    }

    pub fn audio_sender(&self) -> AudioSender {
        AudioSender {
            outbound: self.outbound.clone(),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(OutboundMessage::Close);
        debug!("live connection close requested");
    }

    pub fn is_closed(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn setup_prefixes_model_once() {
        let setup = LiveSetup {
            model: "gemini-live".into(),
            voice: "Kore".into(),
            system_instruction: "hi".into(),
        };
        assert_eq!(setup.to_message().setup.model, "models/gemini-live");

        let prefixed = LiveSetup {
            model: "models/gemini-live".into(),
            ..setup
        };
        assert_eq!(prefixed.to_message().setup.model, "models/gemini-live");
    }

    #[test]
    fn close_is_idempotent_and_stops_audio() {
        let (tx, rx) = unbounded();
        let mut conn = LiveConnection::new(tx, Arc::new(AtomicBool::new(false)));
        let sender = conn.audio_sender();

        let chunk = EncodedChunk {
            data: vec![0, 0],
            sample_rate: 16_000,
            channels: 1,
            mime_type: EncodedChunk::pcm_mime(16_000),
        };
        assert!(sender.send(chunk.clone()));
        assert!(!conn.is_closed());

        conn.close();
        conn.close();
        assert!(conn.is_closed());
        drop(conn);

        assert!(!sender.send(chunk.clone()));
        let queued: Vec<_> = rx.try_iter().collect();
        assert_eq!(queued, vec![OutboundMessage::Audio(chunk), OutboundMessage::Close]);
    }
}
