//! Threaded runner for a [`SessionController`].
//!
//! # Lifecycle
//!
//! ```text
//! LiveSession::start()  → session thread spawned, controller built there,
//!                         open() result reported back, status = Connecting
//!     └─► events loop   → transport events and Close commands, one at a time
//!         └─► close()   → Close command sent, thread joined, status = Closed
//! ```
//!
//! The playback output is opened by the controller on the session thread and
//! dropped there, so thread-bound audio streams never cross threads.

use std::sync::mpsc;
use std::thread::JoinHandle;

use crossbeam_channel::{select, unbounded, Sender};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    controller::{SessionController, SessionObservers},
    DiagnosticsSnapshot, LiveBackends, LiveConfig, SystemContext,
};
use crate::{
    error::{Result, VidtalkError},
    events::{PlaybackEvent, SessionPhase, SessionStatusEvent},
};

enum SessionCommand {
    Close,
}

/// A live conversation running on its own thread.
pub struct LiveSession {
    commands: Sender<SessionCommand>,
    thread: Option<JoinHandle<()>>,
    observers: SessionObservers,
}

impl LiveSession {
    /// Start a session and wait until the connection request is issued.
    ///
    /// Subscribe to events through the returned handle; the `Connecting`
    /// status has already been sent by the time this returns, `Open` and
    /// everything after it arrive later.
    ///
    /// # Errors
    /// Playback device or connection-request failures. The session is
    /// already closed when an error is returned.
    pub fn start(config: LiveConfig, backends: LiveBackends, context: SystemContext) -> Result<Self> {
        Self::start_with_observers(config, backends, context, SessionObservers::default())
    }

    /// Like [`start`](Self::start), with caller-created observers so
    /// subscriptions exist before the first status event is sent.
    pub fn start_with_observers(
        config: LiveConfig,
        backends: LiveBackends,
        context: SystemContext,
        observers: SessionObservers,
    ) -> Result<Self> {
        let (command_tx, command_rx) = unbounded::<SessionCommand>();
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();
        let thread_observers = observers.clone();

        let thread = std::thread::Builder::new()
            .name("vidtalk-session".into())
            .spawn(move || {
                let mut controller = SessionController::new(config, backends, thread_observers);
                if let Err(e) = controller.open(context) {
                    let _ = open_tx.send(Err(e));
                    return;
                }
                let _ = open_tx.send(Ok(()));

                let events = controller.events().clone();
                loop {
                    if controller.phase() == SessionPhase::Closed {
                        break;
                    }
                    select! {
                        recv(events) -> event => match event {
                            Ok(event) => controller.handle_event(event),
                            Err(_) => {
                                warn!("transport event channel closed");
                                controller.close();
                            }
                        },
                        recv(command_rx) -> command => match command {
                            Ok(SessionCommand::Close) | Err(_) => controller.close(),
                        },
                    }
                }
                debug!("session thread exiting");
            })
            .map_err(VidtalkError::Io)?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands: command_tx,
                thread: Some(thread),
                observers,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VidtalkError::Connection(
                    "session thread exited before opening".into(),
                ))
            }
        }
    }

    /// End the session and release every resource. Idempotent; blocks until
    /// the session thread has finished teardown.
    pub fn close(&mut self) {
        let _ = self.commands.send(SessionCommand::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("session thread panicked");
            }
            info!("live session stopped");
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.observers.phase.lock()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.observers.status.subscribe()
    }

    pub fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.observers.playback.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.observers.diagnostics.snapshot()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}
