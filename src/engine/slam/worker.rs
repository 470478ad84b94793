//! Session on a dedicated estimator thread.
//!
//! ```text
//!  producers ──submit()──▶ [command channel] ──▶ jala-estimator thread
//!                                                   │  SlamSession::handle
//!                                                   ▼
//!  readers ◀──snapshot()── Arc<RwLock<SessionSnapshot>>
//!  readers ◀──diagnostics()── [diagnostic channel]
//! ```
//!
//! Events are processed strictly in submission order. Readers never block
//! the estimator for longer than one snapshot clone. The diagnostic channel
//! is bounded; when nobody drains it, new diagnostics are dropped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::RwLock;

use super::diagnostics::Diagnostic;
use super::session::{SensorEvent, SessionConfig, SessionError, SlamSession};
use super::snapshot::SessionSnapshot;

/// Diagnostics buffered for readers before new ones are dropped.
const DIAGNOSTIC_CHANNEL_CAPACITY: usize = 1024;

enum Command {
    Event(SensorEvent),
    Finish(Sender<Result<SessionSnapshot, SessionError>>),
}

/// Handle to a session running on its own thread.
pub struct SessionWorker {
    commands: Sender<Command>,
    diagnostics: Receiver<Diagnostic>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    handle: Option<JoinHandle<()>>,
}

impl SessionWorker {
    /// Spawn the estimator thread.
    pub fn spawn(config: SessionConfig) -> Result<Self, SessionError> {
        let (command_tx, command_rx) = unbounded();
        let (diagnostic_tx, diagnostic_rx) = bounded(DIAGNOSTIC_CHANNEL_CAPACITY);
        let snapshot = Arc::new(RwLock::new(SessionSnapshot::default()));

        let shared = Arc::clone(&snapshot);
        let handle = thread::Builder::new()
            .name("jala-estimator".into())
            .spawn(move || {
                let session = SlamSession::new(config);
                run_loop(session, command_rx, diagnostic_tx, shared);
            })
            .map_err(|e| SessionError::Worker(format!("failed to spawn estimator thread: {}", e)))?;

        Ok(Self {
            commands: command_tx,
            diagnostics: diagnostic_rx,
            snapshot,
            handle: Some(handle),
        })
    }

    /// Queue an event.
    pub fn submit(&self, event: SensorEvent) -> Result<(), SessionError> {
        self.commands
            .send(Command::Event(event))
            .map_err(|_| SessionError::Worker("estimator thread stopped".into()))
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    /// Diagnostics published since the last call.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.try_iter().collect()
    }

    /// Flush, stop the thread and return the final snapshot.
    ///
    /// Returns the first error the session hit, if any.
    pub fn finish(mut self) -> Result<SessionSnapshot, SessionError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(Command::Finish(reply_tx))
            .map_err(|_| SessionError::Worker("estimator thread stopped".into()))?;

        let result = reply_rx
            .recv()
            .map_err(|_| SessionError::Worker("estimator thread exited without reply".into()))?;

        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| SessionError::Worker("estimator thread panicked".into()))?;
        }
        result
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Dropping the last sender ends the loop.
            let (dead_tx, _) = unbounded();
            self.commands = dead_tx;
            let _ = handle.join();
        }
    }
}

fn run_loop(
    mut session: SlamSession,
    commands: Receiver<Command>,
    diagnostics: Sender<Diagnostic>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
) {
    log::info!("Estimator thread started");
    let mut first_error: Option<SessionError> = None;
    let mut dropped_diagnostics: u64 = 0;

    let mut publish = |session: &mut SlamSession| {
        for diagnostic in session.drain_diagnostics() {
            if diagnostics.try_send(diagnostic).is_err() {
                dropped_diagnostics += 1;
                if dropped_diagnostics == 1 || dropped_diagnostics % 1000 == 0 {
                    log::warn!("Diagnostic channel full, {} dropped", dropped_diagnostics);
                }
            }
        }
        *snapshot.write() = session.snapshot();
    };

    for command in commands.iter() {
        match command {
            Command::Event(event) => {
                let is_odometry = matches!(event, SensorEvent::Odometry(_));
                if let Err(e) = session.handle(event) {
                    log::error!("Event rejected: {}", e);
                    first_error.get_or_insert(e);
                }
                if is_odometry {
                    publish(&mut session);
                }
            }
            Command::Finish(reply) => {
                if let Err(e) = session.finish() {
                    log::error!("Final flush failed: {}", e);
                    first_error.get_or_insert(e);
                }
                publish(&mut session);

                let result = match first_error.take() {
                    Some(e) => Err(e),
                    None => Ok(session.snapshot()),
                };
                let _ = reply.send(result);
                break;
            }
        }
    }
    log::info!("Estimator thread stopped");
}
