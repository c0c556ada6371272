//! Handle for controlling a running session from presentation or tests

use super::events::{SessionEvent, SessionNotification};
use super::state::{SessionSnapshot, SessionState, SharedSessionState};
use crate::conversation::{transcript_json, Turn};
use crate::{ParleyError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Command sender plus read-only views of the session
///
/// Presentation holds one of these; it can ask for state changes but never
/// mutate session state directly.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    ingress_tx: Sender<SessionEvent>,
    notify_rx: Receiver<SessionNotification>,
    state: SharedSessionState,
}

impl SessionHandle {
    pub(crate) fn new(
        id: Uuid,
        ingress_tx: Sender<SessionEvent>,
        notify_rx: Receiver<SessionNotification>,
        state: SharedSessionState,
    ) -> Self {
        Self {
            id,
            ingress_tx,
            notify_rx,
            state,
        }
    }

    /// Unique id of the session this handle controls
    pub fn session_id(&self) -> Uuid {
        self.id
    }

    fn send(&self, event: SessionEvent) -> Result<()> {
        self.ingress_tx
            .send(event)
            .map_err(|e| ParleyError::ChannelError(format!("Failed to send command: {}", e)))
    }

    /// Open the microphone for the next user turn
    pub fn start_session(&self) -> Result<()> {
        self.send(SessionEvent::StartSession)
    }

    /// Stop capturing; a pending final result is still delivered
    pub fn stop_listening(&self) -> Result<()> {
        self.send(SessionEvent::StopListening)
    }

    /// Cancel everything in flight and clear the conversation
    pub fn reset(&self) -> Result<()> {
        self.send(SessionEvent::Reset)
    }

    /// Stop the session worker
    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionEvent::Shutdown)
    }

    /// Try to receive a notification (non-blocking)
    pub fn try_recv_notification(&self) -> Option<SessionNotification> {
        self.notify_rx.try_recv().ok()
    }

    /// Receive a notification, waiting at most `timeout`
    pub fn recv_notification_timeout(&self, timeout: Duration) -> Option<SessionNotification> {
        self.notify_rx.recv_timeout(timeout).ok()
    }

    /// Get the shared session state
    pub fn shared_state(&self) -> &SharedSessionState {
        &self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    pub fn transcript(&self) -> Vec<Turn> {
        self.state.transcript()
    }

    /// Current transcript as pretty JSON
    pub fn transcript_json(&self) -> Result<String> {
        transcript_json(&self.state.transcript())
    }

    /// Poll until the session reaches `target` or `timeout` expires
    pub fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
        self.wait_until(timeout, |snapshot| snapshot.state == target)
    }

    /// Poll the shared state until `done` holds or `timeout` expires
    pub fn wait_until(&self, timeout: Duration, done: impl Fn(&SessionSnapshot) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.state.snapshot()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}
