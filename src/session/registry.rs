use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::executor::CommandExecutor;
use crate::models::connection::Elevation;
use crate::models::error::RelayError;

/// Messages for the task that owns a shell channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    Data(Vec<u8>),
    Close,
}

/// One client's remote shell. Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    /// Distinguishes this session from a later one stored under the same id
    pub generation: Uuid,
    pub transport: Arc<dyn CommandExecutor>,
    input_tx: mpsc::Sender<ShellInput>,
    pub elevation: Elevation,
    pub connected_at: Instant,
}

impl Session {
    pub fn new(
        transport: Arc<dyn CommandExecutor>,
        input_tx: mpsc::Sender<ShellInput>,
        elevation: Elevation,
    ) -> Self {
        Self {
            generation: Uuid::new_v4(),
            transport,
            input_tx,
            elevation,
            connected_at: Instant::now(),
        }
    }

    pub fn is_elevated(&self) -> bool {
        self.elevation.is_elevated()
    }

    /// Queue bytes for the shell. Does not wait for the remote side.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), RelayError> {
        self.input_tx
            .send(ShellInput::Data(data.into()))
            .await
            .map_err(|_| RelayError::ChannelClosed("SSH channel is closed".to_string()))
    }

    /// Stop the relay and release the transport. Call only after the session
    /// has left the registry.
    pub async fn close(self) {
        let _ = self.input_tx.try_send(ShellInput::Close);
        self.transport.disconnect().await;
    }
}

/// Process-wide map from client-session id to its [`Session`].
///
/// Every operation takes the lock briefly and never across an await, so
/// connection handlers, input handlers and relay tasks can share it freely.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session, returning whichever session it displaced.
    pub fn put(&self, id: &str, session: Session) -> Option<Session> {
        let displaced = self.sessions.lock().insert(id.to_string(), session);
        if displaced.is_some() {
            tracing::debug!("Session {} replaced an existing shell", id);
        }
        displaced
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.lock().remove(id)
    }

    /// Remove the entry only if it is still the given generation.
    pub fn remove_if_current(&self, id: &str, generation: Uuid) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        match sessions.get(id) {
            Some(session) if session.generation == generation => sessions.remove(id),
            _ => None,
        }
    }

    pub fn is_current(&self, id: &str, generation: Uuid) -> bool {
        self.sessions
            .lock()
            .get(id)
            .map(|s| s.generation == generation)
            .unwrap_or(false)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}
