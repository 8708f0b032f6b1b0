use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};

use crate::models::error::RelayError;

/// Something observed on an interactive shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Data(Vec<u8>),
    ExitStatus(u32),
    Eof,
    Closed,
}

/// Interactive PTY stream. Exactly one task owns it; reads and writes travel
/// in independent directions.
#[async_trait]
pub trait ShellChannel: Send {
    /// Wait for the next event. Must be cancel-safe: the relay races it against a timer.
    async fn next_event(&mut self) -> ShellEvent;

    async fn send_data(&mut self, data: &[u8]) -> Result<(), RelayError>;

    async fn shutdown(&mut self);
}

#[async_trait]
impl ShellChannel for Channel<Msg> {
    async fn next_event(&mut self) -> ShellEvent {
        loop {
            match self.wait().await {
                Some(ChannelMsg::Data { data }) => return ShellEvent::Data(data.to_vec()),
                // a PTY merges stderr, but some servers still tag it
                Some(ChannelMsg::ExtendedData { data, .. }) => return ShellEvent::Data(data.to_vec()),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return ShellEvent::ExitStatus(exit_status)
                }
                Some(ChannelMsg::Eof) => return ShellEvent::Eof,
                Some(ChannelMsg::Close) | None => return ShellEvent::Closed,
                Some(other) => {
                    tracing::trace!("Ignoring channel message {:?}", other);
                }
            }
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), RelayError> {
        self.data(data)
            .await
            .map_err(|e| RelayError::ChannelClosed(format!("write failed: {}", e)))
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.eof().await {
            tracing::debug!("Failed to send EOF on shell channel: {}", e);
        }
        if let Err(e) = self.close().await {
            tracing::debug!("Failed to close shell channel: {}", e);
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// In-memory channel: tests feed events through `events_tx` and inspect `written`.
    pub struct FakeChannel {
        events: mpsc::UnboundedReceiver<ShellEvent>,
        pub written: Arc<Mutex<Vec<u8>>>,
        pub closed: Arc<Mutex<bool>>,
        pub fail_writes: bool,
        /// Runs once when the relay shuts the channel down.
        pub on_shutdown: Option<Box<dyn FnOnce() + Send>>,
    }

    impl FakeChannel {
        pub fn new() -> (Self, mpsc::UnboundedSender<ShellEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    events: rx,
                    written: Arc::new(Mutex::new(Vec::new())),
                    closed: Arc::new(Mutex::new(false)),
                    fail_writes: false,
                    on_shutdown: None,
                },
                tx,
            )
        }

        pub fn written_text(&self) -> String {
            String::from_utf8_lossy(&self.written.lock()).to_string()
        }
    }

    #[async_trait]
    impl ShellChannel for FakeChannel {
        async fn next_event(&mut self) -> ShellEvent {
            match self.events.recv().await {
                Some(event) => event,
                // keep the stream open while the test holds no sender
                None => std::future::pending().await,
            }
        }

        async fn send_data(&mut self, data: &[u8]) -> Result<(), RelayError> {
            if self.fail_writes {
                return Err(RelayError::ChannelClosed("write failed".to_string()));
            }
            self.written.lock().extend_from_slice(data);
            Ok(())
        }

        async fn shutdown(&mut self) {
            *self.closed.lock() = true;
            if let Some(hook) = self.on_shutdown.take() {
                hook();
            }
        }
    }
}
