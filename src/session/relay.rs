use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::registry::{SessionRegistry, ShellInput};
use crate::models::event::{notify, EventSender, ServerEvent};
use crate::ssh::channel::{ShellChannel, ShellEvent};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// How often the loop re-checks that its session is still registered
    pub poll_interval: Duration,
    /// Largest `ssh_output` payload, in bytes
    pub chunk_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Why a relay loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// The session left the registry (client disconnect or replacement).
    Removed,
    /// The remote shell exited.
    Exited(u32),
    /// The channel reached EOF or was closed by the server.
    Closed,
    /// Reading or writing the channel failed.
    Failed(String),
}

/// Turns raw channel bytes into text chunks. Invalid sequences become U+FFFD;
/// a multi-byte character split across reads is held until it completes.
pub struct OutputDecoder {
    pending: Vec<u8>,
    chunk_size: usize,
}

impl OutputDecoder {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            // room for at least one full character
            chunk_size: chunk_size.max(4),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let hold = incomplete_tail_len(&self.pending);
        let ready: Vec<u8> = self.pending.drain(..self.pending.len() - hold).collect();
        self.split(&String::from_utf8_lossy(&ready))
    }

    /// Emit whatever is still held, substituting an unfinished character.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        self.split(&String::from_utf8_lossy(&rest))
    }

    fn split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let mut end = (start + self.chunk_size).min(text.len());
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            chunks.push(text[start..end].to_string());
            start = end;
        }
        chunks
    }
}

/// Length of a trailing, not yet complete UTF-8 sequence.
fn incomplete_tail_len(buf: &[u8]) -> usize {
    let start = buf.len().saturating_sub(3);
    for i in (start..buf.len()).rev() {
        let byte = buf[i];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        let available = buf.len() - i;
        return if needed > available { available } else { 0 };
    }
    0
}

/// Pump one session's shell: output goes to `events`, queued input goes to the
/// channel. Returns when the session is removed, the shell ends, or I/O fails.
pub async fn run_relay<C: ShellChannel>(
    session_id: String,
    generation: Uuid,
    mut channel: C,
    mut input_rx: mpsc::Receiver<ShellInput>,
    registry: SessionRegistry,
    events: EventSender,
    settings: RelaySettings,
) -> RelayExit {
    tracing::info!("Relay started for session {}", session_id);

    let mut decoder = OutputDecoder::new(settings.chunk_size);
    let mut interval = tokio::time::interval(settings.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        if !registry.is_current(&session_id, generation) {
            break RelayExit::Removed;
        }

        tokio::select! {
            _ = interval.tick() => {}
            input = input_rx.recv() => match input {
                Some(ShellInput::Data(bytes)) => {
                    if let Err(e) = channel.send_data(&bytes).await {
                        break RelayExit::Failed(e.to_string());
                    }
                }
                Some(ShellInput::Close) | None => break RelayExit::Removed,
            },
            event = channel.next_event() => match event {
                ShellEvent::Data(bytes) => {
                    for data in decoder.push(&bytes) {
                        notify(&events, ServerEvent::SshOutput { data }).await;
                    }
                }
                ShellEvent::ExitStatus(code) => break RelayExit::Exited(code),
                ShellEvent::Eof | ShellEvent::Closed => break RelayExit::Closed,
            },
        }
    };

    // deregister before the channel goes away; only tear down (and report)
    // if nobody else already did
    let detached = exit_event(&exit).and_then(|event| {
        registry
            .remove_if_current(&session_id, generation)
            .map(|session| (session, event))
    });

    for data in decoder.finish() {
        notify(&events, ServerEvent::SshOutput { data }).await;
    }
    channel.shutdown().await;

    if let Some((session, event)) = detached {
        notify(&events, event).await;
        session.close().await;
    }

    tracing::info!("Relay for session {} stopped: {:?}", session_id, exit);
    exit
}

/// What to tell the client when the shell ended on its own.
fn exit_event(exit: &RelayExit) -> Option<ServerEvent> {
    match exit {
        RelayExit::Removed => None,
        RelayExit::Exited(code) => Some(ServerEvent::SshDisconnected {
            message: format!("Remote shell exited with status {}", code),
        }),
        RelayExit::Closed => Some(ServerEvent::SshDisconnected {
            message: "SSH channel closed".to_string(),
        }),
        RelayExit::Failed(e) => Some(ServerEvent::error(format!("Connection lost: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::FakeExecutor;
    use crate::models::connection::{ElevatedBy, Elevation};
    use crate::session::registry::Session;
    use crate::ssh::channel::testing::FakeChannel;
    use std::sync::Arc;

    #[test]
    fn test_decoder_passes_ascii() {
        let mut decoder = OutputDecoder::new(4096);
        assert_eq!(decoder.push(b"root\r\n"), vec!["root\r\n".to_string()]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_decoder_holds_split_character() {
        let mut decoder = OutputDecoder::new(4096);
        let bytes = "媒体".as_bytes();
        assert!(decoder.push(&bytes[..2]).is_empty());
        assert_eq!(decoder.push(&bytes[2..4]).concat(), "媒");
        assert_eq!(decoder.push(&bytes[4..]).concat(), "体");
    }

    #[test]
    fn test_decoder_substitutes_invalid_bytes() {
        let mut decoder = OutputDecoder::new(4096);
        let out = decoder.push(&[b'o', b'k', 0xFF, b'!']).concat();
        assert_eq!(out, "ok\u{FFFD}!");

        // unfinished sequence at the very end is substituted on finish
        assert!(decoder.push(&[0xE4, 0xBD]).is_empty());
        assert_eq!(decoder.finish().concat(), "\u{FFFD}");
    }

    #[test]
    fn test_decoder_chunks_on_char_boundaries() {
        let mut decoder = OutputDecoder::new(4);
        let chunks = decoder.push("abcdé✓".as_bytes());
        assert_eq!(chunks.concat(), "abcdé✓");
        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert_eq!(chunks[0], "abcd");
    }

    struct Harness {
        registry: SessionRegistry,
        generation: Uuid,
        input_tx: mpsc::Sender<ShellInput>,
        channel_events: mpsc::UnboundedSender<ShellEvent>,
        written: Arc<parking_lot::Mutex<Vec<u8>>>,
        closed: Arc<parking_lot::Mutex<bool>>,
        transport: Arc<FakeExecutor>,
        events_rx: mpsc::Receiver<ServerEvent>,
        task: tokio::task::JoinHandle<RelayExit>,
    }

    fn start(id: &str) -> Harness {
        let registry = SessionRegistry::new();
        let (channel, channel_events) = FakeChannel::new();
        let written = channel.written.clone();
        let closed = channel.closed.clone();
        let (input_tx, input_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(FakeExecutor::new());
        let session = Session::new(
            transport.clone(),
            input_tx.clone(),
            Elevation::Elevated(ElevatedBy::Sudo),
        );
        let generation = session.generation;
        registry.put(id, session);

        let task = tokio::spawn(run_relay(
            id.to_string(),
            generation,
            channel,
            input_rx,
            registry.clone(),
            events_tx,
            RelaySettings::default(),
        ));

        Harness {
            registry,
            generation,
            input_tx,
            channel_events,
            written,
            closed,
            transport,
            events_rx,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_is_forwarded_in_order() {
        let mut h = start("s1");
        h.channel_events.send(ShellEvent::Data(b"first ".to_vec())).unwrap();
        h.channel_events.send(ShellEvent::Data(b"second".to_vec())).unwrap();

        assert_eq!(
            h.events_rx.recv().await,
            Some(ServerEvent::SshOutput { data: "first ".to_string() })
        );
        assert_eq!(
            h.events_rx.recv().await,
            Some(ServerEvent::SshOutput { data: "second".to_string() })
        );
        assert!(h.registry.contains("s1"));
        h.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_is_written_to_channel() {
        let h = start("s1");
        h.input_tx.send(ShellInput::Data(b"ls\n".to_vec())).await.unwrap();
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(h.written.lock().as_slice(), b"ls\n");
        h.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_within_one_interval_after_removal() {
        let mut h = start("s1");
        // let the loop reach its first wait
        tokio::time::sleep(Duration::from_millis(1)).await;

        let removed = h.registry.remove("s1");
        assert!(removed.is_some());
        let started = tokio::time::Instant::now();

        let exit = h.task.await.unwrap();
        assert_eq!(exit, RelayExit::Removed);
        assert!(started.elapsed() <= DEFAULT_POLL_INTERVAL);
        // no re-insert, no notification, channel released
        assert!(!h.registry.contains("s1"));
        assert!(h.events_rx.try_recv().is_err());
        assert!(*h.closed.lock());
        drop(removed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_deregistered_before_channel_shutdown() {
        let registry = SessionRegistry::new();
        let (mut channel, channel_events) = FakeChannel::new();
        let registered_at_shutdown = Arc::new(parking_lot::Mutex::new(None));
        let (seen, lookup) = (registered_at_shutdown.clone(), registry.clone());
        channel.on_shutdown = Some(Box::new(move || {
            *seen.lock() = Some(lookup.contains("s1"));
        }));

        let (input_tx, input_rx) = mpsc::channel(4);
        let (events_tx, _events_rx) = mpsc::channel(8);
        let session = Session::new(
            Arc::new(FakeExecutor::new()),
            input_tx,
            Elevation::Elevated(ElevatedBy::Sudo),
        );
        let generation = session.generation;
        registry.put("s1", session);

        channel_events.send(ShellEvent::ExitStatus(0)).unwrap();
        let exit = run_relay(
            "s1".to_string(),
            generation,
            channel,
            input_rx,
            registry.clone(),
            events_tx,
            RelaySettings::default(),
        )
        .await;

        assert_eq!(exit, RelayExit::Exited(0));
        assert_eq!(*registered_at_shutdown.lock(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_close_removes_session_and_notifies() {
        let mut h = start("s1");
        h.channel_events.send(ShellEvent::Data(b"logout\r\n".to_vec())).unwrap();
        h.channel_events.send(ShellEvent::ExitStatus(0)).unwrap();

        let exit = h.task.await.unwrap();
        assert_eq!(exit, RelayExit::Exited(0));
        assert!(!h.registry.contains("s1"));
        assert!(h.transport.is_disconnected());

        assert_eq!(
            h.events_rx.recv().await,
            Some(ServerEvent::SshOutput { data: "logout\r\n".to_string() })
        );
        match h.events_rx.recv().await {
            Some(ServerEvent::SshDisconnected { message }) => assert!(message.contains("status 0")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eof_ends_session() {
        let h = start("s1");
        h.channel_events.send(ShellEvent::Eof).unwrap();
        assert_eq!(h.task.await.unwrap(), RelayExit::Closed);
        assert!(!h.registry.contains("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_relay_leaves_new_session_alone() {
        let mut h = start("s1");
        tokio::time::sleep(Duration::from_millis(1)).await;

        // a reconnect replaces the session under the same id
        let (tx, _rx) = mpsc::channel(1);
        let replacement = Session::new(
            Arc::new(FakeExecutor::new()),
            tx,
            Elevation::Elevated(ElevatedBy::DirectLogin),
        );
        let new_gen = replacement.generation;
        h.registry.put("s1", replacement);

        assert_eq!(h.task.await.unwrap(), RelayExit::Removed);
        assert!(h.registry.is_current("s1", new_gen));
        assert_ne!(new_gen, h.generation);
        assert!(h.events_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_input_stops_without_error() {
        let mut h = start("s1");
        let session = h.registry.remove("s1").unwrap();
        session.close().await;
        assert_eq!(h.task.await.unwrap(), RelayExit::Removed);
        assert!(h.events_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_reports_error() {
        let registry = SessionRegistry::new();
        let (mut channel, _channel_events) = FakeChannel::new();
        channel.fail_writes = true;
        let (input_tx, input_rx) = mpsc::channel(4);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let transport = Arc::new(FakeExecutor::new());
        let session = Session::new(
            transport.clone(),
            input_tx.clone(),
            Elevation::Elevated(ElevatedBy::DirectLogin),
        );
        let generation = session.generation;
        registry.put("s1", session);

        let task = tokio::spawn(run_relay(
            "s1".to_string(),
            generation,
            channel,
            input_rx,
            registry.clone(),
            events_tx,
            RelaySettings::default(),
        ));
        input_tx.send(ShellInput::Data(b"ls\n".to_vec())).await.unwrap();

        assert!(matches!(task.await.unwrap(), RelayExit::Failed(_)));
        assert!(!registry.contains("s1"));
        assert!(transport.is_disconnected());
        match events_rx.recv().await {
            Some(ServerEvent::SshError { message }) => assert!(message.starts_with("Connection lost")),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
