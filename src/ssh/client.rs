use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connector::ShellTransport;
use crate::executor::{redact_payload, CommandExecutor, CommandResult};
use crate::models::error::RelayError;

/// Terminal type requested for interactive shells.
pub const TERM: &str = "xterm-256color";
const PTY_COLS: u32 = 80;
const PTY_ROWS: u32 = 24;

/// Format a host:port pair, bracketing IPv6 addresses to avoid ambiguity.
pub(crate) fn host_port(hostname: &str, port: u16) -> String {
    if hostname.contains(':') {
        format!("[{}]:{}", hostname, port)
    } else {
        format!("{}:{}", hostname, port)
    }
}

/// SSH connection handler. Unknown host keys are accepted and their
/// fingerprint logged; there is no known_hosts store for browser sessions.
pub struct SshHandler {
    hostname: String,
    port: u16,
}

impl SshHandler {
    pub fn new(hostname: String, port: u16) -> Self {
        Self { hostname, port }
    }
}

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::info!(
            "Accepting host key for {}:{} ({} SHA256:{})",
            self.hostname,
            self.port,
            server_public_key.name(),
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}

/// Authenticated SSH transport to one remote host
pub struct SshClient {
    session: Handle<SshHandler>,
    hostname: String,
}

impl SshClient {
    /// Open a TCP connection and authenticate with a password.
    pub async fn connect(
        hostname: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let addr = host_port(hostname, port);
        tracing::info!("Connecting to SSH server at {} as {}", addr, username);

        let config = Config::default();
        let handler = SshHandler::new(hostname.to_string(), port);
        let connect_future = client::connect(Arc::new(config), addr.as_str(), handler);
        let mut session = tokio::time::timeout(timeout, connect_future)
            .await
            .map_err(|_| RelayError::NetworkTimeout(format!(
                "SSH connection to {} timed out after {} seconds",
                addr,
                timeout.as_secs()
            )))?
            .map_err(|e| RelayError::ConnectionFailed(addr.clone(), e.to_string()))?;

        Self::authenticate(&mut session, username, password, timeout).await?;

        tracing::info!("SSH authentication successful for {}@{}", username, hostname);

        Ok(Self {
            session,
            hostname: hostname.to_string(),
        })
    }

    async fn authenticate(
        session: &mut Handle<SshHandler>,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), RelayError> {
        tracing::debug!("Attempting password authentication for {}", username);

        let auth_result = tokio::time::timeout(
            timeout,
            session.authenticate_password(username, password),
        )
        .await
        .map_err(|_| RelayError::NetworkTimeout(format!(
            "Authentication for {} timed out",
            username
        )))?
        .map_err(|e| {
            tracing::error!("SSH password authentication error: {}", e);
            RelayError::AuthenticationFailed(e.to_string())
        })?;

        if !auth_result {
            tracing::warn!("SSH password authentication rejected by server for user: {}", username);
            return Err(RelayError::AuthenticationFailed(format!(
                "server rejected credentials for {}",
                username
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ShellTransport for SshClient {
    type Channel = Channel<Msg>;

    /// Open an interactive PTY shell on the existing connection
    async fn open_shell(&self) -> Result<Channel<Msg>, RelayError> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| RelayError::Internal(format!("Failed to open SSH channel: {}", e)))?;

        channel
            .request_pty(true, TERM, PTY_COLS, PTY_ROWS, 0, 0, &[])
            .await
            .map_err(|e| RelayError::Internal(format!("Failed to request PTY: {}", e)))?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| RelayError::Internal(format!("Failed to request shell: {}", e)))?;

        Ok(channel)
    }
}

#[async_trait]
impl CommandExecutor for SshClient {
    async fn execute(&self, command: &str) -> Result<CommandResult, RelayError> {
        let start = Instant::now();

        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| RelayError::ChannelClosed(format!("Failed to open SSH channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| RelayError::Internal(format!(
                "Failed to execute {}: {}",
                redact_payload(command),
                e
            )))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    stderr.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = exit_status as i32;
                }
                Some(ChannelMsg::Eof) | None => break,
                _ => {}
            }
        }

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn disconnect(&self) {
        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            tracing::debug!("SSH disconnect from {} reported: {}", self.hostname, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_ipv4_and_names() {
        assert_eq!(host_port("10.0.0.5", 22), "10.0.0.5:22");
        assert_eq!(host_port("nas.local", 2222), "nas.local:2222");
    }

    #[test]
    fn test_host_port_brackets_ipv6() {
        assert_eq!(host_port("fe80::1", 22), "[fe80::1]:22");
    }
}
