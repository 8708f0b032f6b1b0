//! Shell establishment: login, privilege probe, and shell preparation.
//!
//! The connector first tries the privileged account with the operator's
//! password. If that is refused it logs in as the requested user and asks
//! `sudo` (non-interactively) whether the same password grants root. Only a
//! positive probe leads to an interactive `sudo -i` inside the PTY; anything
//! else falls back to the unprivileged shell.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::channel::ShellChannel;
use super::client::SshClient;
use crate::executor::{CommandExecutor, CommandResult};
use crate::models::connection::{
    ConnectParams, ConnectPhase, ElevatedBy, Elevation, FallbackReason, ShellTiming,
    PRIVILEGED_USER,
};
use crate::models::error::RelayError;
use crate::runtime::CommandBuilder;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// An authenticated transport that can also open the interactive shell.
#[async_trait]
pub trait ShellTransport: CommandExecutor + Sized + 'static {
    type Channel: ShellChannel + 'static;

    async fn open_shell(&self) -> Result<Self::Channel, RelayError>;
}

/// Opens and authenticates transports for one login attempt each.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Transport: ShellTransport;

    async fn dial(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self::Transport, RelayError>;
}

/// Password login over russh.
pub struct SshDialer;

#[async_trait]
impl Dialer for SshDialer {
    type Transport = SshClient;

    async fn dial(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<SshClient, RelayError> {
        SshClient::connect(host, port, username, password, timeout).await
    }
}

/// Tunables for [`connect`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectorSettings {
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub timing: ShellTiming,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            probe_timeout: PROBE_TIMEOUT,
            timing: ShellTiming::default(),
        }
    }
}

/// A ready shell and the transport that carries it.
pub struct ConnectedShell<T: ShellTransport = SshClient> {
    pub transport: Arc<T>,
    pub channel: T::Channel,
    pub elevation: Elevation,
}

fn enter_phase(params: &ConnectParams, phase: ConnectPhase) {
    tracing::debug!("[{}@{}] connector phase {:?}", params.username, params.host, phase);
}

/// Establish an authenticated, prepared SSH shell.
pub async fn connect(
    params: &ConnectParams,
    settings: &ConnectorSettings,
) -> Result<ConnectedShell, RelayError> {
    connect_with(&SshDialer, params, settings).await
}

/// Establish a prepared shell through `dialer`. Only transport and
/// authentication failures are fatal; elevation problems end in
/// [`Elevation::Fallback`].
pub async fn connect_with<D: Dialer>(
    dialer: &D,
    params: &ConnectParams,
    settings: &ConnectorSettings,
) -> Result<ConnectedShell<D::Transport>, RelayError> {
    enter_phase(params, ConnectPhase::Connecting);

    let (client, logged_in_privileged) = match login(dialer, params, settings.connect_timeout).await {
        Ok(login) => login,
        Err(e) => {
            enter_phase(params, ConnectPhase::Failed);
            return Err(e);
        }
    };

    let elevation = if logged_in_privileged {
        Elevation::Elevated(ElevatedBy::DirectLogin)
    } else {
        enter_phase(params, ConnectPhase::EscalationProbe);
        probe_elevation(&client, &params.password, settings.probe_timeout).await
    };

    match &elevation {
        Elevation::Elevated(by) => {
            enter_phase(params, ConnectPhase::Elevated);
            tracing::info!("Session on {} is privileged ({:?})", params.host, by);
        }
        Elevation::Fallback(reason) => {
            enter_phase(params, ConnectPhase::Unprivileged);
            tracing::warn!(
                "Staying unprivileged as {} on {}: {}",
                params.username,
                params.host,
                reason
            );
        }
    }

    let mut channel = match client.open_shell().await {
        Ok(channel) => channel,
        Err(e) => {
            enter_phase(params, ConnectPhase::Failed);
            client.disconnect().await;
            return Err(e);
        }
    };

    if let Err(e) = prepare_shell(&mut channel, &elevation, &params.password, &settings.timing).await {
        enter_phase(params, ConnectPhase::Failed);
        client.disconnect().await;
        return Err(e);
    }

    enter_phase(params, ConnectPhase::ShellReady);

    Ok(ConnectedShell {
        transport: Arc::new(client),
        channel,
        elevation,
    })
}

/// Authenticate, preferring the privileged account. Returns the transport and
/// whether it is already logged in as that account.
async fn login<D: Dialer>(
    dialer: &D,
    params: &ConnectParams,
    timeout: Duration,
) -> Result<(D::Transport, bool), RelayError> {
    if params.is_privileged_user() {
        let client = dialer
            .dial(&params.host, params.port, &params.username, &params.password, timeout)
            .await?;
        return Ok((client, true));
    }

    match dialer
        .dial(&params.host, params.port, PRIVILEGED_USER, &params.password, timeout)
        .await
    {
        Ok(client) => {
            tracing::info!("Logged in to {} directly as {}", params.host, PRIVILEGED_USER);
            Ok((client, true))
        }
        Err(e) => {
            tracing::debug!(
                "Direct {} login to {} refused ({}), using {}",
                PRIVILEGED_USER,
                params.host,
                e,
                params.username
            );
            let client = dialer
                .dial(&params.host, params.port, &params.username, &params.password, timeout)
                .await?;
            Ok((client, false))
        }
    }
}

/// Run the one-shot sudo probe and classify its outcome.
pub async fn probe_elevation<E: CommandExecutor + ?Sized>(
    executor: &E,
    password: &str,
    timeout: Duration,
) -> Elevation {
    let result = executor
        .execute_with_timeout(&CommandBuilder::sudo_probe(password), timeout)
        .await;
    if let Ok(output) = &result {
        tracing::debug!(
            "sudo check exited {} after {}ms",
            output.exit_code,
            output.execution_time_ms
        );
    }
    classify_probe(result)
}

/// Map a probe result onto the elevation outcome.
pub fn classify_probe(result: Result<CommandResult, RelayError>) -> Elevation {
    match result {
        Ok(output) if CommandBuilder::is_privileged_identity(&output.stdout) => {
            Elevation::Elevated(ElevatedBy::Sudo)
        }
        Ok(output) => Elevation::Fallback(FallbackReason::IdentityMismatch(
            output.stdout.trim().to_string(),
        )),
        Err(e) => Elevation::Fallback(FallbackReason::ProbeFailed(e.to_string())),
    }
}

/// Type the escalation sequence (or just the identity check) into a fresh shell.
/// The password line carries the same escaping as the sudo check.
pub async fn prepare_shell<C: ShellChannel + ?Sized>(
    channel: &mut C,
    elevation: &Elevation,
    password: &str,
    timing: &ShellTiming,
) -> Result<(), RelayError> {
    match elevation {
        Elevation::Elevated(ElevatedBy::Sudo) => {
            tokio::time::sleep(timing.shell_settle).await;
            channel.send_data(CommandBuilder::escalate_shell().as_bytes()).await?;
            tokio::time::sleep(timing.password_settle).await;
            channel
                .send_data(CommandBuilder::password_line(password).as_bytes())
                .await?;
            tokio::time::sleep(timing.confirm_settle).await;
            channel.send_data(CommandBuilder::whoami().as_bytes()).await?;
            tokio::time::sleep(timing.final_settle).await;
        }
        Elevation::Elevated(ElevatedBy::DirectLogin) | Elevation::Fallback(_) => {
            tokio::time::sleep(timing.unprivileged_settle).await;
            channel.send_data(CommandBuilder::whoami().as_bytes()).await?;
        }
    }
    Ok(())
}
