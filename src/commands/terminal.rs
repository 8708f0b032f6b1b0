use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::executor::CommandExecutor;
use crate::models::connection::{ConnectParams, Elevation};
use crate::models::error::RelayError;
use crate::models::event::{notify, ConnectRequest, EventSender, InputRequest, ServerEvent};
use crate::session::{run_relay, RelaySettings, Session, SessionRegistry};
use crate::ssh::{self, ShellChannel};
use crate::state::AppState;

/// Keystrokes and orchestrator commands waiting for the relay
const INPUT_QUEUE_DEPTH: usize = 256;

/// Validate an `ssh_connect` payload. Never echoes the password.
pub fn connect_params(request: &ConnectRequest) -> Result<ConnectParams, RelayError> {
    let present = |v: &Option<String>| v.as_deref().map(|s| !s.is_empty()).unwrap_or(false);

    let mut missing = Vec::new();
    if !present(&request.host) {
        missing.push("host");
    }
    if !present(&request.username) {
        missing.push("username");
    }
    if !present(&request.password) {
        missing.push("password");
    }
    if !missing.is_empty() {
        return Err(RelayError::ValidationError(format!(
            "Missing required parameters: {}",
            missing.join(", ")
        )));
    }

    Ok(ConnectParams::new(
        request.host.as_deref().unwrap_or_default().trim(),
        request.port()?,
        request.username.as_deref().unwrap_or_default().trim(),
        request.password.as_deref().unwrap_or_default(),
    ))
}

/// Handle `ssh_connect`: open the shell, register it and start its relay.
pub async fn ssh_connect(
    state: &AppState,
    session_id: &str,
    request: ConnectRequest,
    events: &EventSender,
) {
    let params = match connect_params(&request) {
        Ok(params) => params,
        Err(e) => {
            notify(events, ServerEvent::error(e.to_string())).await;
            return;
        }
    };
    tracing::info!(
        "[{}] SSH connect to {}:{} as {}",
        session_id,
        params.host,
        params.port,
        params.username
    );
    if state.registry.contains(session_id) {
        tracing::info!("[{}] Active SSH session will be replaced on success", session_id);
    }

    match ssh::connect(&params, &state.config.connector_settings()).await {
        Ok(shell) => {
            attach_session(
                &state.registry,
                session_id,
                shell.transport,
                shell.channel,
                shell.elevation,
                events,
                state.config.relay_settings(),
            )
            .await;
        }
        Err(e) => {
            if e.is_connection_error() {
                tracing::warn!("[{}] SSH connect to {} failed: {}", session_id, params.host, e);
            } else {
                tracing::error!("[{}] SSH connect to {} failed: {}", session_id, params.host, e);
            }
            notify(events, ServerEvent::error(connect_error_message(&e))).await;
        }
    }
}

/// Text of the `ssh_error` sent when a connect attempt fails.
pub fn connect_error_message(e: &RelayError) -> String {
    if e.is_retryable() {
        format!("{} ({}, then retry)", e, e.recovery_suggestion())
    } else {
        format!("{} ({})", e, e.recovery_suggestion())
    }
}

/// Register a ready shell under `session_id`, tell the client, and spawn the
/// relay. A session already stored under the id is torn down.
pub async fn attach_session<C: ShellChannel + 'static>(
    registry: &SessionRegistry,
    session_id: &str,
    transport: Arc<dyn CommandExecutor>,
    channel: C,
    elevation: Elevation,
    events: &EventSender,
    settings: RelaySettings,
) -> Uuid {
    let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
    let session = Session::new(transport, input_tx, elevation.clone());
    let generation = session.generation;

    if let Some(displaced) = registry.put(session_id, session) {
        tracing::info!("[{}] Replacing previous SSH session", session_id);
        displaced.close().await;
    }
    tracing::debug!("[{}] {} SSH session(s) active", session_id, registry.len());

    let elevated = elevation.is_elevated();
    notify(
        events,
        ServerEvent::SshConnected {
            message: if elevated {
                "SSH connected (root)".to_string()
            } else {
                "SSH connected".to_string()
            },
            elevated,
        },
    )
    .await;

    if let Elevation::Fallback(reason) = &elevation {
        notify(
            events,
            ServerEvent::SshWarning {
                message: RelayError::EscalationFailure(reason.to_string()).to_string(),
            },
        )
        .await;
    }

    tokio::spawn(run_relay(
        session_id.to_string(),
        generation,
        channel,
        input_rx,
        registry.clone(),
        events.clone(),
        settings,
    ));

    generation
}

/// A lone carriage return (the Enter key) becomes a newline; anything else is
/// forwarded untouched.
pub fn normalize_input(command: &str) -> &str {
    if command == "\r" {
        "\n"
    } else {
        command
    }
}

/// Handle `ssh_input`. Silent on success.
pub async fn ssh_input(
    registry: &SessionRegistry,
    session_id: &str,
    request: InputRequest,
    events: &EventSender,
) {
    let Some(session) = registry.get(session_id) else {
        let err = RelayError::NotConnected("no active session".to_string());
        notify(events, ServerEvent::error(err.to_string())).await;
        return;
    };

    if let Err(e) = session.send(normalize_input(&request.command)).await {
        tracing::warn!("[{}] Failed to queue input: {}", session_id, e);
        notify(events, ServerEvent::error(e.to_string())).await;
    }
}

/// Handle `ssh_disconnect`.
pub async fn ssh_disconnect(registry: &SessionRegistry, session_id: &str, events: &EventSender) {
    match registry.remove(session_id) {
        Some(session) => {
            let uptime = session.connected_at.elapsed();
            session.close().await;
            tracing::info!("[{}] SSH session closed by client after {:?}", session_id, uptime);
            notify(
                events,
                ServerEvent::SshDisconnected {
                    message: "SSH disconnected".to_string(),
                },
            )
            .await;
        }
        None => {
            let err = RelayError::NotConnected("no active session".to_string());
            notify(events, ServerEvent::error(err.to_string())).await;
        }
    }
}

/// Release whatever the client left behind when its websocket went away.
pub async fn teardown(registry: &SessionRegistry, session_id: &str) {
    if let Some(session) = registry.remove(session_id) {
        tracing::info!("[{}] Client went away, closing SSH session", session_id);
        session.close().await;
    }
}
