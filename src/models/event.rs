use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::connection::DEFAULT_SSH_PORT;
use crate::models::error::RelayError;

/// Envelope of every client frame: `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientMessage {
    /// Decode the payload, treating a missing `data` as an empty object.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, RelayError> {
        let data = if self.data.is_null() {
            Value::Object(Default::default())
        } else {
            self.data.clone()
        };
        serde_json::from_value(data)
            .map_err(|e| RelayError::ValidationError(format!("invalid {} payload: {}", self.event, e)))
    }
}

/// Carries the raw password, so no `Debug`.
#[derive(Clone, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub host: Option<String>,
    /// Browsers send the port as either a number or a string.
    #[serde(default)]
    pub port: Option<Value>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ConnectRequest {
    pub fn port(&self) -> Result<u16, RelayError> {
        let invalid = |v: &Value| RelayError::ValidationError(format!("invalid port: {}", v));
        match &self.port {
            None | Some(Value::Null) => Ok(DEFAULT_SSH_PORT),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p != 0)
                .ok_or_else(|| invalid(&Value::Number(n.clone()))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(DEFAULT_SSH_PORT),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| invalid(&Value::String(s.clone()))),
            Some(other) => Err(invalid(other)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputRequest {
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub compose: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub docker_path: Option<String>,
}

/// Events pushed to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    SshConnected { message: String, elevated: bool },
    SshOutput { data: String },
    SshError { message: String },
    /// Non-fatal notice, e.g. elevation fell back to the login user.
    SshWarning { message: String },
    SshDisconnected { message: String },
    ComposeResult { success: bool, message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::SshError { message: message.into() }
    }
}

pub type EventSender = mpsc::Sender<ServerEvent>;

/// Deliver an event, swallowing failures: the client may already be gone.
pub async fn notify(events: &EventSender, event: ServerEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("Client event channel closed, dropping event");
    }
}
