use serde::{Deserialize, Serialize};

use crate::models::error::RelayError;

/// Used when no base directory is configured or supplied.
pub const DEFAULT_BASE_DIR: &str = "/docker";

/// Directory appended to every base so the tool owns its own tree.
pub const APP_DIR_SUFFIX: &str = "/naspt";

pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";
pub const ENV_FILE_NAME: &str = ".env";

/// Number of log lines requested by the `logs` action.
pub const LOG_TAIL_LINES: u32 = 100;

/// Normalize a base directory so it always ends in `/naspt` without a trailing slash.
/// Idempotent: a normalized path comes back unchanged.
pub fn normalize_base_path(base_path: &str) -> String {
    let mut base = base_path.trim();
    if base.is_empty() {
        base = DEFAULT_BASE_DIR;
    }
    let mut base = base.trim_end_matches('/');
    if base.is_empty() {
        base = DEFAULT_BASE_DIR;
    }
    if base.ends_with(APP_DIR_SUFFIX) {
        base.to_string()
    } else {
        format!("{}{}", base, APP_DIR_SUFFIX)
    }
}

/// Directory structure on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePaths {
    pub base: String,
    pub downloads: String,
    pub tmp: String,
    pub compose: String,
}

impl RemotePaths {
    pub fn from_base(base: &str) -> Self {
        let base = normalize_base_path(base);
        Self {
            downloads: format!("{}/downloads", base),
            tmp: format!("{}/tmp", base),
            compose: format!("{}/compose", base),
            base,
        }
    }

    /// Use the override when it is non-blank, otherwise the configured default.
    pub fn resolve(override_path: Option<&str>, default_base: &str) -> Self {
        match override_path.filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_base(path),
            None => Self::from_base(default_base),
        }
    }

    pub fn compose_file(&self) -> String {
        format!("{}/{}", self.compose, COMPOSE_FILE_NAME)
    }

    pub fn env_file(&self) -> String {
        format!("{}/{}", self.compose, ENV_FILE_NAME)
    }
}

/// Lifecycle action requested by `deploy_compose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeAction {
    Up,
    Down,
    Logs,
}

impl ComposeAction {
    pub fn parse(action: &str) -> Result<Self, RelayError> {
        match action.trim() {
            "" | "up" => Ok(ComposeAction::Up),
            "down" => Ok(ComposeAction::Down),
            "logs" => Ok(ComposeAction::Logs),
            other => Err(RelayError::ValidationError(format!("Unknown action: {}", other))),
        }
    }

    /// Acknowledgement sent once the command is dispatched.
    pub fn dispatched_message(&self) -> &'static str {
        match self {
            ComposeAction::Up => "Start command sent",
            ComposeAction::Down => "Stop command sent",
            ComposeAction::Logs => "Logs command sent",
        }
    }
}

/// Which compose CLI the remote host provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeVariant {
    /// `docker compose`
    Plugin,
    /// `docker-compose`
    Standalone,
}

impl ComposeVariant {
    pub fn binary(&self) -> &'static str {
        match self {
            ComposeVariant::Plugin => "docker compose",
            ComposeVariant::Standalone => "docker-compose",
        }
    }
}
