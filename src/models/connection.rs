use std::fmt;
use std::time::Duration;

use zeroize::Zeroizing;

/// Account name the connector tries to end up as.
pub const PRIVILEGED_USER: &str = "root";

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Transient connection input. Never persisted; the password is wiped on drop
/// and redacted from `Debug` output.
#[derive(Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Zeroizing<String>,
}

impl ConnectParams {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn is_privileged_user(&self) -> bool {
        self.username.eq_ignore_ascii_case(PRIVILEGED_USER)
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// How the session became privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevatedBy {
    /// Logged in as the privileged account directly.
    DirectLogin,
    /// Escalated inside the interactive shell after a successful sudo probe.
    Sudo,
}

/// Why the connector settled for the unprivileged shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The probe ran but reported some other identity (or nothing).
    IdentityMismatch(String),
    /// The probe itself could not run.
    ProbeFailed(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::IdentityMismatch(who) if who.is_empty() => {
                write!(f, "sudo probe returned no identity")
            }
            FallbackReason::IdentityMismatch(who) => write!(f, "sudo probe reported '{}'", who),
            FallbackReason::ProbeFailed(e) => write!(f, "sudo probe failed: {}", e),
        }
    }
}

/// Outcome of the privilege step of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elevation {
    Elevated(ElevatedBy),
    Fallback(FallbackReason),
}

impl Elevation {
    pub fn is_elevated(&self) -> bool {
        matches!(self, Elevation::Elevated(_))
    }
}

/// Phases of establishing a shell, logged as the connector advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Connecting,
    EscalationProbe,
    Elevated,
    Unprivileged,
    ShellReady,
    Failed,
}

/// Settle delays between lines written to a fresh shell. There is no
/// acknowledgement from the remote prompt, so these are empirical waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellTiming {
    pub shell_settle: Duration,
    pub password_settle: Duration,
    pub confirm_settle: Duration,
    pub final_settle: Duration,
    pub unprivileged_settle: Duration,
}

impl Default for ShellTiming {
    fn default() -> Self {
        Self {
            shell_settle: Duration::from_millis(800),
            password_settle: Duration::from_millis(800),
            confirm_settle: Duration::from_millis(1500),
            final_settle: Duration::from_millis(300),
            unprivileged_settle: Duration::from_millis(500),
        }
    }
}
