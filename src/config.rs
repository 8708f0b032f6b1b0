use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::models::compose::DEFAULT_BASE_DIR;
use crate::models::connection::ShellTiming;
use crate::session::RelaySettings;
use crate::ssh::connector::{ConnectorSettings, PROBE_TIMEOUT};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "naspt-relay",
    version,
    about = "Browser-driven SSH shell and docker compose deployment relay"
)]
pub struct Config {
    /// Address the HTTP/websocket server binds to
    #[arg(long, default_value = "0.0.0.0:15432", env = "NASPT_LISTEN")]
    pub listen: SocketAddr,

    /// Remote directory under which the `naspt` tree is created
    #[arg(long, default_value = DEFAULT_BASE_DIR, env = "NASPT_REMOTE_BASE_DIR")]
    pub remote_base_dir: String,

    /// Timeout for TCP connect and for each authentication attempt
    #[arg(long, default_value_t = 10, env = "NASPT_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: u64,

    /// How often a relay loop re-checks that its session is still active
    #[arg(long, default_value_t = 50, env = "NASPT_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    /// Largest chunk of shell output forwarded in one event
    #[arg(long, default_value_t = 4096, env = "NASPT_READ_CHUNK_SIZE")]
    pub read_chunk_size: usize,

    /// Wait after the shell opens, before `sudo -S -i`
    #[arg(long, default_value_t = 800, env = "NASPT_SHELL_SETTLE_MS")]
    pub shell_settle_ms: u64,

    /// Wait after `sudo -S -i`, before the password line
    #[arg(long, default_value_t = 800, env = "NASPT_PASSWORD_SETTLE_MS")]
    pub password_settle_ms: u64,

    /// Wait after the password line, before `whoami`
    #[arg(long, default_value_t = 1500, env = "NASPT_CONFIRM_SETTLE_MS")]
    pub confirm_settle_ms: u64,

    /// Wait after the final `whoami`
    #[arg(long, default_value_t = 300, env = "NASPT_FINAL_SETTLE_MS")]
    pub final_settle_ms: u64,

    /// Wait before `whoami` in a shell that is not escalated
    #[arg(long, default_value_t = 500, env = "NASPT_UNPRIVILEGED_SETTLE_MS")]
    pub unprivileged_settle_ms: u64,
}

impl Config {
    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            probe_timeout: PROBE_TIMEOUT,
            timing: ShellTiming {
                shell_settle: Duration::from_millis(self.shell_settle_ms),
                password_settle: Duration::from_millis(self.password_settle_ms),
                confirm_settle: Duration::from_millis(self.confirm_settle_ms),
                final_settle: Duration::from_millis(self.final_settle_ms),
                unprivileged_settle: Duration::from_millis(self.unprivileged_settle_ms),
            },
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            // a zero period would make the interval panic
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            chunk_size: self.read_chunk_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["naspt-relay"])
    }
}
