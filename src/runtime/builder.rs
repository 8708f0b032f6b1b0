use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::models::compose::{ComposeAction, ComposeVariant, LOG_TAIL_LINES};
use crate::models::connection::PRIVILEGED_USER;

/// Sentinel printed by the compose detection command when the plugin form works.
pub const COMPOSE_PLUGIN_SENTINEL: &str = "new";
/// Sentinel printed when only the standalone binary can be assumed.
pub const COMPOSE_STANDALONE_SENTINEL: &str = "old";

/// Builder for the shell commands sent to the remote host
pub struct CommandBuilder;

impl CommandBuilder {
    // ========================================================================
    // Quoting
    // ========================================================================

    /// Shell-escape a path for safe use in commands.
    /// Wraps in single quotes, escaping any embedded single quotes.
    pub fn shell_escape(path: &str) -> String {
        format!("'{}'", path.replace('\'', "'\\''"))
    }

    /// Escape characters that keep their meaning inside double quotes
    /// (`\`, `"`, `$`, `` ` ``, `!`). Backslash goes first so later escapes
    /// are not doubled.
    pub fn escape_double_quoted(value: &str) -> String {
        value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$")
            .replace('`', "\\`")
            .replace('!', "\\!")
    }

    // ========================================================================
    // Identity / Escalation
    // ========================================================================

    /// Non-interactive sudo check: pipes the password to `sudo -S` and asks
    /// for the effective user.
    pub fn sudo_probe(password: &str) -> String {
        format!(
            "echo \"{}\" | sudo -S whoami",
            Self::escape_double_quoted(password)
        )
    }

    /// Line typed into the interactive shell to become the privileged user.
    pub fn escalate_shell() -> &'static str {
        "sudo -S -i\n"
    }

    /// Password answer for the interactive sudo prompt, escaped like `sudo_probe`.
    pub fn password_line(password: &str) -> String {
        format!("{}\n", Self::escape_double_quoted(password))
    }

    pub fn whoami() -> &'static str {
        "whoami\n"
    }

    /// Whether a probe's stdout names the privileged account.
    pub fn is_privileged_identity(stdout: &str) -> bool {
        stdout.trim() == PRIVILEGED_USER
    }

    // ========================================================================
    // File Transport
    // ========================================================================

    /// Create directories (and parents).
    pub fn create_directories(paths: &[&str]) -> String {
        let escaped: Vec<String> = paths.iter().map(|p| Self::shell_escape(p)).collect();
        format!("mkdir -p {}", escaped.join(" "))
    }

    /// Encode a text payload for transport through a shell command.
    pub fn encode_payload(content: &str) -> String {
        STANDARD.encode(content.as_bytes())
    }

    /// Write content to a file using base64 transport (safe for special chars).
    pub fn write_file_from_base64(path: &str, base64_content: &str) -> String {
        format!(
            "echo '{}' | base64 -d > {}",
            base64_content,
            Self::shell_escape(path)
        )
    }

    // ========================================================================
    // Compose Commands
    // ========================================================================

    /// Prints `new` when `docker compose` works, `old` otherwise.
    pub fn detect_compose() -> String {
        format!(
            "docker compose version > /dev/null 2>&1 && echo \"{}\" || echo \"{}\"",
            COMPOSE_PLUGIN_SENTINEL, COMPOSE_STANDALONE_SENTINEL
        )
    }

    /// Map the detection output to a compose form. `None` when the output is
    /// neither sentinel.
    pub fn parse_compose_variant(stdout: &str) -> Option<ComposeVariant> {
        match stdout.trim() {
            COMPOSE_PLUGIN_SENTINEL => Some(ComposeVariant::Plugin),
            COMPOSE_STANDALONE_SENTINEL => Some(ComposeVariant::Standalone),
            _ => None,
        }
    }

    /// Build the lifecycle command typed into the interactive shell, newline included.
    pub fn compose_action(variant: ComposeVariant, action: ComposeAction, work_dir: &str) -> String {
        let compose = variant.binary();
        let dir = Self::shell_escape(work_dir);
        match action {
            ComposeAction::Up => format!("cd {} && {} up -d\n", dir, compose),
            ComposeAction::Down => format!("cd {} && {} down\n", dir, compose),
            ComposeAction::Logs => {
                format!("cd {} && {} logs --tail={}\n", dir, compose, LOG_TAIL_LINES)
            }
        }
    }
}
