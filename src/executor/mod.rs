use async_trait::async_trait;
use std::time::Duration;

use crate::models::error::RelayError;

/// Result of executing a command out-of-band (not through the PTY)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Non-interactive command execution on the remote host.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command and wait for it to finish
    async fn execute(&self, command: &str) -> Result<CommandResult, RelayError>;

    /// Execute a command, giving up after `timeout`
    async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, RelayError> {
        match tokio::time::timeout(timeout, self.execute(command)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::CommandTimeout {
                command: redact_payload(command),
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    /// Close the underlying transport
    async fn disconnect(&self);
}

/// Shorten commands that embed base64 payloads or passwords before they reach
/// logs or error messages.
pub fn redact_payload(command: &str) -> String {
    if command.contains("base64 -d") || command.contains("sudo -S") {
        let head: String = command.split_whitespace().next().unwrap_or_default().to_string();
        format!("{} ... ({} bytes)", head, command.len())
    } else {
        command.to_string()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scripted executor: answers commands in order and records what it saw.
    #[derive(Default)]
    pub struct FakeExecutor {
        responses: Mutex<VecDeque<Result<CommandResult, RelayError>>>,
        pub commands: Mutex<Vec<String>>,
        pub disconnected: AtomicBool,
    }

    impl FakeExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_stdout(&self, stdout: &str) -> &Self {
            self.responses.lock().push_back(Ok(CommandResult {
                stdout: stdout.to_string(),
                ..Default::default()
            }));
            self
        }

        pub fn push_stderr(&self, stderr: &str) -> &Self {
            self.responses.lock().push_back(Ok(CommandResult {
                stderr: stderr.to_string(),
                exit_code: 1,
                ..Default::default()
            }));
            self
        }

        pub fn push_error(&self, err: RelayError) -> &Self {
            self.responses.lock().push_back(Err(err));
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().clone()
        }

        pub fn is_disconnected(&self) -> bool {
            self.disconnected.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn execute(&self, command: &str) -> Result<CommandResult, RelayError> {
            self.commands.lock().push(command.to_string());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandResult::default()))
        }

        async fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_success() {
        let result = CommandResult {
            stdout: "output".to_string(),
            stderr: "".to_string(),
            exit_code: 0,
            execution_time_ms: 100,
        };
        assert!(result.success());
        assert_eq!(result.combined_output(), "output");
    }

    #[test]
    fn test_command_result_failure() {
        let result = CommandResult {
            stdout: "partial".to_string(),
            stderr: "error".to_string(),
            exit_code: 1,
            execution_time_ms: 100,
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "partial\nerror");
    }

    #[test]
    fn test_redact_payload_hides_secrets() {
        let redacted = redact_payload("echo \"hunter2\" | sudo -S whoami");
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.starts_with("echo"));

        assert_eq!(redact_payload("mkdir -p '/a'"), "mkdir -p '/a'");
    }

    struct Sleepy;

    #[async_trait]
    impl CommandExecutor for Sleepy {
        async fn execute(&self, _command: &str) -> Result<CommandResult, RelayError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CommandResult::default())
        }

        async fn disconnect(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_timeout_expires() {
        let err = Sleepy
            .execute_with_timeout("docker compose version", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::CommandTimeout { timeout_ms: 5000, .. }));
    }
}
