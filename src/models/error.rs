use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RelayError {
    #[error("Connection failed to {0}: {1}")]
    ConnectionFailed(String, String),

    #[error("SSH authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("Privilege escalation failed: {0}")]
    EscalationFailure(String),

    #[error("SSH channel closed: {0}")]
    ChannelClosed(String),

    #[error("SSH not connected: {0}")]
    NotConnected(String),

    #[error("Failed to write {path}: {stderr}")]
    WriteError { path: String, stderr: String },

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Command timed out after {timeout_ms}ms: {command}")]
    CommandTimeout { command: String, timeout_ms: u128 },

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Errors raised while establishing the SSH transport.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            RelayError::ConnectionFailed(_, _)
                | RelayError::AuthenticationFailed(_)
                | RelayError::NetworkTimeout(_)
        )
    }

    /// Check if this error can be retried by the operator
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::NetworkTimeout(_)
                | RelayError::ConnectionFailed(_, _)
                | RelayError::CommandTimeout { .. }
        )
    }

    /// Get a suggestion for recovering from this error
    pub fn recovery_suggestion(&self) -> &str {
        match self {
            RelayError::ConnectionFailed(_, _) => "Check the host address and port",
            RelayError::AuthenticationFailed(_) => "Verify the username and password",
            RelayError::NetworkTimeout(_) => "Check network connection and firewall settings",
            RelayError::EscalationFailure(_) => "Continue as the login user or fix sudo access",
            RelayError::ChannelClosed(_) => "Reconnect to the host",
            RelayError::NotConnected(_) => "Connect to the host first",
            RelayError::WriteError { .. } => "Check that the target directory is writable",
            RelayError::ValidationError(_) => "Fix the request and submit it again",
            RelayError::CommandTimeout { .. } => "The remote host is slow to respond, try again",
            RelayError::Upstream(_) => "Check that the URL is reachable from the server",
            RelayError::Internal(_) => "Restart the service and try again",
        }
    }
}
