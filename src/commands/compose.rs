use std::time::Duration;

use crate::executor::CommandExecutor;
use crate::models::compose::{ComposeAction, ComposeVariant, RemotePaths};
use crate::models::error::RelayError;
use crate::models::event::{notify, DeployRequest, EventSender, ServerEvent};
use crate::runtime::CommandBuilder;
use crate::session::{Session, SessionRegistry};

const MKDIR_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// stderr that a payload write may produce without the write having failed
const IGNORABLE_WRITE_ERROR: &str = "No such file";

/// Handle `deploy_compose`: always answers with exactly one `compose_result`.
pub async fn deploy_compose(
    registry: &SessionRegistry,
    session_id: &str,
    request: DeployRequest,
    default_base: &str,
    events: &EventSender,
) {
    let result = match registry.get(session_id) {
        Some(session) => deploy(&session, &request, default_base).await,
        None => Err(RelayError::NotConnected(session_id.to_string())),
    };

    let event = match result {
        Ok(message) => ServerEvent::ComposeResult {
            success: true,
            message: message.to_string(),
        },
        Err(e) => {
            tracing::warn!("Deployment for session {} failed: {}", session_id, e);
            ServerEvent::ComposeResult {
                success: false,
                message: e.to_string(),
            }
        }
    };
    notify(events, event).await;
}

/// Write the compose project to the remote host and dispatch the lifecycle
/// command through the interactive shell. Returns the acknowledgement text.
pub async fn deploy(
    session: &Session,
    request: &DeployRequest,
    default_base: &str,
) -> Result<&'static str, RelayError> {
    if request.compose.trim().is_empty() {
        return Err(RelayError::ValidationError(
            "docker-compose.yml content must not be empty".to_string(),
        ));
    }
    let action = ComposeAction::parse(request.action.as_deref().unwrap_or_default())?;

    let paths = RemotePaths::resolve(request.docker_path.as_deref(), default_base);
    let executor = session.transport.as_ref();
    tracing::info!("Deploying compose project to {} ({:?})", paths.compose, action);

    let mkdir = CommandBuilder::create_directories(&[&paths.base, &paths.compose]);
    let created = executor.execute_with_timeout(&mkdir, MKDIR_TIMEOUT).await?;
    if !created.success() {
        // the payload write below reports the real failure
        tracing::warn!(
            "Creating {} exited {}: {}",
            paths.compose,
            created.exit_code,
            created.combined_output().trim()
        );
    }

    write_payload(executor, &paths.compose_file(), &request.compose).await?;
    if !request.env.trim().is_empty() {
        write_payload(executor, &paths.env_file(), &request.env).await?;
    }

    let variant = detect_compose(executor).await?;
    let command = CommandBuilder::compose_action(variant, action, &paths.compose);
    session.send(command).await?;

    Ok(action.dispatched_message())
}

/// Transfer `content` into `path` as base64 so no character reaches the shell unquoted.
async fn write_payload(
    executor: &dyn CommandExecutor,
    path: &str,
    content: &str,
) -> Result<(), RelayError> {
    let encoded = CommandBuilder::encode_payload(content);
    let command = CommandBuilder::write_file_from_base64(path, &encoded);
    tracing::debug!("Writing {} ({} bytes encoded)", path, encoded.len());

    let output = executor.execute_with_timeout(&command, WRITE_TIMEOUT).await?;
    let stderr = output.stderr.trim();
    if !stderr.is_empty() && !stderr.contains(IGNORABLE_WRITE_ERROR) {
        return Err(RelayError::WriteError {
            path: path.to_string(),
            stderr: stderr.to_string(),
        });
    }
    Ok(())
}

async fn detect_compose(executor: &dyn CommandExecutor) -> Result<ComposeVariant, RelayError> {
    let output = executor
        .execute_with_timeout(&CommandBuilder::detect_compose(), DETECT_TIMEOUT)
        .await?;
    match CommandBuilder::parse_compose_variant(&output.stdout) {
        Some(variant) => Ok(variant),
        None => {
            tracing::warn!(
                "Unexpected compose detection output {:?}, assuming {}",
                output.stdout.trim(),
                ComposeVariant::Standalone.binary()
            );
            Ok(ComposeVariant::Standalone)
        }
    }
}
