pub mod ws;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::commands::catalog;
use crate::models::compose::RemotePaths;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/load-services", post(catalog::load_services))
        .route("/api/paths", get(remote_paths))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Default remote layout, for the page to show before a deployment.
async fn remote_paths(State(state): State<AppState>) -> Json<RemotePaths> {
    Json(RemotePaths::from_base(state.default_base()))
}

async fn health() -> &'static str {
    "ok"
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.listen;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_remote_paths_uses_configured_base() {
        let mut config = Config::default();
        config.remote_base_dir = "/vol1/".to_string();
        let state = AppState::new(config).unwrap();

        let Json(paths) = remote_paths(State(state)).await;
        assert_eq!(paths.base, "/vol1/naspt");
        assert_eq!(paths.compose, "/vol1/naspt/compose");
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "ok");
    }
}
