pub mod commands;
pub mod config;
pub mod executor;
pub mod models;
pub mod runtime;
pub mod server;
pub mod session;
pub mod ssh;
pub mod state;

pub use config::Config;
pub use state::AppState;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub async fn run(config: Config) -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "naspt_relay=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting naspt-relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Default remote base directory: {}", config.remote_base_dir);

    let state = AppState::new(config)?;
    server::serve(state).await
}
