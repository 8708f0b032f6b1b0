use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::models::error::RelayError;
use crate::session::SessionRegistry;

/// Timeout for catalog fetches made on behalf of the page.
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared by every websocket connection and HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(CATALOG_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            registry: SessionRegistry::new(),
            config: Arc::new(config),
            http,
        })
    }

    pub fn default_base(&self) -> &str {
        &self.config.remote_base_dir
    }
}
