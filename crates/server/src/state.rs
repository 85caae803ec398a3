use crate::config::ServerConfig;
use crate::error::ServerResult;
use lexrag::{App, AppConfig};
use std::time::Instant;

/// Shared application state: one core instance per process.
pub struct ServerState {
    pub config: ServerConfig,
    pub app: App,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(config: ServerConfig, app_config: AppConfig) -> ServerResult<Self> {
        let app = App::open(app_config)?;
        Ok(Self {
            config,
            app,
            started_at: Instant::now(),
        })
    }
}
