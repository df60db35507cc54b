//! Application state shared across request handlers.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::hub::StreamHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<StreamHub>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            hub: Arc::new(StreamHub::new(config.history)),
            config: Arc::new(config),
        }
    }
}
