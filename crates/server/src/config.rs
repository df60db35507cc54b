//! Server configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

/// Mock stream server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Bearer token every `/api` request must carry. `None` disables the check.
    pub token: Option<String>,
    /// Interval of SSE keep-alive comments.
    pub keep_alive: Duration,
    /// Frames kept per stream for `Last-Event-ID` resumption.
    pub history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            token: None,
            keep_alive: Duration::from_secs(15),
            history: 64,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TENDER_STREAM_BIND`: listen address (default: "0.0.0.0:8080")
    /// - `TENDER_STREAM_TOKEN`: required bearer token (default: none)
    /// - `TENDER_STREAM_KEEP_ALIVE_SECS`: keep-alive interval (default: 15)
    /// - `TENDER_STREAM_HISTORY`: frames kept per stream (default: 64)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind = match std::env::var("TENDER_STREAM_BIND") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("TENDER_STREAM_BIND={value:?}"))?,
            Err(_) => defaults.bind,
        };
        let token = std::env::var("TENDER_STREAM_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let keep_alive = match std::env::var("TENDER_STREAM_KEEP_ALIVE_SECS") {
            Ok(value) => Duration::from_secs(
                value
                    .parse()
                    .with_context(|| format!("TENDER_STREAM_KEEP_ALIVE_SECS={value:?}"))?,
            ),
            Err(_) => defaults.keep_alive,
        };
        let history = match std::env::var("TENDER_STREAM_HISTORY") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("TENDER_STREAM_HISTORY={value:?}"))?,
            Err(_) => defaults.history,
        };

        Ok(Self {
            bind,
            token,
            keep_alive,
            history,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}
