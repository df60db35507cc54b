//! Mock event stream server for exercising the stream client.

use tender_stream_server::{serve, AppState, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tender_stream_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(
        "Starting server on {} (token {})",
        listener.local_addr()?,
        if config.token.is_some() { "required" } else { "not required" }
    );

    serve(listener, AppState::new(config)).await?;
    Ok(())
}
