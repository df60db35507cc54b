//! Mock event stream server.
//!
//! Serves `text/event-stream` responses on the per-task events route and
//! lets tests publish frames into them, close them, and require a bearer
//! token.

use axum::{routing::get, Router};
use tender_stream_shared::EVENTS_ROUTE;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod hub;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            EVENTS_ROUTE,
            get(routes::events::stream_events)
                .post(routes::events::publish_event)
                .delete(routes::events::close_stream),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve on an already bound listener until the process ends.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
