//! Tender Stream Client
//!
//! Resilient client for the per-task event streams of the tender server:
//! Server-Sent Events with failure classification, exponential-backoff
//! reconnects and isolated fan-out to subscribers.

pub mod auth;
pub mod config;
pub mod endpoint;
#[cfg(feature = "dioxus")]
pub mod hooks;
pub mod logging;
pub mod stream;
pub mod transport;

pub use auth::{StaticToken, TokenSource};
pub use config::{resolve, ConfigError, RetryPolicy, StreamOptions, StreamOverrides};
pub use endpoint::StreamEndpoint;
pub use stream::{SessionBuilder, SessionSnapshot, StreamSession, SubscriptionHandle};
pub use transport::{SseTransport, Transport, TransportHandle};

pub use tender_stream_shared::{
    ConnectionState, ErrorKind, StreamError, StreamMessage, StreamTarget, TransportError,
};
