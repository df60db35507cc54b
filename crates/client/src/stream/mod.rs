//! Resilient event-stream sessions.
//!
//! A [`StreamSession`] keeps one server-pushed stream alive: it opens the
//! transport, classifies failures, reconnects with exponential backoff and fans
//! frames out to subscribers. All state lives in one task per session; the
//! handle only sends commands to it and reads the published [`SessionSnapshot`].
//!
//! ```no_run
//! use tender_stream_client::{SseTransport, StreamSession};
//! use tender_stream_shared::StreamTarget;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let session = StreamSession::builder(StreamTarget::new("p-1", "t-9"))
//!     .bearer_token("secret")
//!     .spawn(SseTransport::new())?;
//!
//! let handle = session.subscribe("bid.updated", |msg| {
//!     println!("{}", msg.payload);
//!     Ok(())
//! });
//! // ...
//! session.unsubscribe(&handle);
//! session.teardown();
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod connection;
pub mod machine;
pub mod registry;
pub mod retry;
mod session;

pub use connection::ConnectionManager;
pub use machine::SessionSnapshot;
pub use registry::{Listener, SubscriptionHandle, SubscriptionRegistry, Topic};
pub use retry::{delay_for_attempt, RetryScheduler, RetryState};
pub use session::{SessionBuilder, StreamSession};
