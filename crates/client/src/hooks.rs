//! Dioxus integration.
//!
//! Components get the session handle plus a reactive copy of its snapshot, so
//! connection status, the last message and retry countdown re-render on their
//! own. The session is torn down when the component unmounts.

use dioxus::prelude::*;

use crate::config::ConfigError;
use crate::stream::{SessionSnapshot, StreamSession};

/// Session handle and its reactive snapshot.
#[derive(Clone)]
pub struct UseEventStream {
    pub session: StreamSession,
    pub snapshot: Signal<SessionSnapshot>,
}

/// Create a session once per component and mirror its state into a signal.
///
/// ```rust,ignore
/// let stream = use_event_stream(|| {
///     StreamSession::builder(StreamTarget::new(project_id, task_id))
///         .bearer_token(token)
///         .spawn(SseTransport::new())
/// })?;
/// let status = stream.snapshot.read().connection_state;
/// ```
pub fn use_event_stream(
    init: impl FnOnce() -> Result<StreamSession, ConfigError>,
) -> Result<UseEventStream, ConfigError> {
    let session = use_hook(init);
    let mut snapshot = use_signal(|| {
        session
            .as_ref()
            .map(StreamSession::snapshot)
            .unwrap_or_default()
    });

    let watched = session.clone();
    use_future(move || {
        let watched = watched.clone();
        async move {
            let Ok(session) = watched else {
                return;
            };
            let mut changes = session.watch();
            while changes.changed().await.is_ok() {
                let next = changes.borrow_and_update().clone();
                snapshot.set(next);
            }
        }
    });

    let owned = session.clone();
    use_drop(move || {
        if let Ok(session) = &owned {
            session.teardown();
        }
    });

    session.map(|session| UseEventStream { session, snapshot })
}
