//! tender-stream-tail - follow the event stream of one task.
//!
//! ```text
//! tender-stream-tail <project-id> <task-id> [event-type ...]
//! ```
//!
//! Prints every frame of the given event types (`message` when none are given)
//! until interrupted. `TENDER_STREAM_URL` sets the server base URL,
//! `TENDER_STREAM_TOKEN` a bearer token, and the `TENDER_STREAM_*` session
//! variables tune reconnects.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tender_stream_client::endpoint::DEFAULT_BASE_URL;
use tender_stream_client::logging::init_tracing;
use tender_stream_client::{
    ConnectionState, SessionSnapshot, SseTransport, StreamEndpoint, StreamMessage,
    StreamOverrides, StreamSession, StreamTarget,
};
use tender_stream_shared::DEFAULT_EVENT_TYPE;

const USAGE: &str = "usage: tender-stream-tail <project-id> <task-id> [event-type ...]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("tender_stream_client=info");

    let mut args = std::env::args().skip(1);
    let (Some(project_id), Some(task_id)) = (args.next(), args.next()) else {
        anyhow::bail!(USAGE);
    };
    let mut event_types: Vec<String> = args.collect();
    if event_types.is_empty() {
        event_types.push(DEFAULT_EVENT_TYPE.to_string());
    }

    let base_url =
        std::env::var("TENDER_STREAM_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let overrides = StreamOverrides::from_env().context("reading TENDER_STREAM_* settings")?;

    let mut builder = StreamSession::builder(StreamTarget::new(project_id, task_id))
        .endpoint(StreamEndpoint::new(base_url))
        .overrides(overrides);
    if let Ok(token) = std::env::var("TENDER_STREAM_TOKEN") {
        builder = builder.bearer_token(token);
    }
    let transport = SseTransport::with_connect_timeout(Duration::from_secs(10))?;
    let session = builder.spawn(transport)?;

    for event_type in event_types {
        session.subscribe(event_type, |message| {
            print_message(message);
            Ok(())
        });
    }

    let result = follow(&session).await;
    session.teardown();
    result
}

fn print_message(message: &StreamMessage) {
    let time = Utc::now().format("%H:%M:%S%.3f");
    match &message.id {
        Some(id) => println!("{time} {} #{id} {}", message.event_type, message.payload),
        None => println!("{time} {} {}", message.event_type, message.payload),
    }
}

/// Report status changes until Ctrl-C or until the session gives up.
async fn follow(session: &StreamSession) -> anyhow::Result<()> {
    let mut changes = session.watch();
    let mut last = SessionSnapshot::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = changes.borrow_and_update().clone();
                report(&last, &snapshot);

                if snapshot.connection_state == ConnectionState::Error && !snapshot.is_retrying() {
                    if let Some(error) = &snapshot.last_error {
                        anyhow::bail!("giving up on {}: {error}", session.target());
                    }
                }
                last = snapshot;
            }
        }
    }
}

fn report(previous: &SessionSnapshot, current: &SessionSnapshot) {
    if previous.connection_state != current.connection_state {
        eprintln!("-- {}", current.connection_state);
    }
    if current.last_error != previous.last_error {
        if let Some(error) = &current.last_error {
            eprintln!("-- {error}");
        }
    }
    if current.is_retrying() && current.retry_attempt() != previous.retry_attempt() {
        eprintln!(
            "-- reconnecting in {}s (attempt {})",
            current.next_retry_in().as_secs(),
            current.retry_attempt()
        );
    }
}
