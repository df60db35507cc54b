//! Event stream routes: follow, publish and close a task's stream.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use tender_stream_shared::{ProblemDetails, PublishRequest, PublishResponse, StreamTarget};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::ApiProblem;
use crate::hub::{Frame, HubEvent};
use crate::middleware::bearer::Authorized;
use crate::state::AppState;

const LAST_EVENT_ID: &str = "last-event-id";

fn to_event(frame: &Frame) -> Event {
    let event = Event::default().id(frame.id.to_string()).data(&frame.data);
    match &frame.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Follow a task's event stream
pub async fn stream_events(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(String, String)>,
    _auth: Authorized,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let target = StreamTarget::new(project_id, task_id);
    let after = headers
        .get(LAST_EVENT_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    let conn_id = Uuid::new_v4();
    let (backlog, rx) = state.hub.subscribe(&target, after).await;
    tracing::info!(
        "stream {target} opened ({conn_id}), resuming after {after:?}, {} to replay",
        backlog.len()
    );

    let replay = stream::iter(backlog.into_iter().map(|frame| Ok(to_event(&frame))));
    let live = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(HubEvent::Frame(frame)) => return Some((Ok(to_event(&frame)), rx)),
                Ok(HubEvent::Close) | Err(RecvError::Closed) => {
                    tracing::info!("stream ({conn_id}) closed by server");
                    return None;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("stream ({conn_id}) lagged, {skipped} frames skipped");
                }
            }
        }
    });

    Sse::new(replay.chain(live)).keep_alive(KeepAlive::new().interval(state.config.keep_alive))
}

fn valid_event_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['\n', '\r'])
}

/// Publish a frame to a task's stream
pub async fn publish_event(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(String, String)>,
    _auth: Authorized,
    Json(payload): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiProblem> {
    if let Some(name) = &payload.event {
        if !valid_event_name(name) {
            return Err(ApiProblem(ProblemDetails::bad_request(
                "event name must be non-empty and single-line",
            )));
        }
    }

    let target = StreamTarget::new(project_id, task_id);
    let response = state.hub.publish(&target, payload.event, payload.data).await;
    tracing::debug!(
        "published #{} to {target} ({} receivers)",
        response.id,
        response.receivers
    );
    Ok(Json(response))
}

/// Close every open stream of a task
pub async fn close_stream(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(String, String)>,
    _auth: Authorized,
) -> Result<StatusCode, ApiProblem> {
    let target = StreamTarget::new(project_id, task_id);
    if state.hub.close(&target).await {
        tracing::info!("closed stream {target}");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiProblem(
            ProblemDetails::not_found(format!("no open stream for {target}"))
                .with_instance(format!("/{}", target.path_segments().join("/"))),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_must_be_single_line() {
        assert!(valid_event_name("bid.updated"));
        assert!(!valid_event_name(""));
        assert!(!valid_event_name("a\nb"));
        assert!(!valid_event_name("a\rb"));
    }
}
