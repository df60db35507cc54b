//! Stream addressing and the mock server's publish wire types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Event type used for frames that do not name one (`onmessage` in browsers).
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Axum route pattern of the per-task event stream.
pub const EVENTS_ROUTE: &str = "/api/projects/{project_id}/tasks/{task_id}/events";

/// Logical identity of one event stream: a task inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTarget {
    pub project_id: String,
    pub task_id: String,
}

impl StreamTarget {
    pub fn new(project_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            task_id: task_id.into(),
        }
    }

    /// Unencoded path segments of the stream endpoint, in order.
    pub fn path_segments(&self) -> [&str; 6] {
        [
            "api",
            "projects",
            &self.project_id,
            "tasks",
            &self.task_id,
            "events",
        ]
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.task_id)
    }
}

/// Body of `POST` on the events route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// Event type; the frame is sent without an `event:` line when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Id assigned to the frame (sent as the SSE `id:` field).
    pub id: u64,
    /// Number of open streams the frame was handed to.
    pub receivers: usize,
}
