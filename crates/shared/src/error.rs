//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};

/// RFC7807 Problem Details (application/problem+json)
///
/// The mock server answers every failed `/api/*` request with this envelope and
/// the stream transport decodes it so a rejected stream surfaces a readable
/// reason instead of a bare status code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// A URI reference that identifies the specific occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    fn new(slug: &str, title: &str, status: u16, detail: String) -> Self {
        Self {
            type_url: format!("https://tender-stream.dev/problems/{slug}"),
            title: title.to_string(),
            status,
            detail: Some(detail),
            instance: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new("bad-request", "Bad Request", 400, detail.into())
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("unauthorized", "Unauthorized", 401, detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", "Not Found", 404, detail.into())
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// Failure reported by a stream transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("stream closed by server")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_detail_prefers_detail_over_title() {
        let body = serde_json::to_string(&ProblemDetails::not_found("no such task")).unwrap();
        assert_eq!(try_problem_detail(&body).as_deref(), Some("no such task"));
    }

    #[test]
    fn problem_detail_falls_back_to_title() {
        let body = r#"{"type":"about:blank","title":"Unauthorized","status":401,"detail":"  "}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn problem_detail_ignores_other_bodies() {
        assert_eq!(try_problem_detail("upstream timeout"), None);
    }

    #[test]
    fn transport_error_messages() {
        let err = TransportError::Status {
            status: 401,
            detail: "missing bearer token".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 401: missing bearer token");
        assert_eq!(TransportError::Closed.to_string(), "stream closed by server");
    }
}
