//! Where a session's event stream lives.

use tender_stream_shared::{StreamTarget, TransportError};
use url::Url;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Base URL of the stream server. Stream URLs are derived per target.
///
/// The base is only parsed when a URL is needed, so a malformed base shows up
/// as a connection failure of the session rather than a panic at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    base_url: String,
}

impl Default for StreamEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl StreamEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/api/projects/{project}/tasks/{task}/events`, segments
    /// percent-encoded. A path on the base URL is kept as a prefix.
    pub fn url_for(&self, target: &StreamTarget) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", self.base_url)))?;

        if target.project_id.is_empty() || target.task_id.is_empty() {
            return Err(TransportError::InvalidUrl(format!(
                "empty project or task id in stream target {target:?}"
            )));
        }

        url.path_segments_mut()
            .map_err(|()| {
                TransportError::InvalidUrl(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(target.path_segments());
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stream_url() {
        let endpoint = StreamEndpoint::new("https://api.example.com");
        let url = endpoint.url_for(&StreamTarget::new("p1", "t1")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/projects/p1/tasks/t1/events"
        );
    }

    #[test]
    fn keeps_base_path_and_encodes_segments() {
        let endpoint = StreamEndpoint::new("http://localhost:8080/tenders/");
        let url = endpoint
            .url_for(&StreamTarget::new("a b", "x/y"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/tenders/api/projects/a%20b/tasks/x%2Fy/events"
        );
    }

    #[test]
    fn malformed_base_is_an_invalid_url() {
        let err = StreamEndpoint::new("not a url")
            .url_for(&StreamTarget::new("p", "t"))
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));

        let err = StreamEndpoint::new("mailto:ops@example.com")
            .url_for(&StreamTarget::new("p", "t"))
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert!(StreamEndpoint::default()
            .url_for(&StreamTarget::new("", "t"))
            .is_err());
    }
}
