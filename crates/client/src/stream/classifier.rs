//! Turns transport failures into classified [`StreamError`]s.
//!
//! Transport errors rarely carry a structured reason, so the kind is derived
//! from where the handle was in its lifecycle when it failed.

use tender_stream_shared::{ErrorKind, StreamError, TransportError};

use crate::transport::Readiness;

/// Kind and default retryability for a failure seen at `readiness`.
pub fn classify(readiness: Option<Readiness>) -> (ErrorKind, bool) {
    match readiness {
        Some(Readiness::Connecting) => (ErrorKind::ConnectionLost, true),
        Some(Readiness::Closed) => (ErrorKind::ConnectionClosed, true),
        Some(Readiness::Open) => (ErrorKind::NetworkError, true),
        None => (ErrorKind::UnknownError, false),
    }
}

pub fn classify_failure(error: TransportError, readiness: Option<Readiness>) -> StreamError {
    let (kind, retryable) = classify(readiness);
    let message = match kind {
        ErrorKind::ConnectionLost => format!("connection lost while connecting: {error}"),
        ErrorKind::ConnectionClosed => format!("connection closed: {error}"),
        ErrorKind::NetworkError => format!("network error on open stream: {error}"),
        _ => format!("stream failed: {error}"),
    };
    StreamError::new(kind, message, retryable).with_cause(error)
}

/// Error for a connection that could not even be attempted. A malformed URL
/// is final; other open failures are left to the retry policy.
pub fn connection_failed(error: TransportError) -> StreamError {
    let kind = ErrorKind::ConnectionFailed;
    let retryable =
        kind.is_retryable_by_default() && !matches!(error, TransportError::InvalidUrl(_));
    StreamError::new(kind, format!("could not open stream: {error}"), retryable)
        .with_cause(error)
}
