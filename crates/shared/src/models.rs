//! Data model of a live event stream: connection state, failures and messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::TransportError;

/// Connection state of a stream session as seen by callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Classification of a stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The connection could not be set up at all (e.g. malformed stream URL).
    ConnectionFailed,
    /// Failure while the transport was still connecting.
    ConnectionLost,
    /// Failure reported by an already-closed transport.
    ConnectionClosed,
    /// Failure on an otherwise open transport.
    NetworkError,
    /// No context was available to classify the failure.
    UnknownError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::ConnectionFailed,
        ErrorKind::ConnectionLost,
        ErrorKind::ConnectionClosed,
        ErrorKind::NetworkError,
        ErrorKind::UnknownError,
    ];

    /// Whether reconnecting is worth attempting for this kind unless a policy
    /// says otherwise. `UnknownError` is the only kind that is not.
    pub fn is_retryable_by_default(&self) -> bool {
        !matches!(self, ErrorKind::UnknownError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConnectionFailed => "CONNECTION_FAILED",
            ErrorKind::ConnectionLost => "CONNECTION_LOST",
            ErrorKind::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(s)
    }
}

/// A classified stream failure. Created once per failure and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct StreamError {
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
    /// Transport failure this error was derived from, if any.
    #[serde(skip)]
    pub cause: Option<TransportError>,
}

impl StreamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            retryable,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: TransportError) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// One inbound frame of the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMessage {
    pub event_type: String,
    pub payload: String,
    /// Server-assigned event id, when the frame carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StreamMessage {
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            id: None,
        }
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}
