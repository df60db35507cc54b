//! Transport boundary.
//!
//! A [`Transport`] opens the underlying streaming connection; each open call
//! yields a [`TransportHandle`] that the session closes and queries for
//! readiness. Everything the handle observes (open, failure, frames) is pushed
//! back through the [`TransportSink`] it was given, tagged with the epoch of
//! the handle so the session can ignore events from handles it has replaced.

use std::collections::HashSet;

use tender_stream_shared::TransportError;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

mod decoder;
#[cfg(test)]
pub(crate) mod mock;
mod sse;

pub use decoder::{SseDecoder, SseFrame};
pub use sse::{SseHandle, SseTransport};

/// Readiness of a transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Opened but not yet confirmed by the server.
    Connecting,
    Open,
    Closed,
}

/// Something a transport handle observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// The handle failed. `readiness` is its state at the time of the failure,
    /// `None` when the transport cannot tell.
    Failed {
        error: TransportError,
        readiness: Option<Readiness>,
    },
    Frame {
        event_type: String,
        payload: String,
        id: Option<String>,
    },
}

/// Everything needed to open one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub url: Url,
    pub bearer_token: Option<String>,
    /// Event types with listeners at open time; frames of other types may be
    /// dropped by the transport until [`TransportHandle::attach`] is called.
    pub event_types: HashSet<String>,
}

/// Epoch-tagged channel from a transport handle back to its session.
#[derive(Debug, Clone)]
pub struct TransportSink {
    epoch: u64,
    tx: UnboundedSender<(u64, TransportEvent)>,
}

impl TransportSink {
    pub(crate) fn new(epoch: u64, tx: UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns `false` once the session is gone; transports should stop then.
    pub fn opened(&self) -> bool {
        self.send(TransportEvent::Opened)
    }

    pub fn failed(&self, error: TransportError, readiness: Option<Readiness>) -> bool {
        self.send(TransportEvent::Failed { error, readiness })
    }

    pub fn frame(&self, event_type: String, payload: String, id: Option<String>) -> bool {
        self.send(TransportEvent::Frame {
            event_type,
            payload,
            id,
        })
    }

    fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

/// Opens stream connections.
pub trait Transport: Send + 'static {
    type Handle: TransportHandle;

    /// Start opening a stream. Must not block: the outcome is reported through
    /// `sink`. An `Err` means the connection could not even be attempted.
    fn open(
        &mut self,
        request: OpenRequest,
        sink: TransportSink,
    ) -> Result<Self::Handle, TransportError>;
}

/// One open (or opening) stream.
pub trait TransportHandle: Send + 'static {
    fn readiness(&self) -> Readiness;

    /// Start forwarding frames of `event_type`.
    fn attach(&mut self, event_type: &str);

    /// Stop forwarding frames of `event_type`.
    fn detach(&mut self, event_type: &str);

    /// Close the stream. Idempotent.
    fn close(&mut self);
}
