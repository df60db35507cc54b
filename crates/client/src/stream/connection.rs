//! Owner of the single transport handle of a session.

use tender_stream_shared::TransportError;
use tokio::sync::mpsc::UnboundedSender;

use crate::transport::{
    OpenRequest, Readiness, Transport, TransportEvent, TransportHandle, TransportSink,
};

/// Opens and closes the transport handle. Never retries or classifies; it only
/// guarantees there is at most one live handle and tags each handle's events
/// with an epoch so events from replaced handles can be told apart.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    handle: Option<T::Handle>,
    epoch: u64,
    events: UnboundedSender<(u64, TransportEvent)>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, events: UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self {
            transport,
            handle: None,
            epoch: 0,
            events,
        }
    }

    /// Open a new handle unless the current one is connecting or open.
    /// Returns whether a handle was opened.
    pub fn connect(&mut self, request: OpenRequest) -> Result<bool, TransportError> {
        if matches!(self.readiness(), Some(Readiness::Connecting | Readiness::Open)) {
            return Ok(false);
        }

        self.disconnect();
        self.epoch += 1;
        let sink = TransportSink::new(self.epoch, self.events.clone());
        let handle = self.transport.open(request, sink)?;
        self.handle = Some(handle);
        Ok(true)
    }

    /// Close and drop the handle. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }

    pub fn readiness(&self) -> Option<Readiness> {
        self.handle.as_ref().map(TransportHandle::readiness)
    }

    pub fn is_connected(&self) -> bool {
        self.readiness() == Some(Readiness::Open)
    }

    pub fn is_connecting(&self) -> bool {
        self.readiness() == Some(Readiness::Connecting)
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn attach(&mut self, event_type: &str) {
        if let Some(handle) = &mut self.handle {
            handle.attach(event_type);
        }
    }

    pub fn detach(&mut self, event_type: &str) {
        if let Some(handle) = &mut self.handle {
            handle.detach(event_type);
        }
    }

    /// Whether an event tagged `epoch` came from the live handle.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.handle.is_some() && epoch == self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    use crate::transport::mock::MockTransport;

    fn request() -> OpenRequest {
        OpenRequest {
            url: "http://localhost/api/projects/p/tasks/t/events".parse().unwrap(),
            bearer_token: None,
            event_types: HashSet::from(["test".to_string()]),
        }
    }

    #[test]
    fn second_connect_while_connecting_is_a_no_op() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mock = MockTransport::new();
        let mut manager = ConnectionManager::new(mock.clone(), tx);

        assert_eq!(manager.connect(request()), Ok(true));
        assert!(manager.is_connecting());
        assert_eq!(manager.connect(request()), Ok(false));
        assert_eq!(mock.open_count(), 1);

        mock.accept(0);
        assert!(manager.is_connected());
        assert_eq!(manager.connect(request()), Ok(false));
        assert_eq!(mock.open_count(), 1);
    }

    #[test]
    fn reconnect_replaces_dead_handle_and_bumps_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mock = MockTransport::new();
        let mut manager = ConnectionManager::new(mock.clone(), tx);

        manager.connect(request()).unwrap();
        mock.fail(0);
        let (epoch, _) = rx.try_recv().unwrap();
        assert!(manager.is_current(epoch));

        assert_eq!(manager.connect(request()), Ok(true));
        assert_eq!(mock.open_count(), 2);
        assert!(!manager.is_current(epoch));
        assert!(manager.is_current(epoch + 1));
    }

    #[test]
    fn disconnect_closes_and_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mock = MockTransport::new();
        let mut manager = ConnectionManager::new(mock.clone(), tx);

        manager.connect(request()).unwrap();
        manager.disconnect();
        manager.disconnect();
        assert_eq!(mock.readiness(0), Readiness::Closed);
        assert_eq!(manager.readiness(), None);
        assert!(!manager.is_current(manager.epoch()));
    }

    #[test]
    fn attach_and_detach_reach_the_live_handle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mock = MockTransport::new();
        let mut manager = ConnectionManager::new(mock.clone(), tx);

        manager.attach("ignored");
        manager.connect(request()).unwrap();
        manager.attach("progress");
        manager.detach("test");
        assert_eq!(mock.attached(0), HashSet::from(["progress".to_string()]));
    }

    #[test]
    fn open_errors_leave_no_handle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mock = MockTransport::new();
        mock.fail_next_open(TransportError::InvalidUrl("bad".into()));
        let mut manager = ConnectionManager::new(mock.clone(), tx);

        assert!(manager.connect(request()).is_err());
        assert!(!manager.has_handle());
        assert_eq!(mock.open_count(), 0);
    }
}
