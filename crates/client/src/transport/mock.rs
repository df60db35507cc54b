//! Scriptable in-memory transport for session tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tender_stream_shared::TransportError;

use super::{OpenRequest, Readiness, Transport, TransportHandle, TransportSink};

#[derive(Debug)]
struct Connection {
    request: OpenRequest,
    sink: TransportSink,
    readiness: Readiness,
    attached: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    connections: Vec<Connection>,
    fail_next_open: Option<TransportError>,
}

/// Records every open; tests drive the returned connections by index.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn open_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub(crate) fn fail_next_open(&self, error: TransportError) {
        self.lock().fail_next_open = Some(error);
    }

    pub(crate) fn request(&self, index: usize) -> OpenRequest {
        self.lock().connections[index].request.clone()
    }

    pub(crate) fn readiness(&self, index: usize) -> Readiness {
        self.lock().connections[index].readiness
    }

    pub(crate) fn attached(&self, index: usize) -> HashSet<String> {
        self.lock().connections[index].attached.clone()
    }

    /// Index of the most recent connection.
    pub(crate) fn last(&self) -> usize {
        self.open_count() - 1
    }

    /// Server accepted the stream.
    pub(crate) fn accept(&self, index: usize) {
        let mut state = self.lock();
        let conn = &mut state.connections[index];
        conn.readiness = Readiness::Open;
        conn.sink.opened();
    }

    /// Report a failure with the connection's current readiness, then close it.
    pub(crate) fn fail(&self, index: usize) {
        let mut state = self.lock();
        let conn = &mut state.connections[index];
        let readiness = conn.readiness;
        conn.readiness = Readiness::Closed;
        conn.sink
            .failed(TransportError::Stream("mock failure".into()), Some(readiness));
    }

    /// Report a failure on an open connection that keeps streaming.
    pub(crate) fn fail_keep_open(&self, index: usize) {
        let state = self.lock();
        let conn = &state.connections[index];
        conn.sink.failed(
            TransportError::Stream("mock hiccup".into()),
            Some(Readiness::Open),
        );
    }

    /// Report a failure without readiness information.
    pub(crate) fn fail_unclassified(&self, index: usize) {
        let mut state = self.lock();
        let conn = &mut state.connections[index];
        conn.readiness = Readiness::Closed;
        conn.sink
            .failed(TransportError::Stream("mock failure".into()), None);
    }

    /// Deliver a frame if its event type is attached, like a real transport.
    pub(crate) fn emit(&self, index: usize, event_type: &str, payload: &str) {
        let state = self.lock();
        let conn = &state.connections[index];
        if conn.readiness == Readiness::Open && conn.attached.contains(event_type) {
            conn.sink
                .frame(event_type.to_string(), payload.to_string(), None);
        }
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn open(
        &mut self,
        request: OpenRequest,
        sink: TransportSink,
    ) -> Result<MockHandle, TransportError> {
        let mut state = self.lock();
        if let Some(error) = state.fail_next_open.take() {
            return Err(error);
        }
        let index = state.connections.len();
        state.connections.push(Connection {
            attached: request.event_types.clone(),
            request,
            sink,
            readiness: Readiness::Connecting,
        });
        Ok(MockHandle {
            state: Arc::clone(&self.state),
            index,
        })
    }
}

#[derive(Debug)]
pub(crate) struct MockHandle {
    state: Arc<Mutex<State>>,
    index: usize,
}

impl MockHandle {
    fn with<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state.connections[self.index])
    }
}

impl TransportHandle for MockHandle {
    fn readiness(&self) -> Readiness {
        self.with(|conn| conn.readiness)
    }

    fn attach(&mut self, event_type: &str) {
        self.with(|conn| conn.attached.insert(event_type.to_string()));
    }

    fn detach(&mut self, event_type: &str) {
        self.with(|conn| conn.attached.remove(event_type));
    }

    fn close(&mut self) {
        self.with(|conn| conn.readiness = Readiness::Closed);
    }
}
