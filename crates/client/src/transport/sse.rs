//! Server-Sent Events over HTTP, using reqwest's streaming body.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use tender_stream_shared::{try_problem_detail, TransportError};
use tokio::task::JoinHandle;

use super::{
    OpenRequest, Readiness, SseDecoder, SseFrame, Transport, TransportHandle, TransportSink,
};

const LAST_EVENT_ID: &str = "Last-Event-ID";

/// What earlier streams said about resuming: the last event id and the
/// server's `retry:` hint.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ResumePoint {
    last_event_id: Option<String>,
    retry_hint: Option<Duration>,
}

impl ResumePoint {
    /// Returns the new retry hint when the frame changed it.
    fn observe(&mut self, frame: &SseFrame) -> Option<Duration> {
        if let Some(id) = &frame.id {
            self.last_event_id = Some(id.clone());
        }
        match frame.retry {
            Some(retry) if self.retry_hint != Some(retry) => {
                self.retry_hint = Some(retry);
                Some(retry)
            }
            _ => None,
        }
    }
}

/// Opens `text/event-stream` connections.
///
/// One transport serves one session: it remembers the last event id it saw so
/// a reconnect resumes where the previous stream stopped.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: Client,
    resume: Arc<Mutex<ResumePoint>>,
}

impl Default for SseTransport {
    fn default() -> Self {
        Self::with_client(Client::new())
    }
}

impl SseTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            resume: Arc::new(Mutex::new(ResumePoint::default())),
        }
    }

    /// Transport whose client gives up on TCP/TLS setup after `timeout`.
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Id of the last event received on any stream opened by this transport.
    pub fn last_event_id(&self) -> Option<String> {
        self.resume().last_event_id.clone()
    }

    /// Reconnect delay last advertised by the server. Informational only;
    /// the session's retry policy decides when to reconnect.
    pub fn retry_hint(&self) -> Option<Duration> {
        self.resume().retry_hint
    }

    fn resume(&self) -> std::sync::MutexGuard<'_, ResumePoint> {
        self.resume.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for SseTransport {
    type Handle = SseHandle;

    fn open(
        &mut self,
        request: OpenRequest,
        sink: TransportSink,
    ) -> Result<SseHandle, TransportError> {
        match request.url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme {other:?} in {}",
                    request.url
                )))
            }
        }

        let shared = Arc::new(HandleShared {
            readiness: AtomicU8::new(READINESS_CONNECTING),
            attached: Mutex::new(request.event_types.clone()),
        });

        let task = tokio::spawn(drive_stream(
            self.client.clone(),
            request,
            Arc::clone(&shared),
            Arc::clone(&self.resume),
            sink,
        ));

        Ok(SseHandle { shared, task })
    }
}

const READINESS_CONNECTING: u8 = 0;
const READINESS_OPEN: u8 = 1;
const READINESS_CLOSED: u8 = 2;

#[derive(Debug)]
struct HandleShared {
    readiness: AtomicU8,
    attached: Mutex<HashSet<String>>,
}

impl HandleShared {
    fn readiness(&self) -> Readiness {
        match self.readiness.load(Ordering::Acquire) {
            READINESS_CONNECTING => Readiness::Connecting,
            READINESS_OPEN => Readiness::Open,
            _ => Readiness::Closed,
        }
    }

    fn set(&self, readiness: Readiness) {
        let value = match readiness {
            Readiness::Connecting => READINESS_CONNECTING,
            Readiness::Open => READINESS_OPEN,
            Readiness::Closed => READINESS_CLOSED,
        };
        self.readiness.store(value, Ordering::Release);
    }

    fn attached(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running SSE request. Dropping the handle stops the stream.
#[derive(Debug)]
pub struct SseHandle {
    shared: Arc<HandleShared>,
    task: JoinHandle<()>,
}

impl TransportHandle for SseHandle {
    fn readiness(&self) -> Readiness {
        self.shared.readiness()
    }

    fn attach(&mut self, event_type: &str) {
        self.shared.attached().insert(event_type.to_string());
    }

    fn detach(&mut self, event_type: &str) {
        self.shared.attached().remove(event_type);
    }

    fn close(&mut self) {
        self.shared.set(Readiness::Closed);
        self.task.abort();
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive_stream(
    client: Client,
    request: OpenRequest,
    shared: Arc<HandleShared>,
    resume: Arc<Mutex<ResumePoint>>,
    sink: TransportSink,
) {
    let fail = |error: TransportError, readiness: Readiness| {
        shared.set(Readiness::Closed);
        sink.failed(error, Some(readiness));
    };

    let mut builder = client
        .get(request.url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if let Some(token) = &request.bearer_token {
        builder = builder.bearer_auth(token);
    }
    let resume_from = resume
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .last_event_id
        .clone();
    if let Some(id) = resume_from {
        builder = builder.header(LAST_EVENT_ID, id);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            fail(TransportError::Request(e.to_string()), Readiness::Connecting);
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = try_problem_detail(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        });
        fail(
            TransportError::Status {
                status: status.as_u16(),
                detail,
            },
            Readiness::Connecting,
        );
        return;
    }

    shared.set(Readiness::Open);
    if !sink.opened() {
        return;
    }

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                fail(TransportError::Stream(e.to_string()), Readiness::Open);
                return;
            }
        };

        for frame in decoder.feed(&chunk) {
            let hint = resume
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(&frame);
            if let Some(retry) = hint {
                crate::log_debug!(
                    "{} advertises a {}ms reconnect delay",
                    request.url,
                    retry.as_millis()
                );
            }
            if !shared.attached().contains(&frame.event_type) {
                continue;
            }
            if !sink.frame(frame.event_type, frame.data, frame.id) {
                return;
            }
        }
    }

    shared.set(Readiness::Closed);
    sink.failed(TransportError::Closed, Some(Readiness::Closed));
}
