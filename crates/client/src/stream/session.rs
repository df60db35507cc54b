//! The public session handle and the actor task behind it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use tender_stream_shared::{
    ConnectionState, StreamError, StreamMessage, StreamTarget, TransportError, DEFAULT_EVENT_TYPE,
};
use tokio::sync::{mpsc, watch};
use url::Url;
use uuid::Uuid;

use super::classifier;
use super::connection::ConnectionManager;
use super::machine::{Effect, Input, SessionMachine, SessionSnapshot};
use super::registry::{
    ErrorSubscribers, Listener, SubscriptionHandle, SubscriptionRegistry, Topic, Unsubscribed,
};
use super::retry::{RetryTick, RetryTimer, COUNTDOWN_INTERVAL};
use crate::auth::{StaticToken, TokenSource};
use crate::config::{resolve, ConfigError, StreamOptions, StreamOverrides};
use crate::endpoint::StreamEndpoint;
use crate::transport::{OpenRequest, Transport, TransportEvent};

enum Command {
    Input(Input),
    Subscribe {
        id: u64,
        event_type: String,
        listener: Listener<StreamMessage>,
    },
    SubscribeError {
        id: u64,
        listener: Listener<StreamError>,
    },
    Unsubscribe(SubscriptionHandle),
    Teardown,
}

/// Configures and spawns a [`StreamSession`].
pub struct SessionBuilder {
    target: StreamTarget,
    endpoint: StreamEndpoint,
    token_source: Option<Arc<dyn TokenSource>>,
    defaults: StreamOptions,
    overrides: StreamOverrides,
}

impl SessionBuilder {
    fn new(target: StreamTarget) -> Self {
        Self {
            target,
            endpoint: StreamEndpoint::default(),
            token_source: None,
            defaults: StreamOptions::default(),
            overrides: StreamOverrides::default(),
        }
    }

    pub fn endpoint(mut self, endpoint: StreamEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Consulted on every connect and reconnect.
    pub fn token_source(mut self, source: impl TokenSource + 'static) -> Self {
        self.token_source = Some(Arc::new(source));
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.token_source(StaticToken::new(token))
    }

    /// Options the overrides are applied on top of.
    pub fn defaults(mut self, defaults: StreamOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn overrides(mut self, overrides: StreamOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Resolve the options and start the session on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn<T: Transport>(self, transport: T) -> Result<StreamSession, ConfigError> {
        let options = resolve(&self.defaults, &self.overrides);
        options.retry.validate()?;

        let id = Uuid::new_v4();
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let actor = SessionActor {
            id,
            target: self.target.clone(),
            debug: options.debug,
            url: self.endpoint.url_for(&self.target),
            token_source: self.token_source,
            machine: SessionMachine::new(&options),
            connection: ConnectionManager::new(transport, event_tx),
            registry: SubscriptionRegistry::new(),
            errors: ErrorSubscribers::new(),
            timer: RetryTimer::new(),
            snapshot: snapshot_tx,
        };
        crate::log_info!("stream {} session {} started", self.target, id);
        tokio::spawn(actor.run(command_rx, event_rx, options.auto_connect));

        Ok(StreamSession {
            inner: Arc::new(Inner {
                id,
                target: self.target,
                options,
                commands: command_tx,
                snapshot: snapshot_rx,
                next_handle: AtomicU64::new(1),
                torn_down: AtomicBool::new(false),
            }),
        })
    }
}

struct Inner {
    id: Uuid,
    target: StreamTarget,
    options: StreamOptions,
    commands: UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    next_handle: AtomicU64,
    torn_down: AtomicBool,
}

/// Handle to one live event stream.
///
/// Cheap to clone; every clone drives the same session. All methods return
/// immediately and take effect in call order on the session task. The session
/// is torn down by [`StreamSession::teardown`] or once every clone is dropped.
/// A listener that captures a clone of its own session keeps the session alive
/// until `teardown` is called.
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.inner.id)
            .field("target", &self.inner.target)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl StreamSession {
    pub fn builder(target: StreamTarget) -> SessionBuilder {
        SessionBuilder::new(target)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn target(&self) -> &StreamTarget {
        &self.inner.target
    }

    pub fn options(&self) -> &StreamOptions {
        &self.inner.options
    }

    fn send(&self, command: Command) {
        if self.inner.commands.unbounded_send(command).is_err() {
            crate::log_debug!(
                "stream {} session {} is gone, command dropped",
                self.inner.target,
                self.inner.id
            );
        }
    }

    /// Open the stream unless it is already connecting or connected.
    pub fn connect(&self) {
        self.send(Command::Input(Input::Connect));
    }

    /// Close the stream, cancel any pending reconnect and drop all event
    /// subscriptions. No reconnect happens until `connect` or `retry_now`.
    pub fn disconnect(&self) {
        self.send(Command::Input(Input::Disconnect));
    }

    pub fn clear_error(&self) {
        self.send(Command::Input(Input::ClearError));
    }

    /// Skip the pending backoff and reconnect now. The attempt count is kept.
    pub fn retry_now(&self) {
        self.send(Command::Input(Input::RetryNow));
    }

    /// Cancel the pending reconnect and reset the attempt count.
    pub fn cancel_retry(&self) {
        self.send(Command::Input(Input::CancelRetry));
    }

    fn next_handle_id(&self) -> u64 {
        self.inner.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Call `listener` for every frame of `event_type`. May be called before
    /// the stream is connected; the subscription survives reconnects.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, listener: F) -> SubscriptionHandle
    where
        F: Fn(&StreamMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_handle_id();
        let event_type = event_type.into();
        let handle = SubscriptionHandle::new(id, Topic::Event(event_type.clone()));
        self.send(Command::Subscribe {
            id,
            event_type,
            listener: Arc::new(listener),
        });
        handle
    }

    /// Subscribe to frames sent without an event name.
    pub fn subscribe_to_default_message<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&StreamMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(DEFAULT_EVENT_TYPE, listener)
    }

    /// Call `listener` with every classified stream failure.
    pub fn subscribe_to_error<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&StreamError) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_handle_id();
        self.send(Command::SubscribeError {
            id,
            listener: Arc::new(listener),
        });
        SubscriptionHandle::new(id, Topic::Error)
    }

    /// Remove a subscription. Unknown or already removed handles are ignored.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.send(Command::Unsubscribe(handle.clone()));
    }

    /// Close the stream, cancel timers and drop every listener, then stop the
    /// session task. Only the first call has an effect.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.send(Command::Teardown);
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.snapshot.borrow().connection_state
    }

    pub fn is_connected(&self) -> bool {
        self.inner.snapshot.borrow().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.snapshot.borrow().is_connecting()
    }

    pub fn last_message(&self) -> Option<StreamMessage> {
        self.inner.snapshot.borrow().last_message.clone()
    }

    pub fn last_error(&self) -> Option<StreamError> {
        self.inner.snapshot.borrow().last_error.clone()
    }

    pub fn has_error(&self) -> bool {
        self.inner.snapshot.borrow().has_error()
    }

    pub fn is_retrying(&self) -> bool {
        self.inner.snapshot.borrow().is_retrying()
    }

    pub fn retry_attempt(&self) -> u32 {
        self.inner.snapshot.borrow().retry_attempt()
    }

    pub fn next_retry_in(&self) -> Duration {
        self.inner.snapshot.borrow().next_retry_in()
    }
}

/// Owns all mutable session state. Commands, transport events and retry
/// ticks are handled one at a time, commands first.
struct SessionActor<T: Transport> {
    id: Uuid,
    target: StreamTarget,
    debug: bool,
    url: Result<Url, TransportError>,
    token_source: Option<Arc<dyn TokenSource>>,
    machine: SessionMachine,
    connection: ConnectionManager<T>,
    registry: SubscriptionRegistry,
    errors: ErrorSubscribers,
    timer: RetryTimer,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<T: Transport> SessionActor<T> {
    async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
        auto_connect: bool,
    ) {
        if auto_connect {
            self.apply(Input::Connect);
        }

        loop {
            tokio::select! {
                biased;
                command = commands.next() => match command {
                    Some(Command::Teardown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some((epoch, event)) = events.recv() => self.on_transport_event(epoch, event),
                tick = self.timer.next() => match tick {
                    RetryTick::Fire => self.apply(Input::RetryTimerFired),
                    RetryTick::Countdown => self.apply(Input::CountdownTick(COUNTDOWN_INTERVAL)),
                },
            }
        }

        self.apply(Input::Disconnect);
        self.errors.clear();
        crate::log_info!("stream {} session {} torn down", self.target, self.id);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Input(input) => self.apply(input),
            Command::Subscribe {
                id,
                event_type,
                listener,
            } => {
                if self.registry.subscribe(id, &event_type, listener) {
                    self.connection.attach(&event_type);
                }
                self.trace(format_args!("subscribed #{id} to '{event_type}'"));
            }
            Command::SubscribeError { id, listener } => {
                self.errors.insert(id, listener);
                self.trace(format_args!("subscribed #{id} to errors"));
            }
            Command::Unsubscribe(handle) => match handle.topic() {
                Topic::Event(event_type) => {
                    if self.registry.unsubscribe(handle.id(), event_type) == Unsubscribed::RemovedLast
                    {
                        self.connection.detach(event_type);
                    }
                }
                Topic::Error => {
                    self.errors.remove(handle.id());
                }
            },
            Command::Teardown => {}
        }
    }

    fn on_transport_event(&mut self, epoch: u64, event: TransportEvent) {
        if !self.connection.is_current(epoch) {
            self.trace(format_args!("dropping {event:?} from stale handle #{epoch}"));
            return;
        }

        let input = match event {
            TransportEvent::Opened => {
                crate::log_info!("stream {} connected", self.target);
                Input::Opened
            }
            TransportEvent::Failed { error, readiness } => {
                let error = classifier::classify_failure(error, readiness);
                crate::log_warn!("stream {} failed: {}", self.target, error);
                Input::Failed(error)
            }
            TransportEvent::Frame {
                event_type,
                payload,
                id,
            } => Input::Frame(StreamMessage {
                event_type,
                payload,
                id,
            }),
        };
        self.apply(input);
    }

    fn apply(&mut self, input: Input) {
        let before = self.machine.state();
        self.trace(format_args!("{input:?} in {before}"));

        let mut pending: VecDeque<Effect> = self.machine.handle(input).into();
        while let Some(effect) = pending.pop_front() {
            match effect {
                Effect::Open => match self.open() {
                    Ok(true) => {}
                    // The handle outlived a reported failure; no new Opened
                    // event will arrive for it.
                    Ok(false) => {
                        if self.connection.is_connected() {
                            self.trace(format_args!(
                                "handle #{} still open, resuming it",
                                self.connection.epoch()
                            ));
                            pending.extend(self.machine.handle(Input::Opened));
                        }
                    }
                    Err(e) => {
                        let error = classifier::connection_failed(e);
                        crate::log_error!("stream {}: {}", self.target, error);
                        pending.extend(self.machine.handle(Input::Failed(error)));
                    }
                },
                Effect::Close => self.connection.disconnect(),
                Effect::ArmRetry(delay) => {
                    crate::log_info!(
                        "stream {} reconnecting in {}ms (attempt {})",
                        self.target,
                        delay.as_millis(),
                        self.machine.retry_state().attempt
                    );
                    self.timer.arm(delay);
                }
                Effect::DisarmRetry => self.timer.disarm(),
                Effect::Dispatch(message) => {
                    self.registry.dispatch(&message);
                }
                Effect::NotifyError(error) => {
                    self.errors.notify(&error);
                }
                Effect::ClearSubscriptions => {
                    for event_type in self.registry.clear() {
                        self.connection.detach(&event_type);
                    }
                }
            }
        }

        let after = self.machine.state();
        if after != before {
            self.trace(format_args!("{before} -> {after}"));
        }
        self.publish();
    }

    /// Returns whether a new handle was opened.
    fn open(&mut self) -> Result<bool, TransportError> {
        let url = self.url.clone()?;
        let request = OpenRequest {
            url,
            bearer_token: self
                .token_source
                .as_ref()
                .and_then(|source| source.bearer_token()),
            event_types: self.registry.event_types(),
        };
        let opened = self.connection.connect(request)?;
        if opened {
            self.trace(format_args!(
                "opened handle #{} for {:?}",
                self.connection.epoch(),
                self.url
            ));
        }
        Ok(opened)
    }

    fn publish(&self) {
        let next = self.machine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn trace(&self, args: fmt::Arguments<'_>) {
        if self.debug {
            crate::log_debug!("stream {} [{}]: {}", self.target, self.id, args);
        }
    }
}
