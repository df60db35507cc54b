//! Session state transitions, kept free of I/O.
//!
//! [`SessionMachine::handle`] consumes one [`Input`] and returns the
//! [`Effect`]s the session actor has to carry out, in order.

use std::time::Duration;

use tender_stream_shared::{ConnectionState, StreamError, StreamMessage};

use super::retry::{RetryScheduler, RetryState};
use crate::config::StreamOptions;

/// Everything that can change session state.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Connect,
    RetryNow,
    CancelRetry,
    Disconnect,
    ClearError,
    Opened,
    Failed(StreamError),
    Frame(StreamMessage),
    RetryTimerFired,
    CountdownTick(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the connection manager for a handle.
    Open,
    /// Close the transport handle.
    Close,
    ArmRetry(Duration),
    DisarmRetry,
    Dispatch(StreamMessage),
    NotifyError(StreamError),
    /// Drop every frame subscription and detach them from the transport.
    ClearSubscriptions,
}

/// Observable state of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub connection_state: ConnectionState,
    pub last_message: Option<StreamMessage>,
    pub last_error: Option<StreamError>,
    pub retry: RetryState,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection_state.is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.connection_state.is_connecting()
    }

    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn is_retrying(&self) -> bool {
        self.retry.is_retrying
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry.attempt
    }

    pub fn next_retry_in(&self) -> Duration {
        self.retry.next_fire_in
    }
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    keep_last_message: bool,
    keep_last_error: bool,
    state: ConnectionState,
    last_message: Option<StreamMessage>,
    last_error: Option<StreamError>,
    retry: RetryScheduler,
    manual_disconnect: bool,
}

impl SessionMachine {
    pub fn new(options: &StreamOptions) -> Self {
        Self {
            keep_last_message: options.keep_last_message,
            keep_last_error: options.keep_last_error,
            state: ConnectionState::Disconnected,
            last_message: None,
            last_error: None,
            retry: RetryScheduler::new(options.retry.clone()),
            manual_disconnect: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry.state()
    }

    pub fn is_manually_disconnected(&self) -> bool {
        self.manual_disconnect
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection_state: self.state,
            last_message: self.last_message.clone(),
            last_error: self.last_error.clone(),
            retry: self.retry.state(),
        }
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Connect => {
                if self.is_active() {
                    return effects;
                }
                self.last_error = None;
                self.reconnect(&mut effects);
            }
            Input::RetryNow => {
                self.stop_retry(&mut effects);
                if !self.is_active() {
                    self.reconnect(&mut effects);
                }
            }
            Input::RetryTimerFired => {
                if self.manual_disconnect || !self.retry.state().is_retrying {
                    return effects;
                }
                self.retry.fired();
                if !self.is_active() {
                    self.reconnect(&mut effects);
                }
            }
            Input::Opened => {
                if self.retry.state().is_retrying {
                    effects.push(Effect::DisarmRetry);
                }
                self.retry.reset();
                self.state = ConnectionState::Connected;
            }
            Input::Failed(error) => {
                if self.keep_last_error {
                    self.last_error = Some(error.clone());
                }
                self.state = ConnectionState::Error;
                let retryable = error.retryable;
                let delay = if retryable {
                    self.retry.schedule(self.manual_disconnect, &error)
                } else {
                    None
                };
                effects.push(Effect::NotifyError(error));
                if let Some(delay) = delay {
                    effects.push(Effect::ArmRetry(delay));
                }
            }
            Input::Frame(message) => {
                if self.keep_last_message {
                    self.last_message = Some(message.clone());
                }
                effects.push(Effect::Dispatch(message));
            }
            Input::Disconnect => {
                self.manual_disconnect = true;
                if self.retry.state().is_retrying {
                    effects.push(Effect::DisarmRetry);
                }
                self.retry.reset();
                effects.push(Effect::Close);
                effects.push(Effect::ClearSubscriptions);
                self.state = ConnectionState::Disconnected;
                if !self.keep_last_message {
                    self.last_message = None;
                }
                if !self.keep_last_error {
                    self.last_error = None;
                }
            }
            Input::CancelRetry => {
                if self.retry.state().is_retrying {
                    effects.push(Effect::DisarmRetry);
                }
                self.retry.reset();
            }
            Input::ClearError => self.last_error = None,
            Input::CountdownTick(elapsed) => self.retry.tick(elapsed),
        }
        effects
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    /// Stop the armed retry without forgetting how many were made.
    fn stop_retry(&mut self, effects: &mut Vec<Effect>) {
        if self.retry.state().is_retrying {
            effects.push(Effect::DisarmRetry);
        }
        self.retry.stop();
    }

    fn reconnect(&mut self, effects: &mut Vec<Effect>) {
        self.manual_disconnect = false;
        self.stop_retry(effects);
        self.state = ConnectionState::Connecting;
        effects.push(Effect::Open);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tender_stream_shared::ErrorKind;

    use crate::config::RetryPolicy;

    fn machine() -> SessionMachine {
        SessionMachine::new(&StreamOptions::default())
    }

    fn lost() -> StreamError {
        StreamError::new(ErrorKind::ConnectionLost, "lost", true)
    }

    #[test]
    fn connect_is_idempotent_while_active() {
        let mut m = machine();
        assert_eq!(m.handle(Input::Connect), vec![Effect::Open]);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(m.handle(Input::Connect).is_empty());

        m.handle(Input::Opened);
        assert_eq!(m.state(), ConnectionState::Connected);
        assert!(m.handle(Input::Connect).is_empty());
    }

    #[test]
    fn retryable_failure_arms_retry() {
        let mut m = machine();
        m.handle(Input::Connect);
        let err = lost();
        assert_eq!(
            m.handle(Input::Failed(err.clone())),
            vec![
                Effect::NotifyError(err.clone()),
                Effect::ArmRetry(Duration::from_secs(1))
            ]
        );
        let snapshot = m.snapshot();
        assert_eq!(snapshot.connection_state, ConnectionState::Error);
        assert_eq!(snapshot.last_error, Some(err));
        assert!(snapshot.is_retrying());
        assert_eq!(snapshot.retry_attempt(), 1);
    }

    #[test]
    fn unknown_errors_never_schedule() {
        let mut m = machine();
        m.handle(Input::Connect);
        let err = StreamError::new(ErrorKind::UnknownError, "?", false);
        assert_eq!(
            m.handle(Input::Failed(err.clone())),
            vec![Effect::NotifyError(err)]
        );
        assert!(!m.snapshot().is_retrying());
    }

    #[test]
    fn unknown_errors_never_schedule_even_if_flagged_retryable() {
        let mut m = machine();
        m.handle(Input::Connect);
        let err = StreamError::new(ErrorKind::UnknownError, "?", true);
        assert_eq!(m.handle(Input::Failed(err.clone())).len(), 1);
        assert_eq!(m.snapshot().retry_attempt(), 0);
    }

    #[test]
    fn timer_fire_reconnects_and_keeps_error() {
        let mut m = machine();
        m.handle(Input::Connect);
        m.handle(Input::Failed(lost()));
        assert_eq!(m.handle(Input::RetryTimerFired), vec![Effect::Open]);
        let snapshot = m.snapshot();
        assert!(snapshot.is_connecting());
        assert!(snapshot.has_error());
        assert!(!snapshot.is_retrying());
        assert_eq!(snapshot.retry_attempt(), 1);

        m.handle(Input::Opened);
        assert_eq!(m.snapshot().retry_attempt(), 0);
        assert!(m.snapshot().has_error());
    }

    #[test]
    fn disconnect_always_lands_in_disconnected() {
        let mut m = machine();
        m.handle(Input::Connect);
        m.handle(Input::Failed(lost()));
        assert_eq!(
            m.handle(Input::Disconnect),
            vec![Effect::DisarmRetry, Effect::Close, Effect::ClearSubscriptions]
        );
        let snapshot = m.snapshot();
        assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
        assert!(!snapshot.is_retrying());
        assert_eq!(snapshot.retry_attempt(), 0);
        assert!(m.is_manually_disconnected());

        // A fire that raced the disconnect is ignored.
        assert!(m.handle(Input::RetryTimerFired).is_empty());
        // And so is a late failure.
        assert_eq!(m.handle(Input::Failed(lost())).len(), 1);
        assert!(!m.snapshot().is_retrying());
    }

    #[test]
    fn disconnect_drops_history_unless_kept() {
        let options = StreamOptions {
            keep_last_message: false,
            keep_last_error: false,
            ..StreamOptions::default()
        };
        let mut m = SessionMachine::new(&options);
        m.handle(Input::Connect);
        m.handle(Input::Frame(StreamMessage::new("test", "1")));
        assert_eq!(m.snapshot().last_message, None);
        m.handle(Input::Failed(lost()));
        assert_eq!(m.snapshot().last_error, None);

        let mut kept = machine();
        kept.handle(Input::Connect);
        kept.handle(Input::Frame(StreamMessage::new("test", "1")));
        kept.handle(Input::Disconnect);
        assert!(kept.snapshot().last_message.is_some());
    }

    #[test]
    fn retry_now_keeps_attempt_count() {
        let mut m = machine();
        m.handle(Input::Connect);
        m.handle(Input::Failed(lost()));
        assert_eq!(
            m.handle(Input::RetryNow),
            vec![Effect::DisarmRetry, Effect::Open]
        );
        assert_eq!(m.snapshot().retry_attempt(), 1);
        assert!(!m.snapshot().is_retrying());

        m.handle(Input::Failed(lost()));
        assert_eq!(m.snapshot().retry_attempt(), 2);
        assert_eq!(m.snapshot().next_retry_in(), Duration::from_secs(2));
    }

    #[test]
    fn retry_now_after_manual_disconnect_reconnects() {
        let mut m = machine();
        m.handle(Input::Connect);
        m.handle(Input::Disconnect);
        assert_eq!(m.handle(Input::RetryNow), vec![Effect::Open]);
        assert!(!m.is_manually_disconnected());
    }

    #[test]
    fn cancel_retry_resets_and_stale_fire_is_ignored() {
        let mut m = machine();
        m.handle(Input::Connect);
        m.handle(Input::Failed(lost()));
        assert_eq!(m.handle(Input::CancelRetry), vec![Effect::DisarmRetry]);
        assert_eq!(m.snapshot().retry, RetryState::default());
        assert!(m.handle(Input::RetryTimerFired).is_empty());
        assert!(m.handle(Input::CancelRetry).is_empty());
    }

    #[test]
    fn explicit_connect_clears_error() {
        let mut m = machine();
        m.handle(Input::Connect);
        m.handle(Input::Failed(lost()));
        assert_eq!(
            m.handle(Input::Connect),
            vec![Effect::DisarmRetry, Effect::Open]
        );
        assert!(!m.snapshot().has_error());
        assert_eq!(m.snapshot().retry_attempt(), 1);
    }

    #[test]
    fn countdown_only_moves_while_retrying() {
        let mut m = machine();
        m.handle(Input::CountdownTick(Duration::from_secs(1)));
        assert_eq!(m.snapshot().next_retry_in(), Duration::ZERO);

        m.handle(Input::Connect);
        m.handle(Input::Failed(lost()));
        m.handle(Input::CountdownTick(Duration::from_secs(1)));
        assert_eq!(m.snapshot().next_retry_in(), Duration::ZERO);
        assert!(m.snapshot().is_retrying());
    }

    #[test]
    fn max_attempts_bounds_scheduling() {
        let options = StreamOptions {
            retry: RetryPolicy {
                max_attempts: Some(3),
                ..RetryPolicy::default()
            },
            ..StreamOptions::default()
        };
        let mut m = SessionMachine::new(&options);
        m.handle(Input::Connect);

        let mut armed = 0;
        for _ in 0..6 {
            let effects = m.handle(Input::Failed(lost()));
            if effects.iter().any(|e| matches!(e, Effect::ArmRetry(_))) {
                armed += 1;
                m.handle(Input::RetryTimerFired);
            }
        }
        assert_eq!(armed, 3);
        assert_eq!(m.snapshot().retry_attempt(), 3);
    }

    #[test]
    fn clear_error_and_frames() {
        let mut m = machine();
        m.handle(Input::Connect);
        m.handle(Input::Opened);
        let msg = StreamMessage::new("test", "{}");
        assert_eq!(
            m.handle(Input::Frame(msg.clone())),
            vec![Effect::Dispatch(msg.clone())]
        );
        assert_eq!(m.snapshot().last_message, Some(msg));
        m.handle(Input::Failed(lost()));
        m.handle(Input::ClearError);
        assert!(!m.snapshot().has_error());
    }
}
