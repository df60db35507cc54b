//! Reconnect scheduling: backoff math, retry bookkeeping and the timers.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tender_stream_shared::StreamError;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};

use crate::config::RetryPolicy;

/// Period of the observable countdown while a retry is pending.
pub const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

/// Observable retry bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Reconnects scheduled since the last successful open.
    pub attempt: u32,
    /// A reconnect timer is armed.
    pub is_retrying: bool,
    /// Time left until the armed reconnect fires, refreshed every second.
    pub next_fire_in: Duration,
}

/// Delay before reconnect number `attempt` (1-based):
/// `initial_delay * backoff_factor^(attempt - 1)`, clamped to `max_delay`.
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let millis = policy.initial_delay.as_millis() as f64 * policy.backoff_factor.powi(exponent);
    let max = policy.max_delay.as_millis() as f64;
    if !millis.is_finite() || millis >= max {
        return policy.max_delay;
    }
    Duration::from_millis(millis.round() as u64)
}

/// Decides whether and when to reconnect after a failure.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::default(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Schedule the next reconnect, returning its delay, or `None` when no
    /// reconnect should happen for `error`.
    pub fn schedule(&mut self, manual_disconnect: bool, error: &StreamError) -> Option<Duration> {
        if !self.policy.enabled || manual_disconnect {
            return None;
        }
        if let Some(max) = self.policy.max_attempts {
            if self.state.attempt >= max {
                return None;
            }
        }
        if !self.policy.is_retryable(error.kind) {
            return None;
        }

        self.state.attempt += 1;
        let delay = delay_for_attempt(&self.policy, self.state.attempt);
        self.state.is_retrying = true;
        self.state.next_fire_in = delay;
        Some(delay)
    }

    /// The armed reconnect fired.
    pub fn fired(&mut self) {
        self.stop();
    }

    /// One countdown period elapsed.
    pub fn tick(&mut self, elapsed: Duration) {
        if self.state.is_retrying {
            self.state.next_fire_in = self.state.next_fire_in.saturating_sub(elapsed);
        }
    }

    /// Drop the pending reconnect but keep counting attempts.
    pub fn stop(&mut self) {
        self.state.is_retrying = false;
        self.state.next_fire_in = Duration::ZERO;
    }

    /// Drop the pending reconnect and forget all attempts.
    pub fn reset(&mut self) {
        self.state = RetryState::default();
    }
}

/// What the retry timer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTick {
    Fire,
    Countdown,
}

/// The reconnect deadline and its countdown, owned by the session actor.
///
/// Disarming drops both timers, so nothing armed before can fire afterwards.
#[derive(Debug, Default)]
pub struct RetryTimer {
    fire: Option<Pin<Box<Sleep>>>,
    countdown: Option<Interval>,
}

impl RetryTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer to fire once after `delay`.
    pub fn arm(&mut self, delay: Duration) {
        let now = Instant::now();
        self.fire = Some(Box::pin(time::sleep_until(now + delay)));

        let mut countdown = time::interval_at(now + COUNTDOWN_INTERVAL, COUNTDOWN_INTERVAL);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.countdown = Some(countdown);
    }

    pub fn disarm(&mut self) {
        self.fire = None;
        self.countdown = None;
    }

    pub fn is_armed(&self) -> bool {
        self.fire.is_some()
    }

    /// Wait for the next tick. Pending forever while disarmed; disarms itself
    /// after `Fire`.
    pub async fn next(&mut self) -> RetryTick {
        let (Some(fire), Some(countdown)) = (self.fire.as_mut(), self.countdown.as_mut()) else {
            return future::pending().await;
        };

        let tick = tokio::select! {
            biased;
            () = fire => RetryTick::Fire,
            _ = countdown.tick() => RetryTick::Countdown,
        };
        if tick == RetryTick::Fire {
            self.disarm();
        }
        tick
    }
}
