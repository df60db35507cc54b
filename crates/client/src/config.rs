//! Session options: defaults, partial overrides and their one-time merge.
//!
//! Callers describe only what they want changed ([`StreamOverrides`], which
//! also deserializes from the camelCase option objects the web app uses) and
//! [`resolve`] folds that over the defaults once, when the session is built.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tender_stream_shared::ErrorKind;

/// Configuration errors detected while building a session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("initial retry delay must be > 0")]
    ZeroInitialDelay,
    #[error("max retry delay ({max:?}) must be >= initial retry delay ({initial:?})")]
    MaxBelowInitial { initial: Duration, max: Duration },
    #[error("backoff factor must be a finite number >= 1.0, got {0}")]
    BackoffFactor(f64),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Reconnection policy. Immutable once a session is running.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Maximum number of scheduled reconnects; `None` retries forever.
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            retryable_kinds: ErrorKind::ALL
                .into_iter()
                .filter(ErrorKind::is_retryable_by_default)
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::ZeroInitialDelay);
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::MaxBelowInitial {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            return Err(ConfigError::BackoffFactor(self.backoff_factor));
        }
        Ok(())
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }
}

/// Effective options of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    /// Connect as soon as the session is spawned.
    pub auto_connect: bool,
    /// Retain the most recent frame as `last_message`.
    pub keep_last_message: bool,
    /// Retain the most recent failure as `last_error`.
    pub keep_last_error: bool,
    pub retry: RetryPolicy,
    /// Verbose lifecycle tracing for this session.
    pub debug: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            keep_last_message: true,
            keep_last_error: true,
            retry: RetryPolicy::default(),
            debug: false,
        }
    }
}

/// Partial retry settings. Delays are in milliseconds, `maxAttempts: -1`
/// means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOverrides {
    pub enabled: Option<bool>,
    pub max_attempts: Option<i64>,
    #[serde(rename = "initialDelay")]
    pub initial_delay_ms: Option<u64>,
    #[serde(rename = "maxDelay")]
    pub max_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub retryable_kinds: Option<Vec<ErrorKind>>,
}

/// Partial session options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamOverrides {
    pub auto_connect: Option<bool>,
    pub keep_last_message: Option<bool>,
    pub keep_last_error: Option<bool>,
    pub retry: RetryOverrides,
    pub debug: Option<bool>,
}

impl StreamOverrides {
    pub fn auto_connect(mut self, value: bool) -> Self {
        self.auto_connect = Some(value);
        self
    }

    pub fn keep_last_message(mut self, value: bool) -> Self {
        self.keep_last_message = Some(value);
        self
    }

    pub fn keep_last_error(mut self, value: bool) -> Self {
        self.keep_last_error = Some(value);
        self
    }

    pub fn debug(mut self, value: bool) -> Self {
        self.debug = Some(value);
        self
    }

    pub fn retry_enabled(mut self, value: bool) -> Self {
        self.retry.enabled = Some(value);
        self
    }

    /// Negative values mean unbounded.
    pub fn max_attempts(mut self, value: i64) -> Self {
        self.retry.max_attempts = Some(value);
        self
    }

    pub fn initial_delay(mut self, value: Duration) -> Self {
        self.retry.initial_delay_ms = Some(value.as_millis() as u64);
        self
    }

    pub fn max_delay(mut self, value: Duration) -> Self {
        self.retry.max_delay_ms = Some(value.as_millis() as u64);
        self
    }

    pub fn backoff_factor(mut self, value: f64) -> Self {
        self.retry.backoff_factor = Some(value);
        self
    }

    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry.retryable_kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Read overrides from `TENDER_STREAM_*` environment variables.
    ///
    /// Environment variables:
    /// - `TENDER_STREAM_AUTO_CONNECT`, `TENDER_STREAM_KEEP_LAST_MESSAGE`,
    ///   `TENDER_STREAM_KEEP_LAST_ERROR`, `TENDER_STREAM_DEBUG`: `true` | `false`
    /// - `TENDER_STREAM_RETRY`: `true` | `false`
    /// - `TENDER_STREAM_RETRY_MAX_ATTEMPTS`: integer, `-1` for unbounded
    /// - `TENDER_STREAM_RETRY_INITIAL_DELAY_MS`, `TENDER_STREAM_RETRY_MAX_DELAY_MS`
    /// - `TENDER_STREAM_RETRY_BACKOFF_FACTOR`: float
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            auto_connect: env_parse("TENDER_STREAM_AUTO_CONNECT")?,
            keep_last_message: env_parse("TENDER_STREAM_KEEP_LAST_MESSAGE")?,
            keep_last_error: env_parse("TENDER_STREAM_KEEP_LAST_ERROR")?,
            debug: env_parse("TENDER_STREAM_DEBUG")?,
            retry: RetryOverrides {
                enabled: env_parse("TENDER_STREAM_RETRY")?,
                max_attempts: env_parse("TENDER_STREAM_RETRY_MAX_ATTEMPTS")?,
                initial_delay_ms: env_parse("TENDER_STREAM_RETRY_INITIAL_DELAY_MS")?,
                max_delay_ms: env_parse("TENDER_STREAM_RETRY_MAX_DELAY_MS")?,
                backoff_factor: env_parse("TENDER_STREAM_RETRY_BACKOFF_FACTOR")?,
                retryable_kinds: None,
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}

/// Merge `overrides` over `defaults`.
pub fn resolve(defaults: &StreamOptions, overrides: &StreamOverrides) -> StreamOptions {
    let retry = &overrides.retry;
    let base = &defaults.retry;

    StreamOptions {
        auto_connect: overrides.auto_connect.unwrap_or(defaults.auto_connect),
        keep_last_message: overrides
            .keep_last_message
            .unwrap_or(defaults.keep_last_message),
        keep_last_error: overrides.keep_last_error.unwrap_or(defaults.keep_last_error),
        debug: overrides.debug.unwrap_or(defaults.debug),
        retry: RetryPolicy {
            enabled: retry.enabled.unwrap_or(base.enabled),
            max_attempts: match retry.max_attempts {
                Some(n) if n < 0 => None,
                Some(n) => Some(u32::try_from(n).unwrap_or(u32::MAX)),
                None => base.max_attempts,
            },
            initial_delay: retry
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.initial_delay),
            max_delay: retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.max_delay),
            backoff_factor: retry.backoff_factor.unwrap_or(base.backoff_factor),
            retryable_kinds: retry
                .retryable_kinds
                .as_ref()
                .map(|kinds| kinds.iter().copied().collect())
                .unwrap_or_else(|| base.retryable_kinds.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overrides_resolve_to_defaults() {
        let defaults = StreamOptions::default();
        assert_eq!(resolve(&defaults, &StreamOverrides::default()), defaults);
    }

    #[test]
    fn overrides_from_camel_case_json() {
        let overrides: StreamOverrides = serde_json::from_str(
            r#"{
                "autoConnect": false,
                "keepLastError": false,
                "retry": {
                    "maxAttempts": -1,
                    "initialDelay": 250,
                    "backoffFactor": 1.5,
                    "retryableKinds": ["CONNECTION_LOST", "NETWORK_ERROR"]
                }
            }"#,
        )
        .unwrap();

        let options = resolve(&StreamOptions::default(), &overrides);
        assert!(!options.auto_connect);
        assert!(options.keep_last_message);
        assert!(!options.keep_last_error);
        assert_eq!(options.retry.max_attempts, None);
        assert_eq!(options.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(options.retry.max_delay, Duration::from_millis(30_000));
        assert_eq!(options.retry.backoff_factor, 1.5);
        assert!(options.retry.is_retryable(ErrorKind::ConnectionLost));
        assert!(!options.retry.is_retryable(ErrorKind::ConnectionClosed));
    }

    #[test]
    fn builder_setters_feed_resolve() {
        let overrides = StreamOverrides::default()
            .auto_connect(false)
            .max_attempts(3)
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(2));
        let options = resolve(&StreamOptions::default(), &overrides);
        assert_eq!(options.retry.max_attempts, Some(3));
        assert_eq!(options.retry.initial_delay, Duration::from_millis(100));
        assert_eq!(options.retry.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn default_policy_does_not_retry_unknown_errors() {
        let policy = RetryPolicy::default();
        assert!(policy.validate().is_ok());
        assert!(!policy.is_retryable(ErrorKind::UnknownError));
        assert!(policy.is_retryable(ErrorKind::ConnectionFailed));
    }

    #[test]
    fn validate_rejects_bad_policies() {
        let shrinking = RetryPolicy {
            backoff_factor: 0.5,
            ..RetryPolicy::default()
        };
        assert_eq!(shrinking.validate(), Err(ConfigError::BackoffFactor(0.5)));

        let inverted = RetryPolicy {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::MaxBelowInitial { .. })
        ));

        let zero = RetryPolicy {
            initial_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroInitialDelay));
    }
}
