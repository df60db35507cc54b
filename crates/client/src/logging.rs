//! Logging front-end.
//!
//! The macros take plain `format!` arguments and dispatch to `tracing`, so
//! call sites stay short and binaries decide where the output goes.

use tracing::Level;

/// Emit `msg` at `level`. Used by the `log_*!` macros.
pub fn log_impl(level: Level, msg: &str) {
    match level {
        Level::ERROR => tracing::error!("{}", msg),
        Level::WARN => tracing::warn!("{}", msg),
        Level::INFO => tracing::info!("{}", msg),
        Level::DEBUG => tracing::debug!("{}", msg),
        _ => tracing::trace!("{}", msg),
    }
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`, or `default_filter`
/// when the variable is unset. Does nothing if a subscriber is already set.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_impl(::tracing::Level::INFO, &format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_impl(::tracing::Level::ERROR, &format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_impl(::tracing::Level::WARN, &format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_impl(::tracing::Level::DEBUG, &format!($($arg)*))
    };
}
