//! Logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! The sync path is chatty (one line per chunk attempt), so each module decides
//! whether its lines reach the `log` facade:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("chunk {} delivered", index);
//! ```

/// Forwards to `log::$level!` when the caller's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_gated {
    ($level:ident, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::$level!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::log_gated!(debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log_gated!(info, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log_gated!(warn, $($arg)*)
    };
}

/// Errors that the engine swallows (returned as data) still get logged here.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log_gated!(error, $($arg)*)
    };
}
