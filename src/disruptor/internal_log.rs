//! Internal logging utilities for LockRing
//!
//! All diagnostics are routed through `tracing` under the `lockring` target so
//! they stay silent unless the embedding application installs a subscriber.

/// Internal debug logging macro
#[macro_export]
#[doc(hidden)]
macro_rules! internal_debug {
    ($($arg:tt)*) => {
        ::tracing::debug!(target: "lockring", $($arg)*)
    };
}

/// Internal info logging macro
#[macro_export]
#[doc(hidden)]
macro_rules! internal_info {
    ($($arg:tt)*) => {
        ::tracing::info!(target: "lockring", $($arg)*)
    };
}

/// Internal warn logging macro
///
/// Used for conditions that are safe but indicate a resource leak, such as
/// retired pointers that are still hazardous when a domain is torn down.
#[macro_export]
#[doc(hidden)]
macro_rules! internal_warn {
    ($($arg:tt)*) => {
        ::tracing::warn!(target: "lockring", $($arg)*)
    };
}
