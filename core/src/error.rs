//! Error types shared across the locator core.

use thiserror::Error;

use crate::host::SyncHandle;

/// Errors reported by a BLE host when a request is rejected.
///
/// `code` carries the host stack's own status value (an errno-style
/// integer on most stacks) so it can be printed the way the stack reports it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{op} rejected (err {code})")]
    Rejected { op: &'static str, code: i32 },
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("Host not ready")]
    NotReady,
    #[error("Unknown sync handle {0}")]
    InvalidHandle(SyncHandle),
}

impl HostError {
    /// Convenience constructor for a rejected request.
    pub fn rejected(op: &'static str, code: i32) -> Self {
        HostError::Rejected { op, code }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchdogError {
    #[error("Watchdog option not supported")]
    NotSupported,
    #[error("Watchdog install error: {0}")]
    InstallFailed(String),
    #[error("Watchdog setup error: {0}")]
    SetupFailed(String),
    #[error("Invalid watchdog channel {0}")]
    InvalidChannel(usize),
}

/// Top-level error surfaced by the locator driver.
///
/// Only [`LocatorError::DeleteFailed`] escapes the control loop at runtime;
/// configuration errors are reported while wiring things up.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Deleting periodic sync {handle} failed: {source}")]
    DeleteFailed {
        handle: SyncHandle,
        #[source]
        source: HostError,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl LocatorError {
    /// Whether the error leaves the locator in a state it cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LocatorError::DeleteFailed { .. })
    }
}
