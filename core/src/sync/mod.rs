//! Periodic advertising sync lifecycle.

pub mod controller;
pub mod session;

pub use controller::{CycleOutcome, SyncController};
pub use session::{
    sync_create_timeout, SyncSession, SyncState, TerminationReason,
    SYNC_CREATE_TIMEOUT_INTERVAL_NUM,
};
