//! Sync session bookkeeping: states, termination reasons and the
//! confirmation timeout policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::filter::AdvertisingCandidate;
use crate::host::{PeriodicInterval, SyncHandle};

/// A controller may wait six periodic advertising events before reporting
/// sync establishment (Core 5.3, Vol 6, Part B, 4.4.5.1), so the wait has
/// to cover one more than that.
pub const SYNC_CREATE_TIMEOUT_INTERVAL_NUM: u32 = 7;

/// Confirmation wait for a train with the given interval
pub fn sync_create_timeout(interval: PeriodicInterval) -> Duration {
    Duration::from_millis(u64::from(interval.as_millis() * SYNC_CREATE_TIMEOUT_INTERVAL_NUM))
}

/// Sync lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Between cycles
    Idle,
    /// Scanning, waiting for the filter to pick a train
    AwaitingCandidate,
    /// Create request in flight
    Creating,
    /// Create accepted, waiting for establishment or the deadline
    AwaitingConfirmation,
    /// Sync established, CTE sampling running
    Synced,
    /// Deleting a sync that never completed
    Terminating,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "Idle"),
            SyncState::AwaitingCandidate => write!(f, "AwaitingCandidate"),
            SyncState::Creating => write!(f, "Creating"),
            SyncState::AwaitingConfirmation => write!(f, "AwaitingConfirmation"),
            SyncState::Synced => write!(f, "Synced"),
            SyncState::Terminating => write!(f, "Terminating"),
        }
    }
}

/// Why a sync attempt ended before it was confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    Timeout,
    ExplicitTerminated,
}

/// The controller's view of the current sync attempt
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub state: SyncState,
    pub candidate: Option<AdvertisingCandidate>,
    pub handle: Option<SyncHandle>,
    pub timeout_deadline: Duration,
    pub termination_reason: Option<TerminationReason>,
}

impl SyncSession {
    pub fn idle() -> Self {
        Self {
            state: SyncState::Idle,
            candidate: None,
            handle: None,
            timeout_deadline: Duration::ZERO,
            termination_reason: None,
        }
    }

    /// Capture a candidate and derive its confirmation deadline
    pub fn begin(&mut self, candidate: AdvertisingCandidate) {
        self.state = SyncState::Creating;
        self.candidate = Some(candidate);
        self.handle = None;
        self.timeout_deadline = sync_create_timeout(candidate.periodic_interval);
        self.termination_reason = None;
    }

    /// Drop everything and return to [`SyncState::Idle`]
    pub fn reset(&mut self) {
        *self = Self::idle();
    }

    /// True only while the initial establishment is outstanding
    pub fn awaiting_initial_sync(&self) -> bool {
        self.state == SyncState::AwaitingConfirmation
    }

    /// Whether `handle` refers to this session's sync
    pub fn owns(&self, handle: SyncHandle) -> bool {
        self.handle == Some(handle)
    }
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::idle()
    }
}
