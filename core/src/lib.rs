// CTE Locator core: connectionless direction finding receiver
#![allow(clippy::empty_line_after_doc_comments)]
//
// Finds a periodic advertising train, synchronizes to it, samples the
// constant tone extension and logs IQ data until the sync is lost. Then
// it starts over.

pub mod config;
pub mod error;
pub mod filter;
pub mod host;
pub mod iq;
pub mod signal;
pub mod sync;
pub mod watchdog;

pub use config::LocatorConfig;
pub use error::{HostError, LocatorError, WatchdogError};
pub use filter::{AdvertisingCandidate, AdvertisingFilter};
pub use host::{BleHost, SimAdvertiser, SimScenario, SimulatedHost};
pub use iq::{IqRecord, IqReportLogger, MemorySink};
pub use signal::BinarySignal;
pub use sync::{CycleOutcome, SyncController, SyncSession, SyncState};
pub use watchdog::{install_watchdog, SoftwareWatchdog, Watchdog, WatchdogConfig, WatchdogLease};
