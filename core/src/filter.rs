/// Advertising filter: first-wins selection of a periodic advertising train
///
/// The filter is armed at the start of every scan cycle. The first scan
/// report with a non-zero periodic interval becomes the cycle's
/// [`AdvertisingCandidate`]; the filter then disarms itself and ignores
/// further reports until it is armed again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::host::adv_data;
use crate::host::{BleAddress, PeriodicInterval, ScanReport};
use crate::signal::BinarySignal;

/// A periodic advertising train picked for synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingCandidate {
    pub address: BleAddress,
    pub advertising_set_id: u8,
    pub periodic_interval: PeriodicInterval,
}

impl AdvertisingCandidate {
    /// Build a candidate from a scan report, rejecting non-periodic reports
    pub fn from_report(report: &ScanReport) -> Option<Self> {
        if !report.interval.is_periodic() {
            return None;
        }
        Some(Self {
            address: report.address,
            advertising_set_id: report.sid,
            periodic_interval: report.interval,
        })
    }
}

impl fmt::Display for AdvertisingCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} SID {} interval {}",
            self.address, self.advertising_set_id, self.periodic_interval
        )
    }
}

pub struct AdvertisingFilter {
    armed: Mutex<bool>,
    found: BinarySignal<AdvertisingCandidate>,
}

impl AdvertisingFilter {
    /// Create a disarmed filter
    pub fn new() -> Self {
        Self {
            armed: Mutex::new(false),
            found: BinarySignal::new(),
        }
    }

    /// Start a new scan cycle: forget any earlier candidate and accept the next one.
    pub fn arm(&self) {
        let mut armed = self.armed.lock();
        self.found.reset();
        *armed = true;
    }

    pub fn is_armed(&self) -> bool {
        *self.armed.lock()
    }

    /// Inspect one scan report. Returns the candidate if this report was selected.
    pub fn on_scan_report(&self, report: &ScanReport) -> Option<AdvertisingCandidate> {
        debug!(
            "[DEVICE]: {}, Tx Pwr: {}, RSSI {} {} Prim: {}, Secn: {}, Interval: {}, SID: {}",
            report.address,
            report.tx_power,
            report.rssi,
            adv_data::local_name(&report.data).unwrap_or_default(),
            report.primary_phy,
            report.secondary_phy,
            report.interval,
            report.sid
        );

        let mut armed = self.armed.lock();
        if !*armed {
            return None;
        }
        let candidate = AdvertisingCandidate::from_report(report)?;
        *armed = false;
        drop(armed);

        info!("Found periodic advertising: {}", candidate);
        self.found.give(candidate);
        Some(candidate)
    }

    /// Wait for this cycle's candidate
    pub async fn next_candidate(&self) -> AdvertisingCandidate {
        self.found.take().await
    }
}

impl Default for AdvertisingFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Phy;

    fn report(last_byte: u8, sid: u8, interval: u16) -> ScanReport {
        ScanReport {
            address: BleAddress::random([last_byte, 0x11, 0x22, 0x33, 0x44, 0xC0]),
            sid,
            rssi: -60,
            tx_power: 0,
            interval: PeriodicInterval(interval),
            primary_phy: Phy::Le1M,
            secondary_phy: Phy::Le2M,
            data: vec![],
        }
    }

    #[test]
    fn test_disarmed_filter_emits_nothing() {
        let filter = AdvertisingFilter::new();
        assert!(filter.on_scan_report(&report(1, 0, 100)).is_none());
    }

    #[test]
    fn test_zero_interval_is_never_a_candidate() {
        let filter = AdvertisingFilter::new();
        filter.arm();
        for i in 0..50 {
            assert!(filter.on_scan_report(&report(i, i, 0)).is_none());
        }
        assert!(filter.is_armed());
    }

    #[test]
    fn test_first_periodic_report_wins() {
        let filter = AdvertisingFilter::new();
        filter.arm();

        assert!(filter.on_scan_report(&report(1, 3, 0)).is_none());
        let first = filter.on_scan_report(&report(2, 4, 100)).expect("first periodic");
        assert_eq!(first.advertising_set_id, 4);
        assert_eq!(first.periodic_interval, PeriodicInterval(100));

        assert!(filter.on_scan_report(&report(3, 5, 200)).is_none());
        assert!(!filter.is_armed());
    }

    #[tokio::test]
    async fn test_next_candidate_returns_selected_train() {
        let filter = AdvertisingFilter::new();
        filter.arm();
        filter.on_scan_report(&report(9, 1, 80));
        filter.on_scan_report(&report(8, 2, 90));

        let candidate = filter.next_candidate().await;
        assert_eq!(candidate.address.bytes[0], 9);
    }

    #[test]
    fn test_rearm_discards_previous_candidate() {
        let filter = AdvertisingFilter::new();
        filter.arm();
        filter.on_scan_report(&report(1, 1, 100));
        filter.arm();
        assert!(filter.is_armed());
        let second = filter.on_scan_report(&report(2, 2, 100)).expect("second cycle");
        assert_eq!(second.address.bytes[0], 2);
    }
}
