//! Locator configuration
//!
//! Everything here is serializable so front ends can persist it. The sync
//! parameters that the protocol fixes (skip, supervision timeout, the
//! confirmation timeout) are deliberately absent.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::host::{CteRxConfig, ScanParams};
use crate::watchdog::WatchdogConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Extended scan parameters
    pub scan: ScanParams,
    /// CTE sampling configuration applied once synced
    pub cte: CteRxConfig,
    /// Delay before retrying after scanning failed to start, in milliseconds
    pub scan_retry_delay_ms: u64,
    pub watchdog: WatchdogConfig,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            scan: ScanParams::default(),
            cte: CteRxConfig::aoa(),
            scan_retry_delay_ms: 1000,
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl LocatorConfig {
    pub fn scan_retry_delay(&self) -> Duration {
        Duration::from_millis(self.scan_retry_delay_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.scan.validate()?;
        self.cte.validate()?;
        self.watchdog.validate()?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CteTypeSet, ScanType, ANTENNA_PATTERN};

    #[test]
    fn test_default_config_is_valid() {
        let config = LocatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.scan_type, ScanType::Active);
        assert!(config.scan.filter_duplicates);
        assert_eq!(config.cte.antenna_ids, ANTENNA_PATTERN.to_vec());
        assert_eq!(config.scan_retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = LocatorConfig::default();
        config.cte = CteRxConfig::aod();
        config.watchdog.enabled = false;

        let json = config.to_json().expect("serialize");
        let parsed = LocatorConfig::from_json(&json).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_cte_config_rejected() {
        let mut config = LocatorConfig::default();
        config.cte.cte_types = CteTypeSet {
            aoa: false,
            aod_1us: false,
            aod_2us: false,
        };
        assert!(config.validate().is_err());
    }
}
