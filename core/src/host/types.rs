//! Value types exchanged with the BLE host stack.
//!
//! Units follow the Bluetooth Core specification: scan timing in 0.625 ms,
//! periodic advertising intervals in 1.25 ms, sync timeouts in 10 ms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// ADDRESSING
// ============================================================================

/// Address type of an LE device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Public => write!(f, "public"),
            AddressKind::Random => write!(f, "random"),
            AddressKind::PublicIdentity => write!(f, "public-id"),
            AddressKind::RandomIdentity => write!(f, "random-id"),
        }
    }
}

/// LE device address. Bytes are stored in on-air (little-endian) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BleAddress {
    pub kind: AddressKind,
    pub bytes: [u8; 6],
}

impl BleAddress {
    pub fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }

    pub fn random(bytes: [u8; 6]) -> Self {
        Self::new(AddressKind::Random, bytes)
    }

    pub fn public(bytes: [u8; 6]) -> Self {
        Self::new(AddressKind::Public, bytes)
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ({})",
            b[5], b[4], b[3], b[2], b[1], b[0], self.kind
        )
    }
}

// ============================================================================
// PERIODIC ADVERTISING
// ============================================================================

/// Periodic advertising interval in units of 1.25 ms.
///
/// Zero is the "no periodic advertising" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PeriodicInterval(pub u16);

impl PeriodicInterval {
    pub const NONE: PeriodicInterval = PeriodicInterval(0);

    pub fn is_periodic(&self) -> bool {
        self.0 != 0
    }

    /// Interval in whole milliseconds (`units * 5 / 4`).
    pub fn as_millis(&self) -> u32 {
        u32::from(self.0) * 5 / 4
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.0) * 1250)
    }
}

impl fmt::Display for PeriodicInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x} ({} ms)", self.0, self.as_millis())
    }
}

/// Handle of a periodic advertising sync, as indexed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncHandle(pub u8);

impl fmt::Display for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phy {
    NoPackets,
    Le1M,
    Le2M,
    LeCoded,
    Unknown(u8),
}

impl From<u8> for Phy {
    fn from(value: u8) -> Self {
        match value {
            0 => Phy::NoPackets,
            1 => Phy::Le1M,
            2 => Phy::Le2M,
            3 => Phy::LeCoded,
            other => Phy::Unknown(other),
        }
    }
}

impl fmt::Display for Phy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phy::NoPackets => write!(f, "No packets"),
            Phy::Le1M => write!(f, "LE 1M"),
            Phy::Le2M => write!(f, "LE 2M"),
            Phy::LeCoded => write!(f, "LE Coded"),
            Phy::Unknown(_) => write!(f, "Unknown"),
        }
    }
}

// ============================================================================
// CONSTANT TONE EXTENSION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CteType {
    Aoa,
    Aod1us,
    Aod2us,
    None,
    Unknown(u8),
}

impl CteType {
    /// Raw value as carried in HCI reports.
    pub fn code(&self) -> u8 {
        match self {
            CteType::Aoa => 0,
            CteType::Aod1us => 1,
            CteType::Aod2us => 2,
            CteType::None => 0xFF,
            CteType::Unknown(code) => *code,
        }
    }
}

impl From<u8> for CteType {
    fn from(value: u8) -> Self {
        match value {
            0 => CteType::Aoa,
            1 => CteType::Aod1us,
            2 => CteType::Aod2us,
            0xFF => CteType::None,
            other => CteType::Unknown(other),
        }
    }
}

impl fmt::Display for CteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CteType::Aoa => write!(f, "AOA"),
            CteType::Aod1us => write!(f, "AOD 1 [us]"),
            CteType::Aod2us => write!(f, "AOD 2 [us]"),
            CteType::None => Ok(()),
            CteType::Unknown(_) => write!(f, "Unknown"),
        }
    }
}

/// Set of CTE types the receiver should sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CteTypeSet {
    pub aoa: bool,
    pub aod_1us: bool,
    pub aod_2us: bool,
}

impl CteTypeSet {
    pub const ALL: CteTypeSet = CteTypeSet {
        aoa: true,
        aod_1us: true,
        aod_2us: true,
    };

    pub const AOD: CteTypeSet = CteTypeSet {
        aoa: false,
        aod_1us: true,
        aod_2us: true,
    };

    pub fn contains(&self, cte_type: CteType) -> bool {
        match cte_type {
            CteType::Aoa => self.aoa,
            CteType::Aod1us => self.aod_1us,
            CteType::Aod2us => self.aod_2us,
            CteType::None | CteType::Unknown(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.aoa || self.aod_1us || self.aod_2us)
    }
}

/// Packet status of a received CTE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketStatus {
    CrcOk,
    CrcErrCteBasedTime,
    CrcErrCteBasedOther,
    InsufficientResources,
    Unknown(u8),
}

impl PacketStatus {
    pub fn code(&self) -> u8 {
        match self {
            PacketStatus::CrcOk => 0,
            PacketStatus::CrcErrCteBasedTime => 1,
            PacketStatus::CrcErrCteBasedOther => 2,
            PacketStatus::InsufficientResources => 0xFF,
            PacketStatus::Unknown(code) => *code,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == PacketStatus::CrcOk
    }
}

impl From<u8> for PacketStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => PacketStatus::CrcOk,
            1 => PacketStatus::CrcErrCteBasedTime,
            2 => PacketStatus::CrcErrCteBasedOther,
            0xFF => PacketStatus::InsufficientResources,
            other => PacketStatus::Unknown(other),
        }
    }
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketStatus::CrcOk => write!(f, "CRC OK"),
            PacketStatus::CrcErrCteBasedTime => write!(f, "CRC not OK, CTE Info OK"),
            PacketStatus::CrcErrCteBasedOther => write!(f, "CRC not OK, Sampled other way"),
            PacketStatus::InsufficientResources => write!(f, "No resources"),
            PacketStatus::Unknown(_) => write!(f, "Unknown"),
        }
    }
}

/// A single IQ sample pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IqSample {
    pub i: i8,
    pub q: i8,
}

impl IqSample {
    pub fn new(i: i8, q: i8) -> Self {
        Self { i, q }
    }
}

// ============================================================================
// REQUEST PARAMETERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanType {
    Active,
    Passive,
}

/// Scan parameters handed to the host when scanning starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    pub scan_type: ScanType,
    /// Ask the controller to drop duplicate advertising reports
    pub filter_duplicates: bool,
    /// Scan interval in 0.625 ms units
    pub interval: u16,
    /// Scan window in 0.625 ms units
    pub window: u16,
    /// Scan timeout in 10 ms units, 0 disables the timeout
    pub timeout: u16,
}

/// Fast scan interval (60 ms)
pub const SCAN_FAST_INTERVAL: u16 = 0x0060;
/// Fast scan window (30 ms)
pub const SCAN_FAST_WINDOW: u16 = 0x0030;

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_type: ScanType::Active,
            filter_duplicates: true,
            interval: SCAN_FAST_INTERVAL,
            window: SCAN_FAST_WINDOW,
            timeout: 0,
        }
    }
}

impl ScanParams {
    /// Validate the parameters against the ranges the controller accepts
    pub fn validate(&self) -> Result<(), String> {
        if !(0x0004..=0x4000).contains(&self.interval) {
            return Err(format!("scan interval 0x{:04x} out of range", self.interval));
        }
        if self.window == 0 || self.window > self.interval {
            return Err("Scan window must be > 0 and <= scan interval".to_string());
        }
        Ok(())
    }
}

/// Options for periodic advertising sync creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Only synchronize to trains that carry a constant tone extension
    pub sync_only_with_cte: bool,
    pub filter_duplicates: bool,
    pub dont_sync_aoa: bool,
    pub dont_sync_aod_1us: bool,
    pub dont_sync_aod_2us: bool,
}

impl SyncOptions {
    pub fn cte_only() -> Self {
        Self {
            sync_only_with_cte: true,
            ..Self::default()
        }
    }
}

/// Minimum supervision timeout used when syncing (10 ms units, 100 ms)
pub const SYNC_SUPERVISION_TIMEOUT: u16 = 0x000A;

/// Parameters for a "create periodic sync" request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCreateParams {
    pub address: BleAddress,
    pub sid: u8,
    pub options: SyncOptions,
    /// Number of periodic events that may be skipped
    pub skip: u16,
    /// Supervision timeout in 10 ms units
    pub timeout: u16,
}

/// Antenna switch pattern used for AoA sampling
pub const ANTENNA_PATTERN: [u8; 9] = [0x6, 0x4, 0x6, 0x6, 0x6, 0x5, 0x6, 0x6, 0x6];

/// Slot duration code for 1 µs switching/sampling slots
pub const SLOT_DURATION_1US: u8 = 0x2;
/// Slot duration code for 2 µs switching/sampling slots
pub const SLOT_DURATION_2US: u8 = 0x1;

/// CTE receive configuration forwarded to the host once synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CteRxConfig {
    pub max_cte_count: u8,
    pub cte_types: CteTypeSet,
    pub slot_durations: u8,
    pub antenna_ids: Vec<u8>,
}

impl CteRxConfig {
    /// Angle-of-arrival receiver: samples every CTE type with 1 µs slots
    /// and switches antennas along [`ANTENNA_PATTERN`].
    pub fn aoa() -> Self {
        Self {
            max_cte_count: 5,
            cte_types: CteTypeSet::ALL,
            slot_durations: SLOT_DURATION_1US,
            antenna_ids: ANTENNA_PATTERN.to_vec(),
        }
    }

    /// Angle-of-departure receiver: the transmitter switches, no pattern here.
    pub fn aod() -> Self {
        Self {
            max_cte_count: 5,
            cte_types: CteTypeSet::AOD,
            slot_durations: SLOT_DURATION_1US,
            antenna_ids: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cte_types.is_empty() {
            return Err("at least one CTE type must be enabled".to_string());
        }
        if self.max_cte_count > 0x10 {
            return Err(format!("max_cte_count {} exceeds 16", self.max_cte_count));
        }
        if self.slot_durations != SLOT_DURATION_1US && self.slot_durations != SLOT_DURATION_2US {
            return Err(format!("invalid slot duration code {}", self.slot_durations));
        }
        if self.cte_types.aoa && self.antenna_ids.len() < 2 {
            return Err("AoA sampling needs an antenna pattern of at least 2 entries".to_string());
        }
        Ok(())
    }
}

impl Default for CteRxConfig {
    fn default() -> Self {
        Self::aoa()
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Extended scan report
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub address: BleAddress,
    pub sid: u8,
    pub rssi: i8,
    pub tx_power: i8,
    pub interval: PeriodicInterval,
    pub primary_phy: Phy,
    pub secondary_phy: Phy,
    /// Raw AD structures
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SyncEstablishedInfo {
    pub handle: SyncHandle,
    pub address: BleAddress,
    pub sid: u8,
    pub interval: PeriodicInterval,
    pub phy: Phy,
}

#[derive(Debug, Clone)]
pub struct SyncTerminatedInfo {
    pub handle: SyncHandle,
    pub address: BleAddress,
    pub sid: u8,
    /// HCI reason code, when the host exposes one
    pub reason: u8,
}

/// Periodic advertising report received over an established sync
#[derive(Debug, Clone)]
pub struct PeriodicReport {
    pub handle: SyncHandle,
    pub address: BleAddress,
    pub tx_power: i8,
    pub rssi: i8,
    pub cte_type: CteType,
    pub data: Vec<u8>,
}

/// IQ samples report for one received CTE
#[derive(Debug, Clone)]
pub struct CteReport {
    pub handle: SyncHandle,
    pub channel_index: u8,
    /// RSSI in 0.1 dBm
    pub rssi: i16,
    pub rssi_antenna_id: u8,
    pub cte_type: CteType,
    pub slot_durations: u8,
    pub packet_status: PacketStatus,
    pub samples: Vec<IqSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_is_msb_first() {
        let addr = BleAddress::random([0x01, 0x02, 0x03, 0x04, 0x05, 0xC6]);
        assert_eq!(addr.to_string(), "C6:05:04:03:02:01 (random)");
    }

    #[test]
    fn test_periodic_interval_conversion() {
        assert_eq!(PeriodicInterval(100).as_millis(), 125);
        assert_eq!(PeriodicInterval(6).as_millis(), 7);
        assert_eq!(PeriodicInterval(1).as_millis(), 1);
        assert_eq!(PeriodicInterval(100).as_duration(), Duration::from_millis(125));
        assert!(!PeriodicInterval::NONE.is_periodic());
        assert_eq!(PeriodicInterval(0x50).to_string(), "0x0050 (100 ms)");
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(PacketStatus::from(0).to_string(), "CRC OK");
        assert_eq!(PacketStatus::from(1).to_string(), "CRC not OK, CTE Info OK");
        assert_eq!(PacketStatus::from(2).to_string(), "CRC not OK, Sampled other way");
        assert_eq!(PacketStatus::from(0xFF).to_string(), "No resources");
        assert_eq!(PacketStatus::from(7).to_string(), "Unknown");
        assert_eq!(PacketStatus::from(7).code(), 7);
    }

    #[test]
    fn test_cte_type_strings() {
        assert_eq!(CteType::from(0).to_string(), "AOA");
        assert_eq!(CteType::from(1).to_string(), "AOD 1 [us]");
        assert_eq!(CteType::from(2).to_string(), "AOD 2 [us]");
        assert_eq!(CteType::from(0xFF).to_string(), "");
        assert_eq!(CteType::from(9).to_string(), "Unknown");
    }

    #[test]
    fn test_phy_strings() {
        assert_eq!(Phy::from(0).to_string(), "No packets");
        assert_eq!(Phy::from(1).to_string(), "LE 1M");
        assert_eq!(Phy::from(2).to_string(), "LE 2M");
        assert_eq!(Phy::from(3).to_string(), "LE Coded");
        assert_eq!(Phy::from(4).to_string(), "Unknown");
    }

    #[test]
    fn test_scan_params_validation() {
        assert!(ScanParams::default().validate().is_ok());

        let params = ScanParams {
            window: 0x0100,
            ..ScanParams::default()
        };
        assert!(params.validate().is_err());

        let params = ScanParams {
            interval: 0,
            ..ScanParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_cte_rx_presets() {
        let aoa = CteRxConfig::aoa();
        assert_eq!(aoa.max_cte_count, 5);
        assert_eq!(aoa.slot_durations, 0x2);
        assert_eq!(aoa.antenna_ids, ANTENNA_PATTERN.to_vec());
        assert!(aoa.cte_types.contains(CteType::Aoa));
        assert!(aoa.validate().is_ok());

        let aod = CteRxConfig::aod();
        assert!(!aod.cte_types.contains(CteType::Aoa));
        assert!(aod.cte_types.contains(CteType::Aod2us));
        assert!(aod.antenna_ids.is_empty());
        assert!(aod.validate().is_ok());
    }

    #[test]
    fn test_cte_rx_validation_rejects_aoa_without_pattern() {
        let config = CteRxConfig {
            antenna_ids: vec![0x6],
            ..CteRxConfig::aoa()
        };
        assert!(config.validate().is_err());

        let config = CteRxConfig {
            cte_types: CteTypeSet {
                aoa: false,
                aod_1us: false,
                aod_2us: false,
            },
            ..CteRxConfig::aod()
        };
        assert!(config.validate().is_err());
    }
}
