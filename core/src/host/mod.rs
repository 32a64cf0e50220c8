/// BLE host abstraction
///
/// The locator never talks to a radio directly. Everything it needs from a
/// Bluetooth stack goes through [`BleHost`]: scanning, creating and deleting
/// periodic advertising syncs, and enabling CTE sampling. Asynchronous
/// events come back through callbacks registered with the `set_on_*`
/// methods; the host may invoke them from its own tasks or threads.
///
/// - **types**: addresses, reports and request parameters
/// - **adv_data**: AD structure parsing used for diagnostics
/// - **simulated**: an in-process host that produces plausible traffic

pub mod adv_data;
pub mod simulated;
pub mod types;

use async_trait::async_trait;

use crate::error::HostError;

pub use simulated::{HostCall, SimAdvertiser, SimScenario, SimulatedHost};
pub use types::{
    AddressKind, BleAddress, CteReport, CteRxConfig, CteType, CteTypeSet, IqSample, PacketStatus,
    PeriodicInterval, PeriodicReport, Phy, ScanParams, ScanReport, ScanType, SyncCreateParams,
    SyncEstablishedInfo, SyncHandle, SyncOptions, SyncTerminatedInfo, ANTENNA_PATTERN,
    SYNC_SUPERVISION_TIMEOUT,
};

pub type ScanReportCallback = Box<dyn Fn(&ScanReport) + Send + Sync>;
pub type SyncEstablishedCallback = Box<dyn Fn(&SyncEstablishedInfo) + Send + Sync>;
pub type SyncTerminatedCallback = Box<dyn Fn(&SyncTerminatedInfo) + Send + Sync>;
pub type PeriodicReportCallback = Box<dyn Fn(&PeriodicReport) + Send + Sync>;
pub type CteReportCallback = Box<dyn Fn(&CteReport) + Send + Sync>;

/// Host-stack API consumed by the locator
///
/// Implementers wrap a real controller (HCI, vendor SDK) or simulate one.
#[async_trait]
pub trait BleHost: Send + Sync {
    /// Start extended scanning
    async fn start_scan(&self, params: &ScanParams) -> Result<(), HostError>;

    /// Stop scanning
    async fn stop_scan(&self) -> Result<(), HostError>;

    /// Request synchronization to a periodic advertising train.
    ///
    /// Success only means the request was accepted; establishment is
    /// reported later through the sync-established callback.
    async fn create_periodic_sync(
        &self,
        params: &SyncCreateParams,
    ) -> Result<SyncHandle, HostError>;

    /// Delete a pending or established sync
    async fn delete_periodic_sync(&self, handle: SyncHandle) -> Result<(), HostError>;

    /// Enable IQ sampling of CTEs received on an established sync
    async fn enable_cte_rx(
        &self,
        handle: SyncHandle,
        config: &CteRxConfig,
    ) -> Result<(), HostError>;

    /// Register callback for extended scan reports
    fn set_on_scan_report(&self, callback: ScanReportCallback);

    /// Register callback for sync established
    fn set_on_sync_established(&self, callback: SyncEstablishedCallback);

    /// Register callback for sync terminated (lost, or failed to establish)
    fn set_on_sync_terminated(&self, callback: SyncTerminatedCallback);

    /// Register callback for periodic advertising reports on a sync
    fn set_on_periodic_report(&self, callback: PeriodicReportCallback);

    /// Register callback for CTE IQ sample reports
    fn set_on_cte_report(&self, callback: CteReportCallback);
}
