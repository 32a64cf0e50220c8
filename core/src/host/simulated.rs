//! Simulated BLE host
//!
//! Produces extended scan reports, sync establishment, periodic reports and
//! CTE IQ reports on tokio tasks, with timing driven by a [`SimScenario`].
//! It keeps a log of every request it receives so tests can assert on the
//! exact sequence of host calls.
//!
//! A sync that fails before establishment stays allocated until it is
//! deleted. A sync lost after establishment is released by the host itself.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::adv_data::AD_NAME_COMPLETE;
use super::types::{
    BleAddress, CteReport, CteRxConfig, CteType, IqSample, PacketStatus, PeriodicInterval,
    PeriodicReport, Phy, ScanParams, ScanReport, SyncCreateParams, SyncEstablishedInfo,
    SyncHandle, SyncTerminatedInfo,
};
use super::{
    BleHost, CteReportCallback, PeriodicReportCallback, ScanReportCallback,
    SyncEstablishedCallback, SyncTerminatedCallback,
};
use crate::error::HostError;
use async_trait::async_trait;

/// Number of sync handles the simulated controller can hand out
pub const SIM_MAX_SYNCS: u8 = 4;

/// IQ samples per CTE report: 8 reference samples plus one per 1 µs slot pair
const SIM_SAMPLE_COUNT: usize = 45;

/// HCI reason used when a pending sync fails to establish
pub const REASON_CONN_FAILED_TO_ESTABLISH: u8 = 0x3E;
/// HCI reason used when an established sync times out
pub const REASON_CONN_TIMEOUT: u8 = 0x08;

// ============================================================================
// SCENARIO
// ============================================================================

/// One advertiser visible to the simulated scanner
#[derive(Debug, Clone)]
pub struct SimAdvertiser {
    pub address: BleAddress,
    pub sid: u8,
    /// Periodic interval, [`PeriodicInterval::NONE`] for legacy/extended only
    pub interval: PeriodicInterval,
    pub name: Option<String>,
    pub rssi: i8,
    pub tx_power: i8,
    pub cte_type: CteType,
}

impl SimAdvertiser {
    pub fn periodic(address: BleAddress, sid: u8, interval: u16) -> Self {
        Self {
            address,
            sid,
            interval: PeriodicInterval(interval),
            name: Some("DF Connectionless Beacon".to_string()),
            rssi: -58,
            tx_power: 0,
            cte_type: CteType::Aoa,
        }
    }

    /// An advertiser with no periodic train
    pub fn non_periodic(address: BleAddress, sid: u8) -> Self {
        Self {
            interval: PeriodicInterval::NONE,
            name: None,
            ..Self::periodic(address, sid, 0)
        }
    }

    fn adv_data(&self) -> Vec<u8> {
        match &self.name {
            Some(name) => {
                let mut data = Vec::with_capacity(name.len() + 2);
                data.push((name.len() + 1) as u8);
                data.push(AD_NAME_COMPLETE);
                data.extend_from_slice(name.as_bytes());
                data
            }
            None => Vec::new(),
        }
    }
}

/// Timing and failure injection for a [`SimulatedHost`]
#[derive(Debug, Clone)]
pub struct SimScenario {
    pub advertisers: Vec<SimAdvertiser>,
    /// Period of scan reports for each advertiser while scanning
    pub scan_report_period: Duration,
    /// Delay from sync creation to establishment, `None` never establishes
    pub confirm_after: Option<Duration>,
    /// Delay from sync creation to a failed-to-establish termination
    pub terminate_before_sync: Option<Duration>,
    /// Lifetime of an established sync, `None` keeps it forever
    pub lose_after: Option<Duration>,
    /// Every n-th CTE report carries a CRC error
    pub crc_error_every: Option<u32>,
    /// Number of start-scan requests to reject before accepting
    pub scan_start_failures: u32,
    pub fail_create: bool,
    pub fail_delete: bool,
    pub fail_enable_cte: bool,
}

impl Default for SimScenario {
    fn default() -> Self {
        Self {
            advertisers: vec![SimAdvertiser::periodic(
                BleAddress::random([0x61, 0x3A, 0x2B, 0x1C, 0x0D, 0xC5]),
                0,
                0x0050,
            )],
            scan_report_period: Duration::from_millis(100),
            confirm_after: Some(Duration::from_millis(200)),
            terminate_before_sync: None,
            lose_after: Some(Duration::from_secs(10)),
            crc_error_every: None,
            scan_start_failures: 0,
            fail_create: false,
            fail_delete: false,
            fail_enable_cte: false,
        }
    }
}

/// A request received by the simulated host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    StartScan,
    StopScan,
    CreateSync { address: BleAddress, sid: u8 },
    DeleteSync(SyncHandle),
    EnableCteRx(SyncHandle),
}

// ============================================================================
// HOST
// ============================================================================

#[derive(Default)]
struct Callbacks {
    scan: Mutex<Option<ScanReportCallback>>,
    established: Mutex<Option<SyncEstablishedCallback>>,
    terminated: Mutex<Option<SyncTerminatedCallback>>,
    periodic: Mutex<Option<PeriodicReportCallback>>,
    cte: Mutex<Option<CteReportCallback>>,
}

struct SimSync {
    advertiser: SimAdvertiser,
    established: bool,
    cte: Option<CteRxConfig>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SimState {
    scan_task: Option<JoinHandle<()>>,
    syncs: BTreeMap<SyncHandle, SimSync>,
    calls: Vec<HostCall>,
    scan_failures: u32,
    cte_reports: u64,
}

struct SimInner {
    scenario: SimScenario,
    state: Mutex<SimState>,
    callbacks: Callbacks,
}

/// In-process [`BleHost`]. Must be used from within a tokio runtime.
pub struct SimulatedHost {
    inner: Arc<SimInner>,
}

impl SimulatedHost {
    pub fn new(scenario: SimScenario) -> Self {
        Self {
            inner: Arc::new(SimInner {
                scenario,
                state: Mutex::new(SimState::default()),
                callbacks: Callbacks::default(),
            }),
        }
    }

    pub fn scenario(&self) -> &SimScenario {
        &self.inner.scenario
    }

    /// Requests received so far, oldest first
    pub fn calls(&self) -> Vec<HostCall> {
        self.inner.state.lock().calls.clone()
    }

    /// Sync handles currently allocated
    pub fn active_syncs(&self) -> Vec<SyncHandle> {
        self.inner.state.lock().syncs.keys().copied().collect()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.state.lock().scan_task.is_some()
    }

    /// CTE reports delivered so far
    pub fn cte_reports_sent(&self) -> u64 {
        self.inner.state.lock().cte_reports
    }

    /// Stop every background task
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if let Some(task) = state.scan_task.take() {
            task.abort();
        }
        for sync in state.syncs.values_mut() {
            if let Some(task) = sync.task.take() {
                task.abort();
            }
        }
    }
}

impl Drop for SimulatedHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SimInner {
    fn record(&self, call: HostCall) {
        self.state.lock().calls.push(call);
    }

    fn emit_scan_report(&self, report: &ScanReport) {
        if let Some(cb) = self.callbacks.scan.lock().as_ref() {
            cb(report);
        }
    }

    fn emit_established(&self, info: &SyncEstablishedInfo) {
        if let Some(cb) = self.callbacks.established.lock().as_ref() {
            cb(info);
        }
    }

    fn emit_terminated(&self, info: &SyncTerminatedInfo) {
        if let Some(cb) = self.callbacks.terminated.lock().as_ref() {
            cb(info);
        }
    }

    fn emit_periodic_report(&self, report: &PeriodicReport) {
        if let Some(cb) = self.callbacks.periodic.lock().as_ref() {
            cb(report);
        }
    }

    fn emit_cte_report(&self, report: &CteReport) {
        if let Some(cb) = self.callbacks.cte.lock().as_ref() {
            cb(report);
        }
    }

    async fn scan_loop(self: Arc<Self>) {
        loop {
            for adv in &self.scenario.advertisers {
                let report = ScanReport {
                    address: adv.address,
                    sid: adv.sid,
                    rssi: adv.rssi,
                    tx_power: adv.tx_power,
                    interval: adv.interval,
                    primary_phy: Phy::Le1M,
                    secondary_phy: Phy::Le2M,
                    data: adv.adv_data(),
                };
                self.emit_scan_report(&report);
            }
            tokio::time::sleep(self.scenario.scan_report_period).await;
        }
    }

    fn terminated_info(handle: SyncHandle, adv: &SimAdvertiser, reason: u8) -> SyncTerminatedInfo {
        SyncTerminatedInfo {
            handle,
            address: adv.address,
            sid: adv.sid,
            reason,
        }
    }

    async fn sync_loop(self: Arc<Self>, handle: SyncHandle, adv: SimAdvertiser) {
        let scenario = &self.scenario;
        let fails_first = match (scenario.terminate_before_sync, scenario.confirm_after) {
            (Some(term), Some(confirm)) => term < confirm,
            (Some(_), None) => true,
            _ => false,
        };

        if fails_first {
            if let Some(delay) = scenario.terminate_before_sync {
                tokio::time::sleep(delay).await;
            }
            debug!("Sim: sync {} failed to establish", handle);
            self.emit_terminated(&Self::terminated_info(
                handle,
                &adv,
                REASON_CONN_FAILED_TO_ESTABLISH,
            ));
            return;
        }

        let Some(confirm_after) = scenario.confirm_after else {
            // Stays pending until deleted.
            return;
        };
        tokio::time::sleep(confirm_after).await;

        match self.state.lock().syncs.get_mut(&handle) {
            Some(sync) => sync.established = true,
            None => return,
        }
        self.emit_established(&SyncEstablishedInfo {
            handle,
            address: adv.address,
            sid: adv.sid,
            interval: adv.interval,
            phy: Phy::Le2M,
        });

        let established_at = Instant::now();
        let period = adv.interval.as_duration().max(Duration::from_millis(1));
        let mut event_counter: u32 = 0;
        loop {
            tokio::time::sleep(period).await;

            if let Some(lifetime) = scenario.lose_after {
                if established_at.elapsed() >= lifetime {
                    self.state.lock().syncs.remove(&handle);
                    debug!("Sim: sync {} lost", handle);
                    self.emit_terminated(&Self::terminated_info(handle, &adv, REASON_CONN_TIMEOUT));
                    return;
                }
            }

            event_counter = event_counter.wrapping_add(1);
            self.emit_periodic_report(&PeriodicReport {
                handle,
                address: adv.address,
                tx_power: adv.tx_power,
                rssi: adv.rssi,
                cte_type: adv.cte_type,
                data: event_counter.to_le_bytes().to_vec(),
            });

            let cte = self
                .state
                .lock()
                .syncs
                .get(&handle)
                .and_then(|sync| sync.cte.clone());
            if let Some(cte) = cte {
                if cte.cte_types.contains(adv.cte_type) {
                    let report = self.next_cte_report(handle, &adv, &cte, event_counter);
                    self.emit_cte_report(&report);
                }
            }
        }
    }

    fn next_cte_report(
        &self,
        handle: SyncHandle,
        adv: &SimAdvertiser,
        cte: &CteRxConfig,
        event_counter: u32,
    ) -> CteReport {
        let sequence = {
            let mut state = self.state.lock();
            state.cte_reports += 1;
            state.cte_reports
        };
        let crc_error = self
            .scenario
            .crc_error_every
            .map_or(false, |n| n > 0 && sequence % u64::from(n) == 0);

        let samples = (0..SIM_SAMPLE_COUNT)
            .map(|k| {
                let phase = event_counter.wrapping_mul(37).wrapping_add(k as u32 * 11);
                IqSample::new((phase % 256) as u8 as i8, (phase.wrapping_mul(7) % 256) as u8 as i8)
            })
            .collect();

        CteReport {
            handle,
            channel_index: (event_counter % 37) as u8,
            rssi: i16::from(adv.rssi) * 10,
            rssi_antenna_id: cte.antenna_ids.first().copied().unwrap_or(0),
            cte_type: adv.cte_type,
            slot_durations: cte.slot_durations,
            packet_status: if crc_error {
                PacketStatus::CrcErrCteBasedTime
            } else {
                PacketStatus::CrcOk
            },
            samples,
        }
    }
}

#[async_trait]
impl BleHost for SimulatedHost {
    async fn start_scan(&self, params: &ScanParams) -> Result<(), HostError> {
        self.inner.record(HostCall::StartScan);
        let mut state = self.inner.state.lock();
        if state.scan_failures < self.inner.scenario.scan_start_failures {
            state.scan_failures += 1;
            return Err(HostError::rejected("start scan", -5));
        }
        if state.scan_task.is_some() {
            return Err(HostError::rejected("start scan", -114));
        }
        info!(
            "Sim: scanning ({:?}, interval 0x{:04x}, window 0x{:04x})",
            params.scan_type, params.interval, params.window
        );
        state.scan_task = Some(tokio::spawn(self.inner.clone().scan_loop()));
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), HostError> {
        self.inner.record(HostCall::StopScan);
        match self.inner.state.lock().scan_task.take() {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Err(HostError::rejected("stop scan", -114)),
        }
    }

    async fn create_periodic_sync(
        &self,
        params: &SyncCreateParams,
    ) -> Result<SyncHandle, HostError> {
        self.inner.record(HostCall::CreateSync {
            address: params.address,
            sid: params.sid,
        });
        if self.inner.scenario.fail_create {
            return Err(HostError::rejected("create periodic sync", -12));
        }

        let advertiser = self
            .inner
            .scenario
            .advertisers
            .iter()
            .find(|a| a.address == params.address && a.sid == params.sid)
            .cloned()
            .ok_or(HostError::rejected("create periodic sync", -22))?;

        let mut state = self.inner.state.lock();
        if !state.syncs.is_empty() {
            return Err(HostError::rejected("create periodic sync", -16));
        }
        let handle = (0..SIM_MAX_SYNCS)
            .map(SyncHandle)
            .find(|h| !state.syncs.contains_key(h))
            .ok_or(HostError::rejected("create periodic sync", -12))?;

        let task = tokio::spawn(self.inner.clone().sync_loop(handle, advertiser.clone()));
        state.syncs.insert(
            handle,
            SimSync {
                advertiser,
                established: false,
                cte: None,
                task: Some(task),
            },
        );
        Ok(handle)
    }

    async fn delete_periodic_sync(&self, handle: SyncHandle) -> Result<(), HostError> {
        self.inner.record(HostCall::DeleteSync(handle));
        if self.inner.scenario.fail_delete {
            return Err(HostError::rejected("delete periodic sync", -5));
        }
        let mut sync = self
            .inner
            .state
            .lock()
            .syncs
            .remove(&handle)
            .ok_or(HostError::InvalidHandle(handle))?;
        if let Some(task) = sync.task.take() {
            task.abort();
        }
        debug!("Sim: sync {} to {} deleted", handle, sync.advertiser.address);
        Ok(())
    }

    async fn enable_cte_rx(
        &self,
        handle: SyncHandle,
        config: &CteRxConfig,
    ) -> Result<(), HostError> {
        self.inner.record(HostCall::EnableCteRx(handle));
        if self.inner.scenario.fail_enable_cte {
            return Err(HostError::rejected("enable CTE rx", -22));
        }
        let mut state = self.inner.state.lock();
        match state.syncs.get_mut(&handle) {
            Some(sync) if sync.established => {
                sync.cte = Some(config.clone());
                Ok(())
            }
            _ => Err(HostError::InvalidHandle(handle)),
        }
    }

    fn set_on_scan_report(&self, callback: ScanReportCallback) {
        *self.inner.callbacks.scan.lock() = Some(callback);
    }

    fn set_on_sync_established(&self, callback: SyncEstablishedCallback) {
        *self.inner.callbacks.established.lock() = Some(callback);
    }

    fn set_on_sync_terminated(&self, callback: SyncTerminatedCallback) {
        *self.inner.callbacks.terminated.lock() = Some(callback);
    }

    fn set_on_periodic_report(&self, callback: PeriodicReportCallback) {
        *self.inner.callbacks.periodic.lock() = Some(callback);
    }

    fn set_on_cte_report(&self, callback: CteReportCallback) {
        *self.inner.callbacks.cte.lock() = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SyncOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn beacon() -> BleAddress {
        BleAddress::random([0x61, 0x3A, 0x2B, 0x1C, 0x0D, 0xC5])
    }

    fn create_params() -> SyncCreateParams {
        SyncCreateParams {
            address: beacon(),
            sid: 0,
            options: SyncOptions::cte_only(),
            skip: 0,
            timeout: 0x000A,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_reports_delivered_until_stopped() {
        let host = SimulatedHost::new(SimScenario::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        host.set_on_scan_report(Box::new(move |report: &ScanReport| {
            assert_eq!(report.interval, PeriodicInterval(0x0050));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        host.start_scan(&ScanParams::default()).await.expect("scan");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        host.stop_scan().await.expect("stop");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert!(!host.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_start_failures_are_injected() {
        let host = SimulatedHost::new(SimScenario {
            scan_start_failures: 1,
            ..SimScenario::default()
        });
        assert!(host.start_scan(&ScanParams::default()).await.is_err());
        assert!(host.start_scan(&ScanParams::default()).await.is_ok());
        assert_eq!(host.calls(), vec![HostCall::StartScan, HostCall::StartScan]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_sync_at_a_time() {
        let host = SimulatedHost::new(SimScenario::default());
        let handle = host.create_periodic_sync(&create_params()).await.expect("create");
        assert_eq!(handle, SyncHandle(0));
        assert!(host.create_periodic_sync(&create_params()).await.is_err());

        host.delete_periodic_sync(handle).await.expect("delete");
        assert!(host.active_syncs().is_empty());
        assert_eq!(
            host.delete_periodic_sync(handle).await,
            Err(HostError::InvalidHandle(handle))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cte_enable_requires_established_sync() {
        let host = SimulatedHost::new(SimScenario::default());
        let handle = host.create_periodic_sync(&create_params()).await.expect("create");
        assert!(host.enable_cte_rx(handle, &CteRxConfig::aoa()).await.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(host.enable_cte_rx(handle, &CteRxConfig::aoa()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_established_sync_emits_cte_reports_then_is_lost() {
        let host = SimulatedHost::new(SimScenario {
            lose_after: Some(Duration::from_millis(1000)),
            crc_error_every: Some(2),
            ..SimScenario::default()
        });
        let lost = Arc::new(AtomicUsize::new(0));
        let lost_counter = lost.clone();
        host.set_on_sync_terminated(Box::new(move |info: &SyncTerminatedInfo| {
            assert_eq!(info.reason, REASON_CONN_TIMEOUT);
            lost_counter.fetch_add(1, Ordering::SeqCst);
        }));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();
        host.set_on_cte_report(Box::new(move |report: &CteReport| {
            assert_eq!(report.samples.len(), SIM_SAMPLE_COUNT);
            sink.lock().push(report.packet_status);
        }));

        let handle = host.create_periodic_sync(&create_params()).await.expect("create");
        tokio::time::sleep(Duration::from_millis(210)).await;
        host.enable_cte_rx(handle, &CteRxConfig::aoa()).await.expect("enable");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert!(host.active_syncs().is_empty());

        let statuses = statuses.lock().clone();
        assert!(statuses.len() >= 8);
        assert_eq!(statuses[0], PacketStatus::CrcOk);
        assert_eq!(statuses[1], PacketStatus::CrcErrCteBasedTime);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_establishment_keeps_handle_until_deleted() {
        let host = SimulatedHost::new(SimScenario {
            confirm_after: None,
            terminate_before_sync: Some(Duration::from_millis(50)),
            ..SimScenario::default()
        });
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = reasons.clone();
        host.set_on_sync_terminated(Box::new(move |info: &SyncTerminatedInfo| {
            sink.lock().push(info.reason);
        }));

        let handle = host.create_periodic_sync(&create_params()).await.expect("create");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reasons.lock().clone(), vec![REASON_CONN_FAILED_TO_ESTABLISH]);
        assert_eq!(host.active_syncs(), vec![handle]);

        host.delete_periodic_sync(handle).await.expect("delete");
        assert!(host.active_syncs().is_empty());
    }

    #[test]
    fn test_advertiser_data_carries_complete_name() {
        let adv = SimAdvertiser::periodic(beacon(), 0, 0x50);
        let name = crate::host::adv_data::local_name(&adv.adv_data());
        assert_eq!(name.as_deref(), Some("DF Connectionless Beacon"));
        assert!(SimAdvertiser::non_periodic(beacon(), 1).adv_data().is_empty());
    }
}
