//! Sync lifecycle controller
//!
//! Drives one periodic advertising sync at a time through
//! scan → candidate → create → confirm/timeout → CTE sampling → loss,
//! then starts over. Host callbacks never touch the session directly:
//! they go through [`EventRouter`], which decides under the session lock
//! which wait (confirmation or loss) an event resolves, or drops it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::session::{SyncSession, SyncState, TerminationReason};
use crate::config::LocatorConfig;
use crate::error::{HostError, LocatorError};
use crate::filter::{AdvertisingCandidate, AdvertisingFilter};
use crate::host::{
    BleHost, CteReport, PeriodicReport, ScanReport, SyncCreateParams, SyncEstablishedInfo, SyncHandle, SyncOptions,
    SyncTerminatedInfo, SYNC_SUPERVISION_TIMEOUT,
};
use crate::iq::IqReportLogger;
use crate::signal::BinarySignal;

/// How a single scan/sync cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOutcome {
    /// Sync was established, sampled, then lost
    SyncLost,
    /// No establishment within seven periodic intervals
    ConfirmationTimeout,
    /// The host terminated the sync before it was established
    TerminatedBeforeSync,
    /// The host refused the create request
    CreateRejected,
    /// The host refused to enable CTE sampling
    CteEnableRejected,
    /// Scanning could not be started
    ScanStartFailed,
}

/// First event seen while waiting for establishment
#[derive(Debug, Clone)]
enum Confirmation {
    Established(SyncEstablishedInfo),
    Terminated(SyncTerminatedInfo),
}

impl Confirmation {
    fn handle(&self) -> SyncHandle {
        match self {
            Confirmation::Established(info) => info.handle,
            Confirmation::Terminated(info) => info.handle,
        }
    }
}

/// Routes host sync notifications to the wait the controller is blocked on.
///
/// An accepted establishment moves the session to [`SyncState::Synced`]
/// under the session lock, so a termination that follows it is always
/// routed to the loss wait.
struct EventRouter {
    session: Arc<Mutex<SyncSession>>,
    confirmation: BinarySignal<Confirmation>,
    lost: BinarySignal<SyncTerminatedInfo>,
}

impl EventRouter {
    /// Creating is included because a fast host may report establishment
    /// before the create call has returned the handle to us.
    fn expects_confirmation(session: &SyncSession, handle: SyncHandle) -> bool {
        match session.state {
            SyncState::Creating => session.handle.map_or(true, |h| h == handle),
            SyncState::AwaitingConfirmation => session.owns(handle),
            _ => false,
        }
    }

    fn on_sync_established(&self, info: &SyncEstablishedInfo) {
        info!(
            "PER_ADV_SYNC[{}]: [DEVICE]: {} synced, Interval {}, PHY {}",
            info.handle, info.address, info.interval, info.phy
        );

        let mut session = self.session.lock();
        if Self::expects_confirmation(&session, info.handle) {
            if self.confirmation.give(Confirmation::Established(info.clone())) {
                session.state = SyncState::Synced;
                session.handle = Some(info.handle);
            }
        } else {
            debug!(
                "Ignoring sync established for {} in state {}",
                info.handle, session.state
            );
        }
    }

    fn on_sync_terminated(&self, info: &SyncTerminatedInfo) {
        info!(
            "PER_ADV_SYNC[{}]: [DEVICE]: {} sync terminated (reason 0x{:02x})",
            info.handle, info.address, info.reason
        );

        let session = self.session.lock();
        if Self::expects_confirmation(&session, info.handle) {
            self.confirmation.give(Confirmation::Terminated(info.clone()));
        } else if session.state == SyncState::Synced && session.owns(info.handle) {
            self.lost.give(info.clone());
        } else {
            debug!(
                "Ignoring sync terminated for {} in state {}",
                info.handle, session.state
            );
        }
    }

    fn on_periodic_report(&self, report: &PeriodicReport) {
        info!(
            "PER_ADV_SYNC[{}]: [DEVICE]: {}, tx_power {}, RSSI {}, CTE {}, data length {}, data: {}",
            report.handle,
            report.address,
            report.tx_power,
            report.rssi,
            report.cte_type,
            report.data.len(),
            hex::encode(&report.data)
        );
    }
}

/// The locator's control loop
pub struct SyncController {
    host: Arc<dyn BleHost>,
    config: LocatorConfig,
    filter: Arc<AdvertisingFilter>,
    router: Arc<EventRouter>,
    session: Arc<Mutex<SyncSession>>,
    scanning: bool,
}

impl SyncController {
    /// Create a controller and register its callbacks with the host
    pub fn new(
        host: Arc<dyn BleHost>,
        config: LocatorConfig,
        iq_logger: Arc<IqReportLogger>,
    ) -> Result<Self, LocatorError> {
        config.validate().map_err(LocatorError::Config)?;

        let session = Arc::new(Mutex::new(SyncSession::idle()));
        let router = Arc::new(EventRouter {
            session: session.clone(),
            confirmation: BinarySignal::new(),
            lost: BinarySignal::new(),
        });
        let filter = Arc::new(AdvertisingFilter::new());

        info!("Scan callbacks register...");
        let scan_filter = filter.clone();
        host.set_on_scan_report(Box::new(move |report: &ScanReport| {
            scan_filter.on_scan_report(report);
        }));

        info!("Periodic Advertising callbacks register...");
        let r = router.clone();
        host.set_on_sync_established(Box::new(move |info: &SyncEstablishedInfo| {
            r.on_sync_established(info)
        }));
        let r = router.clone();
        host.set_on_sync_terminated(Box::new(move |info: &SyncTerminatedInfo| {
            r.on_sync_terminated(info)
        }));
        let r = router.clone();
        host.set_on_periodic_report(Box::new(move |report: &PeriodicReport| {
            r.on_periodic_report(report)
        }));
        host.set_on_cte_report(Box::new(move |report: &CteReport| {
            iq_logger.on_cte_report(report)
        }));

        Ok(Self {
            host,
            config,
            filter,
            router,
            session,
            scanning: false,
        })
    }

    pub fn state(&self) -> SyncState {
        self.session.lock().state
    }

    /// Snapshot of the current session
    pub fn session(&self) -> SyncSession {
        self.session.lock().clone()
    }

    pub fn awaiting_initial_sync(&self) -> bool {
        self.session.lock().awaiting_initial_sync()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Run cycles until a fatal error occurs
    pub async fn run(&mut self) -> Result<(), LocatorError> {
        info!("Starting Connectionless Locator");
        loop {
            let outcome = self.run_cycle().await?;
            self.after_cycle(outcome).await;
        }
    }

    /// Run exactly `cycles` cycles, stopping early on a fatal error
    pub async fn run_cycles(&mut self, cycles: usize) -> Result<Vec<CycleOutcome>, LocatorError> {
        let mut outcomes = Vec::with_capacity(cycles);
        for _ in 0..cycles {
            let outcome = self.run_cycle().await?;
            outcomes.push(outcome);
            self.after_cycle(outcome).await;
        }
        Ok(outcomes)
    }

    async fn after_cycle(&self, outcome: CycleOutcome) {
        debug!("Cycle finished: {:?}", outcome);
        if outcome == CycleOutcome::ScanStartFailed {
            tokio::time::sleep(self.config.scan_retry_delay()).await;
        }
    }

    /// One full cycle. Starts and ends in [`SyncState::Idle`] unless a
    /// fatal error is returned.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, LocatorError> {
        if self.scan_enable().await.is_err() {
            return Ok(CycleOutcome::ScanStartFailed);
        }

        self.filter.arm();
        self.set_state(SyncState::AwaitingCandidate);
        info!("Waiting for periodic advertising...");
        let candidate = self.filter.next_candidate().await;

        let (handle, timeout) = match self.create_sync(candidate).await {
            Some(created) => created,
            None => {
                self.session.lock().reset();
                return Ok(CycleOutcome::CreateRejected);
            }
        };

        info!("Waiting for periodic sync ({} ms)...", timeout.as_millis());
        match self.await_confirmation(handle, timeout).await {
            Some(Confirmation::Established(_)) => {}
            Some(Confirmation::Terminated(_)) => {
                info!("Periodic sync terminated before it was established");
                self.abandon(handle, TerminationReason::ExplicitTerminated).await?;
                return Ok(CycleOutcome::TerminatedBeforeSync);
            }
            None => {
                info!("Periodic sync not established within {} ms", timeout.as_millis());
                self.abandon(handle, TerminationReason::Timeout).await?;
                return Ok(CycleOutcome::ConfirmationTimeout);
            }
        }

        info!("Periodic sync established");

        info!("Enable receiving of CTE...");
        if let Err(e) = self.host.enable_cte_rx(handle, &self.config.cte).await {
            warn!("Enable receiving of CTE failed: {}", e);
            if self.router.lost.try_take().is_some() {
                info!("Periodic sync lost");
                self.session.lock().reset();
                return Ok(CycleOutcome::SyncLost);
            }
            self.abandon(handle, TerminationReason::ExplicitTerminated).await?;
            return Ok(CycleOutcome::CteEnableRejected);
        }
        info!("CTE receive enabled");

        // Nothing else needs scan reports while sampling.
        self.scan_disable().await;

        info!("Waiting for periodic sync lost...");
        self.router.lost.take().await;
        info!("Periodic sync lost");
        self.session.lock().reset();
        Ok(CycleOutcome::SyncLost)
    }

    fn set_state(&self, state: SyncState) {
        let mut session = self.session.lock();
        debug!("Sync state {} -> {}", session.state, state);
        session.state = state;
    }

    async fn create_sync(
        &self,
        candidate: AdvertisingCandidate,
    ) -> Option<(SyncHandle, Duration)> {
        self.router.confirmation.reset();
        self.router.lost.reset();
        self.session.lock().begin(candidate);

        let params = SyncCreateParams {
            address: candidate.address,
            sid: candidate.advertising_set_id,
            options: SyncOptions::cte_only(),
            skip: 0,
            timeout: SYNC_SUPERVISION_TIMEOUT,
        };

        info!("Creating Periodic Advertising Sync to {}...", candidate);
        let handle = match self.host.create_periodic_sync(&params).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Creating Periodic Advertising Sync failed: {}", e);
                return None;
            }
        };

        let mut session = self.session.lock();
        // Establishment may already have been reported for this handle.
        if !(session.state == SyncState::Synced && session.owns(handle)) {
            session.handle = Some(handle);
            session.state = SyncState::AwaitingConfirmation;
        }
        Some((handle, session.timeout_deadline))
    }

    async fn await_confirmation(&self, handle: SyncHandle, timeout: Duration) -> Option<Confirmation> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.router.confirmation.take()).await {
                Err(_) => return None,
                Ok(event) if event.handle() == handle => return Some(event),
                Ok(event) => debug!("Ignoring event for stale sync {}", event.handle()),
            }
        }
    }

    /// Tear down a sync that will not be used. Delete failure is fatal.
    async fn abandon(
        &self,
        handle: SyncHandle,
        reason: TerminationReason,
    ) -> Result<(), LocatorError> {
        {
            let mut session = self.session.lock();
            session.state = SyncState::Terminating;
            session.termination_reason = Some(reason);
        }

        info!("Deleting Periodic Advertising Sync {}...", handle);
        self.host
            .delete_periodic_sync(handle)
            .await
            .map_err(|source| {
                error!("Deleting Periodic Advertising Sync failed: {}", source);
                LocatorError::DeleteFailed { handle, source }
            })?;
        info!("Periodic Advertising Sync {} deleted", handle);

        self.session.lock().reset();
        Ok(())
    }

    async fn scan_enable(&mut self) -> Result<(), HostError> {
        if self.scanning {
            return Ok(());
        }
        info!("Start scanning...");
        self.host.start_scan(&self.config.scan).await.map_err(|e| {
            warn!("Start scanning failed: {}", e);
            e
        })?;
        self.scanning = true;
        Ok(())
    }

    async fn scan_disable(&mut self) {
        info!("Scan disable...");
        match self.host.stop_scan().await {
            Ok(()) => self.scanning = false,
            Err(e) => warn!("Scan disable failed: {}", e),
        }
    }
}
