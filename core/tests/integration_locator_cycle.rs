//! Locator cycle tests against the simulated host
//!
//! Each test drives a full scan → sync → sample → loss cycle (or one of its
//! failure branches) with tokio's clock paused, so the seven-interval
//! confirmation deadline can be checked to the millisecond.
//!
//! Run with: cargo test --test integration_locator_cycle

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use locator_core::host::{
    BleAddress, HostCall, PeriodicInterval, SimAdvertiser, SimScenario, SimulatedHost, SyncHandle,
};
use locator_core::sync::sync_create_timeout;
use locator_core::{
    install_watchdog, CycleOutcome, IqReportLogger, LocatorConfig, LocatorError, MemorySink,
    SoftwareWatchdog, SyncController, SyncState, WatchdogConfig,
};

fn beacon() -> BleAddress {
    BleAddress::random([0x61, 0x3A, 0x2B, 0x1C, 0x0D, 0xC5])
}

fn scenario(interval: u16) -> SimScenario {
    SimScenario {
        advertisers: vec![SimAdvertiser::periodic(beacon(), 3, interval)],
        confirm_after: Some(Duration::from_millis(200)),
        lose_after: Some(Duration::from_millis(1000)),
        ..SimScenario::default()
    }
}

fn setup(scenario: SimScenario) -> (Arc<SimulatedHost>, SyncController, Arc<IqReportLogger>, MemorySink) {
    let host = Arc::new(SimulatedHost::new(scenario));
    let sink = MemorySink::new();
    let logger = Arc::new(IqReportLogger::new(Box::new(sink.clone())));
    let controller = SyncController::new(host.clone(), LocatorConfig::default(), logger.clone())
        .expect("Failed to create controller");
    (host, controller, logger, sink)
}

fn count(calls: &[HostCall], pred: impl Fn(&HostCall) -> bool) -> usize {
    calls.iter().filter(|c| pred(c)).count()
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_sync_enables_cte_and_stops_scanning() {
    let (host, mut controller, logger, sink) = setup(scenario(100));
    assert_eq!(sync_create_timeout(PeriodicInterval(100)), Duration::from_millis(875));

    let task = tokio::spawn(async move {
        let outcome = controller.run_cycles(1).await;
        (controller, outcome)
    });

    // Confirmation arrives at 200 ms, well inside the 875 ms deadline.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let calls = host.calls();
    assert_eq!(
        calls,
        vec![
            HostCall::StartScan,
            HostCall::CreateSync {
                address: beacon(),
                sid: 3
            },
            HostCall::EnableCteRx(SyncHandle(0)),
            HostCall::StopScan,
        ]
    );
    assert!(!host.is_scanning());

    // Past the deadline nothing was deleted.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(count(&host.calls(), |c| matches!(c, HostCall::DeleteSync(_))), 0);

    let (controller, outcome) = task.await.expect("join");
    assert_eq!(outcome.expect("cycle"), vec![CycleOutcome::SyncLost]);
    assert_eq!(controller.state(), SyncState::Idle);
    assert!(host.active_syncs().is_empty());

    assert!(logger.logged_count() > 0);
    let output = sink.contents();
    assert!(output.starts_with("IQ samples :\n"));
    assert_eq!(
        output.matches("IQ samples END").count() as u64,
        logger.logged_count()
    );
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_sync_is_deleted_at_deadline() {
    let (host, mut controller, logger, _sink) = setup(SimScenario {
        confirm_after: None,
        ..scenario(100)
    });

    let start = Instant::now();
    let outcomes = controller.run_cycles(1).await.expect("cycle");
    let elapsed = start.elapsed();

    assert_eq!(outcomes, vec![CycleOutcome::ConfirmationTimeout]);
    assert!(elapsed >= Duration::from_millis(875));
    assert!(elapsed < Duration::from_millis(900));

    let calls = host.calls();
    assert_eq!(count(&calls, |c| *c == HostCall::DeleteSync(SyncHandle(0))), 1);
    assert_eq!(count(&calls, |c| matches!(c, HostCall::EnableCteRx(_))), 0);
    assert!(host.active_syncs().is_empty());
    assert_eq!(controller.state(), SyncState::Idle);
    // Scanning stays on for the next cycle.
    assert!(controller.is_scanning());
    assert_eq!(logger.logged_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_crc_errors_are_not_logged_but_feed_the_watchdog() {
    let wdt = Arc::new(SoftwareWatchdog::new());
    let lease = install_watchdog(
        wdt.clone(),
        &WatchdogConfig {
            feed_tries: 0,
            ..WatchdogConfig::default()
        },
    )
    .await
    .expect("install watchdog");

    let (host, mut controller, logger, sink) = setup(SimScenario {
        crc_error_every: Some(1),
        ..scenario(100)
    });
    logger.set_watchdog(lease.clone());

    let outcomes = controller.run_cycles(1).await.expect("cycle");
    assert_eq!(outcomes, vec![CycleOutcome::SyncLost]);

    assert!(host.cte_reports_sent() > 0);
    assert!(sink.is_empty());
    assert_eq!(logger.logged_count(), 0);
    assert_eq!(logger.dropped_count(), host.cte_reports_sent());
    assert_eq!(lease.feed_count(), host.cte_reports_sent());
    assert!(!wdt.has_expired());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_cycles_leak_no_sync_handles() {
    let (host, mut controller, _logger, _sink) = setup(SimScenario {
        lose_after: Some(Duration::from_millis(500)),
        ..scenario(0x0050)
    });

    let outcomes = controller.run_cycles(4).await.expect("cycles");
    assert_eq!(outcomes, vec![CycleOutcome::SyncLost; 4]);

    let calls = host.calls();
    assert_eq!(count(&calls, |c| matches!(c, HostCall::CreateSync { .. })), 4);
    assert_eq!(count(&calls, |c| matches!(c, HostCall::DeleteSync(_))), 0);
    // Each sampling phase turned scanning off, so every cycle restarted it.
    assert_eq!(count(&calls, |c| *c == HostCall::StartScan), 4);
    assert!(host.active_syncs().is_empty());
    assert_eq!(controller.state(), SyncState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_establishment_deletes_once_per_cycle() {
    let (host, mut controller, _logger, _sink) = setup(SimScenario {
        confirm_after: None,
        terminate_before_sync: Some(Duration::from_millis(100)),
        ..scenario(100)
    });

    let outcomes = controller.run_cycles(3).await.expect("cycles");
    assert_eq!(outcomes, vec![CycleOutcome::TerminatedBeforeSync; 3]);

    let calls = host.calls();
    assert_eq!(count(&calls, |c| matches!(c, HostCall::CreateSync { .. })), 3);
    assert_eq!(count(&calls, |c| matches!(c, HostCall::DeleteSync(_))), 3);
    assert_eq!(count(&calls, |c| matches!(c, HostCall::EnableCteRx(_))), 0);
    assert!(host.active_syncs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_failure_stops_the_locator() {
    let (host, mut controller, _logger, _sink) = setup(SimScenario {
        confirm_after: None,
        fail_delete: true,
        ..scenario(100)
    });

    match controller.run().await {
        Err(LocatorError::DeleteFailed { handle, .. }) => assert_eq!(handle, SyncHandle(0)),
        other => panic!("expected DeleteFailed, got {:?}", other),
    }
    assert_eq!(count(&host.calls(), |c| matches!(c, HostCall::CreateSync { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cte_enable_rejection_abandons_sync() {
    let (host, mut controller, _logger, _sink) = setup(SimScenario {
        fail_enable_cte: true,
        ..scenario(100)
    });

    let outcomes = controller.run_cycles(1).await.expect("cycle");
    assert_eq!(outcomes, vec![CycleOutcome::CteEnableRejected]);
    assert_eq!(count(&host.calls(), |c| *c == HostCall::DeleteSync(SyncHandle(0))), 1);
    assert!(host.active_syncs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scan_start_failure_retries_after_delay() {
    let (host, mut controller, _logger, _sink) = setup(SimScenario {
        scan_start_failures: 2,
        ..scenario(100)
    });

    let start = Instant::now();
    let outcomes = controller.run_cycles(3).await.expect("cycles");
    assert_eq!(
        outcomes,
        vec![
            CycleOutcome::ScanStartFailed,
            CycleOutcome::ScanStartFailed,
            CycleOutcome::SyncLost
        ]
    );
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(count(&host.calls(), |c| *c == HostCall::StartScan), 3);
}

#[tokio::test(start_paused = true)]
async fn test_non_periodic_advertisers_are_skipped() {
    let other = BleAddress::public([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    let (host, mut controller, _logger, _sink) = setup(SimScenario {
        advertisers: vec![
            SimAdvertiser::non_periodic(other, 0),
            SimAdvertiser::periodic(beacon(), 7, 0x0050),
        ],
        ..scenario(0x0050)
    });

    controller.run_cycles(1).await.expect("cycle");
    let creates: Vec<HostCall> = host
        .calls()
        .into_iter()
        .filter(|c| matches!(c, HostCall::CreateSync { .. }))
        .collect();
    assert_eq!(
        creates,
        vec![HostCall::CreateSync {
            address: beacon(),
            sid: 7
        }]
    );
}
