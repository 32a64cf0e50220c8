//! Watchdog lease
//!
//! The locator treats the watchdog as a liveness signal: it is fed once per
//! received CTE report and a few times during the startup self-test. If the
//! sync is lost and never comes back, nothing feeds it and the device resets.
//!
//! [`Watchdog`] abstracts the timer itself; [`SoftwareWatchdog`] is a tokio
//! timer implementation for hosts without one.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::WatchdogError;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Watchdog settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Install a watchdog at all
    pub enabled: bool,
    /// Expiry window in milliseconds
    pub window_max_ms: u64,
    /// Number of feeds performed by the startup self-test
    pub feed_tries: u32,
    /// Pause between self-test feeds in milliseconds
    pub feed_interval_ms: u64,
    /// Request a pre-reset callback
    pub allow_callback: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_max_ms: 8000,
            feed_tries: 5,
            feed_interval_ms: 50,
            allow_callback: true,
        }
    }
}

impl WatchdogConfig {
    pub fn window_max(&self) -> Duration {
        Duration::from_millis(self.window_max_ms)
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.window_max_ms == 0 {
            return Err("Watchdog window must be > 0".to_string());
        }
        Ok(())
    }
}

/// Installed timeout channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogChannel(pub usize);

pub type PreResetCallback = Arc<dyn Fn(&dyn Watchdog, WatchdogChannel) + Send + Sync>;

/// Timeout channel request
#[derive(Clone)]
pub struct TimeoutConfig {
    pub window_min: Duration,
    pub window_max: Duration,
    /// Reset the whole SoC on expiry
    pub reset_soc: bool,
    pub callback: Option<PreResetCallback>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupOptions {
    pub pause_halted_by_debugger: bool,
    pub pause_in_sleep: bool,
}

/// Hardware watchdog API
pub trait Watchdog: Send + Sync {
    /// Install a timeout channel. Fails with [`WatchdogError::NotSupported`]
    /// when the request carries a callback the hardware cannot honour.
    fn install_timeout(&self, config: TimeoutConfig) -> Result<WatchdogChannel, WatchdogError>;

    /// Start the watchdog with the installed channels
    fn setup(&self, options: SetupOptions) -> Result<(), WatchdogError>;

    fn feed(&self, channel: WatchdogChannel) -> Result<(), WatchdogError>;
}

// ============================================================================
// LEASE
// ============================================================================

/// A started watchdog channel. Feeds are serialized because CTE reports
/// arrive on the host's callback context, not the controller's.
pub struct WatchdogLease {
    watchdog: Arc<dyn Watchdog>,
    channel: WatchdogChannel,
    feed_lock: Mutex<()>,
    feeds: AtomicU64,
}

impl WatchdogLease {
    pub fn channel(&self) -> WatchdogChannel {
        self.channel
    }

    pub fn feed(&self) {
        let _guard = self.feed_lock.lock();
        if let Err(e) = self.watchdog.feed(self.channel) {
            warn!("Watchdog feed failed: {}", e);
            return;
        }
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of successful feeds so far
    pub fn feed_count(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }
}

/// Callback that feeds once more before the reset and logs it, only the first time.
pub fn pre_reset_callback() -> PreResetCallback {
    let handled = AtomicBool::new(false);
    Arc::new(move |watchdog: &dyn Watchdog, channel: WatchdogChannel| {
        if handled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = watchdog.feed(channel) {
            warn!("Watchdog feed in pre-reset callback failed: {}", e);
        }
        warn!("Watchdog pre-reset callback handled, ready to reset");
    })
}

/// Install, start and self-test a watchdog channel.
pub async fn install_watchdog(
    watchdog: Arc<dyn Watchdog>,
    config: &WatchdogConfig,
) -> Result<Arc<WatchdogLease>, WatchdogError> {
    info!("Watchdog init...");

    let mut timeout = TimeoutConfig {
        window_min: Duration::ZERO,
        window_max: config.window_max(),
        reset_soc: true,
        callback: None,
    };

    if config.allow_callback {
        timeout.callback = Some(pre_reset_callback());
        info!("Attempting to install pre-reset callback");
    } else {
        info!("Pre-reset callback disabled");
    }

    let channel = match watchdog.install_timeout(timeout.clone()) {
        Err(WatchdogError::NotSupported) if timeout.callback.is_some() => {
            info!("Callback support rejected, continuing anyway");
            timeout.callback = None;
            watchdog.install_timeout(timeout)
        }
        other => other,
    }
    .map_err(|e| {
        error!("Watchdog install error: {}", e);
        e
    })?;

    watchdog
        .setup(SetupOptions {
            pause_halted_by_debugger: true,
            pause_in_sleep: false,
        })
        .map_err(|e| {
            error!("Watchdog setup error: {}", e);
            e
        })?;

    let lease = Arc::new(WatchdogLease {
        watchdog,
        channel,
        feed_lock: Mutex::new(()),
        feeds: AtomicU64::new(0),
    });

    info!("Feeding watchdog {} times", config.feed_tries);
    for _ in 0..config.feed_tries {
        debug!("Feeding watchdog...");
        lease.feed();
        tokio::time::sleep(config.feed_interval()).await;
    }

    Ok(lease)
}

// ============================================================================
// SOFTWARE WATCHDOG
// ============================================================================

struct SoftChannel {
    window_max: Duration,
    callback: Option<PreResetCallback>,
    last_feed: Instant,
}

struct SoftState {
    channels: Vec<SoftChannel>,
    started: bool,
}

/// Watchdog backed by a tokio timer. Expiry is reported through
/// [`SoftwareWatchdog::expired`] instead of resetting the process.
#[derive(Clone)]
pub struct SoftwareWatchdog {
    state: Arc<Mutex<SoftState>>,
    supports_callback: bool,
    expired_tx: Arc<watch::Sender<bool>>,
    expired_rx: watch::Receiver<bool>,
}

impl SoftwareWatchdog {
    pub fn new() -> Self {
        Self::with_callback_support(true)
    }

    /// A watchdog that rejects pre-reset callbacks, like some STM32 parts
    pub fn without_callback_support() -> Self {
        Self::with_callback_support(false)
    }

    fn with_callback_support(supports_callback: bool) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(SoftState {
                channels: Vec::new(),
                started: false,
            })),
            supports_callback,
            expired_tx: Arc::new(tx),
            expired_rx: rx,
        }
    }

    pub fn has_expired(&self) -> bool {
        *self.expired_rx.borrow()
    }

    /// Resolves once any channel has expired
    pub async fn expired(&self) {
        let mut rx = self.expired_rx.clone();
        let _ = rx.wait_for(|expired| *expired).await;
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    fn check_expiry(&self) -> bool {
        let now = Instant::now();
        let fired: Vec<(usize, Option<PreResetCallback>)> = {
            let state = self.state.lock();
            state
                .channels
                .iter()
                .enumerate()
                .filter(|(_, c)| now.duration_since(c.last_feed) >= c.window_max)
                .map(|(id, c)| (id, c.callback.clone()))
                .collect()
        };
        if fired.is_empty() {
            return false;
        }
        for (id, callback) in fired {
            error!("Watchdog channel {} expired", id);
            if let Some(callback) = callback {
                callback(self as &dyn Watchdog, WatchdogChannel(id));
            }
        }
        let _ = self.expired_tx.send(true);
        true
    }
}

impl Default for SoftwareWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog for SoftwareWatchdog {
    fn install_timeout(&self, config: TimeoutConfig) -> Result<WatchdogChannel, WatchdogError> {
        if config.callback.is_some() && !self.supports_callback {
            return Err(WatchdogError::NotSupported);
        }
        if config.window_max.is_zero() || config.window_min > config.window_max {
            return Err(WatchdogError::InstallFailed("invalid window".to_string()));
        }
        let mut state = self.state.lock();
        if state.started {
            return Err(WatchdogError::InstallFailed("watchdog already running".to_string()));
        }
        state.channels.push(SoftChannel {
            window_max: config.window_max,
            callback: config.callback,
            last_feed: Instant::now(),
        });
        Ok(WatchdogChannel(state.channels.len() - 1))
    }

    fn setup(&self, _options: SetupOptions) -> Result<(), WatchdogError> {
        let period = {
            let mut state = self.state.lock();
            if state.started {
                return Err(WatchdogError::SetupFailed("already started".to_string()));
            }
            let shortest = state
                .channels
                .iter()
                .map(|c| c.window_max)
                .min()
                .ok_or_else(|| WatchdogError::SetupFailed("no channel installed".to_string()))?;
            let now = Instant::now();
            for channel in state.channels.iter_mut() {
                channel.last_feed = now;
            }
            state.started = true;
            (shortest / 8).max(Duration::from_millis(1))
        };

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if this.check_expiry() {
                    break;
                }
            }
        });
        Ok(())
    }

    fn feed(&self, channel: WatchdogChannel) -> Result<(), WatchdogError> {
        let mut state = self.state.lock();
        let entry = state
            .channels
            .get_mut(channel.0)
            .ok_or(WatchdogError::InvalidChannel(channel.0))?;
        entry.last_feed = Instant::now();
        Ok(())
    }
}
