//! IQ report logger
//!
//! Turns CTE reports into plain-text records for offline AoA processing.
//! Only reports received with a good CRC are written; the rest are dropped
//! without a trace in the output. Every report feeds the watchdog.

use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::host::CteReport;
use crate::watchdog::WatchdogLease;

/// One IQ record, formatted as
///
/// ```text
/// IQ samples :
/// <chan> <rssi> <ant> <cte_type> <slot> <status> <count> I Q I Q ...
/// IQ samples END
/// ```
pub struct IqRecord<'a> {
    report: &'a CteReport,
}

impl<'a> IqRecord<'a> {
    pub fn new(report: &'a CteReport) -> Self {
        Self { report }
    }
}

impl fmt::Display for IqRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.report;
        writeln!(f, "IQ samples :")?;
        write!(
            f,
            "{} {} {} {} {} {} {}",
            r.channel_index,
            r.rssi,
            r.rssi_antenna_id,
            r.cte_type.code(),
            r.slot_durations,
            r.packet_status.code(),
            r.samples.len()
        )?;
        for sample in &r.samples {
            write!(f, " {} {}", sample.i, sample.q)?;
        }
        writeln!(f)?;
        writeln!(f, "IQ samples END")
    }
}

pub struct IqReportLogger {
    sink: Mutex<Box<dyn Write + Send>>,
    watchdog: Mutex<Option<Arc<WatchdogLease>>>,
    logged: AtomicU64,
    dropped: AtomicU64,
}

impl IqReportLogger {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
            watchdog: Mutex::new(None),
            logged: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Attach the watchdog lease fed on every report
    pub fn set_watchdog(&self, lease: Arc<WatchdogLease>) {
        *self.watchdog.lock() = Some(lease);
    }

    pub fn on_cte_report(&self, report: &CteReport) {
        if let Some(lease) = self.watchdog.lock().as_ref() {
            lease.feed();
        }

        if !report.packet_status.is_ok() {
            trace!(
                "CTE[{}]: dropping report, packet status {}",
                report.handle,
                report.packet_status
            );
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        trace!(
            "CTE[{}]: samples count {}, cte type {}, slot durations: {} [us], RSSI {}",
            report.handle,
            report.samples.len(),
            report.cte_type,
            report.slot_durations,
            report.rssi
        );

        let record = IqRecord::new(report);
        let mut sink = self.sink.lock();
        if let Err(e) = write!(sink, "{}", record).and_then(|_| sink.flush()) {
            warn!("Failed to write IQ record: {}", e);
            return;
        }
        self.logged.fetch_add(1, Ordering::Relaxed);
    }

    /// Reports written to the sink
    pub fn logged_count(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }

    /// Reports dropped because of a bad packet status
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// In-memory sink shared between a logger and whoever inspects the output
#[derive(Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
