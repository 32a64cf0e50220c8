// locator: connectionless CTE locator CLI
//
// Runs the locator against the simulated BLE host and manages its
// persistent configuration. IQ records go to stdout, logs to stderr.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use locator_core::host::{BleAddress, HostCall, SimAdvertiser, SimScenario, SimulatedHost};
use locator_core::{
    install_watchdog, CycleOutcome, IqReportLogger, SoftwareWatchdog, SyncController,
    WatchdogConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "locator")]
#[command(about = "Connectionless CTE locator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the locator against the simulated host
    Run {
        /// Periodic advertising interval of the simulated beacon (1.25 ms units)
        #[arg(long)]
        interval: Option<u16>,
        /// Advertising set id of the simulated beacon
        #[arg(long)]
        sid: Option<u8>,
        /// Delay until the simulated sync is established
        #[arg(long)]
        confirm_after_ms: Option<u64>,
        /// Lifetime of an established simulated sync
        #[arg(long)]
        lose_after_ms: Option<u64>,
        /// Stop after this many cycles instead of running forever
        #[arg(long)]
        cycles: Option<usize>,
        /// Sample as an angle-of-departure receiver
        #[arg(long)]
        aod: bool,
        /// Do not install the watchdog
        #[arg(long)]
        no_watchdog: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Show the config file location
    Path,
}

struct RunOptions {
    interval: Option<u16>,
    sid: Option<u8>,
    confirm_after_ms: Option<u64>,
    lose_after_ms: Option<u64>,
    cycles: Option<usize>,
    aod: bool,
    no_watchdog: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            interval,
            sid,
            confirm_after_ms,
            lose_after_ms,
            cycles,
            aod,
            no_watchdog,
        } => {
            cmd_run(RunOptions {
                interval,
                sid,
                confirm_after_ms,
                lose_after_ms,
                cycles,
                aod,
                no_watchdog,
            })
            .await
        }
        Commands::Config { action } => cmd_config(action),
    }
}

fn build_scenario(config: &config::SimulationConfig) -> SimScenario {
    SimScenario {
        advertisers: vec![SimAdvertiser::periodic(
            BleAddress::random([0x61, 0x3A, 0x2B, 0x1C, 0x0D, 0xC5]),
            config.sid,
            config.interval,
        )],
        confirm_after: config.confirm_after_ms.map(Duration::from_millis),
        lose_after: config.lose_after_ms.map(Duration::from_millis),
        crc_error_every: config.crc_error_every,
        ..SimScenario::default()
    }
}

async fn cmd_run(opts: RunOptions) -> Result<()> {
    let mut config = config::Config::load()?;
    if let Some(interval) = opts.interval {
        config.simulation.interval = interval;
    }
    if let Some(sid) = opts.sid {
        config.simulation.sid = sid;
    }
    if let Some(ms) = opts.confirm_after_ms {
        config.simulation.confirm_after_ms = Some(ms);
    }
    if let Some(ms) = opts.lose_after_ms {
        config.simulation.lose_after_ms = Some(ms);
    }
    if opts.aod {
        config.set("cte_mode", "aod")?;
    }
    if opts.no_watchdog {
        config.locator.watchdog.enabled = false;
    }
    tracing::debug!("Locator config: {:?}", config.locator);

    eprintln!("{}", "Starting Connectionless Locator".bold());
    eprintln!(
        "  Beacon interval: {} units, SID {}",
        config.simulation.interval.to_string().bright_cyan(),
        config.simulation.sid.to_string().bright_cyan()
    );

    let logger = Arc::new(IqReportLogger::stdout());
    let watchdog = if config.locator.watchdog.enabled {
        start_watchdog(Arc::new(SoftwareWatchdog::new()), &config.locator.watchdog, &logger).await
    } else {
        eprintln!("  {} Watchdog disabled", "•".dimmed());
        None
    };

    let host = Arc::new(SimulatedHost::new(build_scenario(&config.simulation)));
    let mut controller = SyncController::new(host.clone(), config.locator.clone(), logger.clone())
        .context("Failed to create locator")?;

    let expired = async {
        match &watchdog {
            Some(wdt) => wdt.expired().await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcomes = tokio::select! {
        result = async {
            match opts.cycles {
                Some(n) => controller.run_cycles(n).await,
                None => controller.run().await.map(|_| Vec::new()),
            }
        } => result.context("Locator stopped")?,
        _ = expired => {
            eprintln!("{}", "Watchdog expired, resetting".bright_red().bold());
            anyhow::bail!("watchdog expired");
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            eprintln!("{}", "Interrupted".yellow());
            Vec::new()
        }
    };

    print_summary(&outcomes, &host, &logger);
    Ok(())
}

/// Install the watchdog and attach it to the logger. A failed install is
/// logged and the locator runs unguarded.
async fn start_watchdog(
    wdt: Arc<SoftwareWatchdog>,
    config: &WatchdogConfig,
    logger: &IqReportLogger,
) -> Option<Arc<SoftwareWatchdog>> {
    match install_watchdog(wdt.clone(), config).await {
        Ok(lease) => {
            logger.set_watchdog(lease);
            eprintln!("  {} Watchdog installed", "✓".green());
            Some(wdt)
        }
        Err(e) => {
            tracing::warn!("Watchdog unavailable, running without it: {}", e);
            eprintln!("  {} Watchdog unavailable", "✗".yellow());
            None
        }
    }
}

fn print_summary(outcomes: &[CycleOutcome], host: &SimulatedHost, logger: &IqReportLogger) {
    eprintln!();
    eprintln!("{}", "Summary".bold());
    for (i, outcome) in outcomes.iter().enumerate() {
        let line = format!("{:?}", outcome);
        let line = match outcome {
            CycleOutcome::SyncLost => line.green(),
            _ => line.yellow(),
        };
        eprintln!("  cycle {:<3} {}", i + 1, line);
    }

    let calls = host.calls();
    let deletes = calls
        .iter()
        .filter(|c| matches!(c, HostCall::DeleteSync(_)))
        .count();
    eprintln!("  {:<20} {}", "IQ reports logged".bright_cyan(), logger.logged_count());
    eprintln!("  {:<20} {}", "IQ reports dropped".bright_cyan(), logger.dropped_count());
    eprintln!("  {:<20} {}", "syncs deleted".bright_cyan(), deletes);
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}
