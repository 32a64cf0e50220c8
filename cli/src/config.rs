// Configuration management for the locator CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/cte-locator/config.json
// - Linux: ~/.config/cte-locator/config.json
// - Windows: %APPDATA%\cte-locator\config.json

use anyhow::{Context, Result};
use locator_core::host::{CteRxConfig, ScanType};
use locator_core::LocatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Locator settings handed to the core
    pub locator: LocatorConfig,

    /// Simulated beacon used by `locator run`
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Periodic advertising interval in 1.25 ms units
    pub interval: u16,

    /// Advertising set id of the beacon
    pub sid: u8,

    /// Delay until the sync is established, `None` never establishes
    pub confirm_after_ms: Option<u64>,

    /// Lifetime of an established sync, `None` keeps it forever
    pub lose_after_ms: Option<u64>,

    /// Every n-th CTE report carries a CRC error
    pub crc_error_every: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            locator: LocatorConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval: 0x0050,
            sid: 0,
            confirm_after_ms: Some(200),
            lose_after_ms: Some(10_000),
            crc_error_every: None,
        }
    }
}

fn parse_optional<T: std::str::FromStr>(value: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        "" | "never" | "none" => Ok(None),
        v => Ok(Some(v.parse().context("Invalid number")?)),
    }
}

fn show_optional<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "never".to_string())
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("cte-locator");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load config from `path`, or write and return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .locator
                .validate()
                .map_err(anyhow::Error::msg)
                .context("Invalid locator configuration")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value. The caller persists the change.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let locator = &mut self.locator;
        match key {
            "scan_type" => {
                locator.scan.scan_type = match value {
                    "active" => ScanType::Active,
                    "passive" => ScanType::Passive,
                    _ => anyhow::bail!("Scan type must be 'active' or 'passive'"),
                };
            }
            "filter_duplicates" => {
                locator.scan.filter_duplicates = value.parse().context("Invalid boolean value")?;
            }
            "scan_interval" => {
                locator.scan.interval = value.parse().context("Invalid number")?;
            }
            "scan_window" => {
                locator.scan.window = value.parse().context("Invalid number")?;
            }
            "scan_timeout" => {
                locator.scan.timeout = value.parse().context("Invalid number")?;
            }
            "scan_retry_delay_ms" => {
                locator.scan_retry_delay_ms = value.parse().context("Invalid number")?;
            }
            "cte_mode" => {
                locator.cte = match value {
                    "aoa" => CteRxConfig::aoa(),
                    "aod" => CteRxConfig::aod(),
                    _ => anyhow::bail!("CTE mode must be 'aoa' or 'aod'"),
                };
            }
            "max_cte_count" => {
                locator.cte.max_cte_count = value.parse().context("Invalid number")?;
            }
            "slot_durations" => {
                locator.cte.slot_durations = value.parse().context("Invalid number")?;
            }
            "watchdog_enabled" => {
                locator.watchdog.enabled = value.parse().context("Invalid boolean value")?;
            }
            "watchdog_window_ms" => {
                locator.watchdog.window_max_ms = value.parse().context("Invalid number")?;
            }
            "watchdog_feed_tries" => {
                locator.watchdog.feed_tries = value.parse().context("Invalid number")?;
            }
            "watchdog_allow_callback" => {
                locator.watchdog.allow_callback = value.parse().context("Invalid boolean value")?;
            }
            "sim_interval" => {
                self.simulation.interval = value.parse().context("Invalid number")?;
            }
            "sim_sid" => {
                self.simulation.sid = value.parse().context("Invalid number")?;
            }
            "sim_confirm_after_ms" => {
                self.simulation.confirm_after_ms = parse_optional(value)?;
            }
            "sim_lose_after_ms" => {
                self.simulation.lose_after_ms = parse_optional(value)?;
            }
            "sim_crc_error_every" => {
                self.simulation.crc_error_every = parse_optional(value)?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.locator.validate().map_err(anyhow::Error::msg)?;
        Ok(())
    }

    fn cte_mode(&self) -> &'static str {
        if self.locator.cte == CteRxConfig::aoa() {
            "aoa"
        } else if self.locator.cte == CteRxConfig::aod() {
            "aod"
        } else {
            "custom"
        }
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let locator = &self.locator;
        let scan_type = match locator.scan.scan_type {
            ScanType::Active => "active",
            ScanType::Passive => "passive",
        };
        vec![
            ("scan_type".to_string(), scan_type.to_string()),
            ("filter_duplicates".to_string(), locator.scan.filter_duplicates.to_string()),
            ("scan_interval".to_string(), locator.scan.interval.to_string()),
            ("scan_window".to_string(), locator.scan.window.to_string()),
            ("scan_timeout".to_string(), locator.scan.timeout.to_string()),
            ("scan_retry_delay_ms".to_string(), locator.scan_retry_delay_ms.to_string()),
            ("cte_mode".to_string(), self.cte_mode().to_string()),
            ("max_cte_count".to_string(), locator.cte.max_cte_count.to_string()),
            ("slot_durations".to_string(), locator.cte.slot_durations.to_string()),
            ("watchdog_enabled".to_string(), locator.watchdog.enabled.to_string()),
            ("watchdog_window_ms".to_string(), locator.watchdog.window_max_ms.to_string()),
            ("watchdog_feed_tries".to_string(), locator.watchdog.feed_tries.to_string()),
            ("watchdog_allow_callback".to_string(), locator.watchdog.allow_callback.to_string()),
            ("sim_interval".to_string(), self.simulation.interval.to_string()),
            ("sim_sid".to_string(), self.simulation.sid.to_string()),
            ("sim_confirm_after_ms".to_string(), show_optional(&self.simulation.confirm_after_ms)),
            ("sim_lose_after_ms".to_string(), show_optional(&self.simulation.lose_after_ms)),
            ("sim_crc_error_every".to_string(), show_optional(&self.simulation.crc_error_every)),
        ]
    }
}
