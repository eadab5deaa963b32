//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bluelink_core::SessionConfig;
use bluelink_core::config::{
    DEFAULT_BOND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SCAN_TIMEOUT, DEFAULT_SETTLE_DELAY,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default device under test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dut: Option<String>,
    /// Where per-test-case logs are written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Cases `run` executes when no ids are given.
    pub cases: Vec<String>,
    pub timing: TimingConfig,
}

/// Session timing in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub scan_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub bond_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: millis(DEFAULT_SCAN_TIMEOUT),
            settle_delay_ms: millis(DEFAULT_SETTLE_DELAY),
            connect_timeout_ms: millis(DEFAULT_CONNECT_TIMEOUT),
            bond_timeout_ms: millis(DEFAULT_BOND_TIMEOUT),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Default config file path.
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bluelink")
            .join("config.toml")
    }

    /// Load config from `path`, or return the default if the file is missing
    /// or unreadable.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e:#}");
                Self::default()
            }
        }
    }

    /// Load config from `path`, failing on any error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Save config to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Session timing derived from the `[timing]` table.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .scan_timeout(Duration::from_millis(self.timing.scan_timeout_ms))
            .settle_delay(Duration::from_millis(self.timing.settle_delay_ms))
            .connect_timeout(Duration::from_millis(self.timing.connect_timeout_ms))
            .bond_timeout(Duration::from_millis(self.timing.bond_timeout_ms))
    }
}

/// Default directory for test logs.
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bluelink")
        .join("test_logs")
}

/// Resolve the DUT name from the argument (or its env var), then the config.
///
/// Blank names count as unset.
pub fn resolve_dut(dut: Option<String>, config: &Config) -> Option<String> {
    dut.filter(|d| !d.trim().is_empty())
        .or_else(|| config.dut.clone().filter(|d| !d.trim().is_empty()))
}

/// Resolve the log directory from the argument, then the config, then the default.
pub fn resolve_log_dir(log_dir: Option<PathBuf>, config: &Config) -> PathBuf {
    log_dir
        .or_else(|| config.log_dir.clone())
        .unwrap_or_else(default_log_dir)
}
