//! Command implementations.

mod cases;
mod config;
mod explore;
mod gatt;
mod logs;
mod run;
mod scan;

pub use cases::cmd_cases;
pub use config::cmd_config;
pub use explore::cmd_explore;
pub use gatt::{cmd_read, cmd_watch, cmd_write};
pub use logs::cmd_logs;
pub use run::cmd_run;
pub use scan::cmd_scan;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use bluelink_core::uuids::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
use bluelink_core::{
    BleAdapter, BtleplugAdapter, LogSink, MockAdapter, MockAdapterBuilder, PresentationListener,
    RunnerConfig, TestRunner, Workbench,
};
use bluelink_types::{CharacteristicRef, DiscoveredDevice, GattItem};

use crate::cli::DEMO_DUT;
use crate::config::{Config, resolve_dut};
use crate::console::ConsoleListener;
use crate::format::FormatOptions;
use crate::style;

/// Interval between simulated heart-rate notifications under `--demo`.
const DEMO_NOTIFY_INTERVAL: Duration = Duration::from_secs(1);

/// Settings shared by every command.
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub demo: bool,
    pub quiet: bool,
    pub opts: FormatOptions,
}

impl Context {
    /// The simulated DUT under `--demo`, else the first Bluetooth adapter.
    pub async fn adapter(&self) -> Result<Arc<dyn BleAdapter>> {
        if self.demo {
            let mock = Arc::new(MockAdapterBuilder::heart_rate_dut(DEMO_DUT).build());
            spawn_demo_heartbeat(&mock);
            return Ok(mock);
        }
        let adapter = BtleplugAdapter::new()
            .await
            .context("No usable Bluetooth adapter (use --demo to run without one)")?;
        Ok(Arc::new(adapter))
    }

    /// A workbench writing logs under the resolved log directory.
    pub async fn workbench(
        &self,
        listener: Arc<ConsoleListener>,
    ) -> Result<Workbench<dyn BleAdapter>> {
        let adapter = self.adapter().await?;
        let config = RunnerConfig::new().session(self.config.session_config());
        let runner = TestRunner::with_config(adapter, LogSink::to_dir(&self.log_dir), config)
            .context("Invalid [timing] configuration")?;
        Ok(Workbench::with_runner(
            runner,
            listener as Arc<dyn PresentationListener>,
        ))
    }

    /// A listener echoing log lines unless `--quiet`.
    pub fn listener(&self) -> Arc<ConsoleListener> {
        Arc::new(ConsoleListener::new(!self.quiet, self.opts.no_color))
    }

    /// DUT name from the flag, `BLUELINK_DUT` or the config; `DUT-1` under `--demo`.
    pub fn dut(&self, arg: Option<String>) -> Option<String> {
        resolve_dut(arg, &self.config).or_else(|| self.demo.then(|| DEMO_DUT.to_string()))
    }

    /// Scan for `dut`, connect and discover its services.
    pub async fn connect_dut(
        &self,
        bench: &mut Workbench<dyn BleAdapter>,
        listener: &ConsoleListener,
        dut: &str,
        window: Duration,
    ) -> Result<(DiscoveredDevice, Vec<GattItem>)> {
        if !self.quiet {
            listener.attach(style::spinner(format!("Connecting to {dut}...")));
        }
        let result = async {
            let device = bench
                .runner_mut()
                .session_mut()
                .begin_scan(Some(dut), window)
                .await?;
            let items = bench.connect_to(&device).await?;
            Ok::<_, bluelink_core::Error>((device, items))
        }
        .await;
        listener.detach();
        result.with_context(|| format!("Could not connect to {dut}"))
    }

    /// DUT name or an error explaining how to give one.
    pub fn require_dut(&self, arg: Option<String>) -> Result<String> {
        self.dut(arg)
            .ok_or_else(|| anyhow!("No device under test (pass --dut or set BLUELINK_DUT)"))
    }

    /// Scan window from seconds on the command line, else the configured timeout.
    pub fn scan_window(&self, timeout_secs: Option<u64>) -> Duration {
        timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.session_config().scan_timeout)
    }
}

/// Push a heart-rate measurement every second while the mock is alive.
fn spawn_demo_heartbeat(mock: &Arc<MockAdapter>) {
    let weak = Arc::downgrade(mock);
    let target = CharacteristicRef::new(HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DEMO_NOTIFY_INTERVAL);
        for bpm in (60u8..=80).cycle() {
            interval.tick().await;
            let Some(mock) = weak.upgrade() else {
                break;
            };
            // Flags byte 0x00: 8-bit heart rate value follows.
            mock.push_notification(target, vec![0x00, bpm]).await;
        }
    });
}
