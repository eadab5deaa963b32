//! Presentation bridge.
//!
//! [`Workbench`] is the surface a front end drives: it accepts scan, connect
//! and run requests and reports device list changes, log lines and selection
//! changes to a [`PresentationListener`]. It owns the runner (and through it
//! the session controller), so nothing else holds the active connection.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use bluelink_types::{DiscoveredDevice, GattItem, TestRun};

use crate::adapter::BleAdapter;
use crate::error::Result;
use crate::events::SessionEvent;
use crate::log_sink::{LogSink, SubscriptionId};
use crate::runner::{TestCatalog, TestRunner};
use crate::session::SessionController;

/// Observer of the core, implemented by a front end.
///
/// All methods default to no-ops.
pub trait PresentationListener: Send + Sync {
    /// The discovered device set changed; `devices` is the full list.
    fn on_device_list_changed(&self, _devices: &[DiscoveredDevice]) {}

    /// A line was appended to the log for `tag`.
    fn on_log_line(&self, _tag: &str, _line: &str) {}

    /// The selected test case ids changed.
    fn on_test_selection_changed(&self, _ids: &[String]) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl PresentationListener for NoopListener {}

/// Front-end facing entry points over one runner.
pub struct Workbench<A: BleAdapter + ?Sized + 'static> {
    runner: TestRunner<A>,
    listener: Arc<dyn PresentationListener>,
    log_subscription: SubscriptionId,
}

impl<A: BleAdapter + ?Sized + 'static> Workbench<A> {
    /// Create a workbench with a default runner.
    pub fn new(adapter: Arc<A>, log: LogSink, listener: Arc<dyn PresentationListener>) -> Self {
        Self::with_runner(TestRunner::new(adapter, log), listener)
    }

    /// Wrap an existing runner.
    pub fn with_runner(runner: TestRunner<A>, listener: Arc<dyn PresentationListener>) -> Self {
        let forward = Arc::clone(&listener);
        let log_subscription = runner
            .session()
            .log_sink()
            .subscribe(move |line| forward.on_log_line(&line.tag, &line.line));
        Self {
            runner,
            listener,
            log_subscription,
        }
    }

    pub fn runner(&self) -> &TestRunner<A> {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut TestRunner<A> {
        &mut self.runner
    }

    pub fn session(&self) -> &SessionController<A> {
        self.runner.session()
    }

    pub fn catalog(&self) -> &TestCatalog {
        self.runner.catalog()
    }

    /// Browse for devices for `window`, or the configured scan timeout.
    ///
    /// The listener sees the list after every change.
    pub async fn begin_scan(&mut self, window: Option<Duration>) -> Result<Vec<DiscoveredDevice>> {
        let window = window.unwrap_or(self.runner.config().session.scan_timeout);
        let listener = Arc::clone(&self.listener);
        let forward = move |event: SessionEvent| {
            if let SessionEvent::DeviceListChanged { devices } = event {
                listener.on_device_list_changed(&devices);
            }
        };

        let mut events = self.runner.session().subscribe();
        let scan = self.runner.session_mut().scan_devices(window);
        tokio::pin!(scan);
        let result = loop {
            tokio::select! {
                biased;
                result = &mut scan => break result,
                Ok(event) = events.recv() => forward(event),
            }
        };
        while let Ok(event) = events.try_recv() {
            forward(event);
        }
        result
    }

    /// Connect to `device`, discover its services and return the flattened
    /// service/characteristic list.
    pub async fn connect_to(&mut self, device: &DiscoveredDevice) -> Result<Vec<GattItem>> {
        let session = self.runner.session_mut();
        session.connect(device).await?;
        session.discover().await?;
        let items = session.gatt_items();
        debug!(count = items.len(), "GATT items ready");
        Ok(items)
    }

    /// Disconnect the current session, if any.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.runner.session_mut().disconnect().await
    }

    /// Change one case's selection. Returns `false` for an unknown id.
    pub fn select(&mut self, id: &str, selected: bool) -> bool {
        let catalog = self.runner.catalog_mut();
        let was = catalog.get(id).map(|c| c.selected);
        if !catalog.set_selected(id, selected) {
            return false;
        }
        if was != Some(selected) {
            self.listener
                .on_test_selection_changed(&self.runner.catalog().selected_ids());
        }
        true
    }

    /// Select exactly `ids`.
    pub fn select_only<S: AsRef<str>>(&mut self, ids: &[S]) {
        let before = self.runner.catalog().selected_ids();
        self.runner.catalog_mut().select_only(ids);
        let after = self.runner.catalog().selected_ids();
        if before != after {
            self.listener.on_test_selection_changed(&after);
        }
    }

    /// Run the selected cases against `dut_name`.
    pub async fn run(&mut self, dut_name: &str) -> Result<TestRun> {
        self.runner.run_selected(dut_name).await
    }

    /// Run the given ids against `dut_name`, ignoring the catalog selection.
    pub async fn run_ids<S: AsRef<str>>(&mut self, ids: &[S], dut_name: &str) -> Result<TestRun> {
        self.runner.run(ids, dut_name).await
    }
}

impl<A: BleAdapter + ?Sized + 'static> Drop for Workbench<A> {
    fn drop(&mut self) {
        self.runner
            .session()
            .log_sink()
            .unsubscribe(self.log_subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock::{MockAdapter, MockAdapterBuilder};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        device_lists: Mutex<Vec<Vec<DiscoveredDevice>>>,
        lines: Mutex<Vec<(String, String)>>,
        selections: Mutex<Vec<Vec<String>>>,
    }

    impl PresentationListener for Recorder {
        fn on_device_list_changed(&self, devices: &[DiscoveredDevice]) {
            self.device_lists.lock().unwrap().push(devices.to_vec());
        }

        fn on_log_line(&self, tag: &str, line: &str) {
            self.lines
                .lock()
                .unwrap()
                .push((tag.to_string(), line.to_string()));
        }

        fn on_test_selection_changed(&self, ids: &[String]) {
            self.selections.lock().unwrap().push(ids.to_vec());
        }
    }

    fn workbench(adapter: MockAdapter) -> (Arc<Recorder>, Workbench<MockAdapter>) {
        let recorder = Arc::new(Recorder::default());
        let bench = Workbench::new(
            Arc::new(adapter),
            LogSink::in_memory(),
            Arc::clone(&recorder) as Arc<dyn PresentationListener>,
        );
        (recorder, bench)
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_scan_reports_device_lists() {
        let (recorder, mut bench) = workbench(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let devices = bench
            .begin_scan(Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);

        let lists = recorder.device_lists.lock().unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].len(), 1);
        assert_eq!(lists.last().unwrap(), &devices);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_to_returns_gatt_items() {
        let (_, mut bench) = workbench(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let devices = bench.begin_scan(Some(Duration::from_secs(1))).await.unwrap();
        let dut = devices.iter().find(|d| d.matches_name("DUT-1")).unwrap();

        let items = bench.connect_to(dut).await.unwrap();
        let services = items
            .iter()
            .filter(|i| matches!(i, GattItem::Service { .. }))
            .count();
        assert_eq!(services, 3);
        assert_eq!(items.len(), 8);
        bench.disconnect().await.unwrap();
    }

    #[test]
    fn test_selection_changes_are_reported() {
        let (recorder, mut bench) = workbench(MockAdapter::new());
        assert!(bench.select("TC01", true));
        assert!(bench.select("TC01", true));
        assert!(!bench.select("TC99", true));
        bench.select_only(&["TC02", "TC03"]);

        let selections = recorder.selections.lock().unwrap();
        assert_eq!(selections.len(), 2);
        assert_eq!(selections[1], ["TC02", "TC03"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_lines_reach_listener() {
        let (recorder, mut bench) = workbench(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        bench.select("TC01", true);
        let run = bench.run("DUT-1").await.unwrap();
        assert!(run.outcome("TC01").unwrap().is_pass());

        let lines = recorder.lines.lock().unwrap();
        assert!(lines.iter().all(|(tag, _)| tag == "TC01_Scan"));
        assert!(lines.iter().any(|(_, line)| line.ends_with("Target device found: DUT-1")));
    }

    #[tokio::test]
    async fn test_run_without_selection() {
        let (_, mut bench) = workbench(MockAdapter::new());
        assert!(matches!(bench.run("DUT-1").await, Err(Error::NoSelection)));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let log = LogSink::in_memory();
        let bench = Workbench::new(Arc::new(MockAdapter::new()), log.clone(), Arc::new(NoopListener));
        assert_eq!(log.subscriber_count(), 1);
        drop(bench);
        assert_eq!(log.subscriber_count(), 0);
    }
}
