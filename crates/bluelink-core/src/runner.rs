//! Test case registry and runner.
//!
//! The [`TestCatalog`] holds the fixed, ordered set of conformance cases and
//! their selection flags. The [`TestRunner`] executes a selection against a
//! named DUT, driving a [`SessionController`] through the procedure of each
//! case and recording one outcome per case.
//!
//! A failing case never aborts the run: every controller error becomes a
//! `Failed` outcome, logged under the case's tag. Only an empty selection or a
//! blank DUT name are reported to the caller, and both are rejected before the
//! adapter is touched.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use bluelink_types::{CaseResult, TestCase, TestOutcome, TestRun, format_value};

use crate::adapter::BleAdapter;
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::log_sink::LogSink;
use crate::session::SessionController;

/// The procedure a catalog entry executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    /// Scan for the DUT.
    Scan,
    /// Scan, then connect (discovery is attempted but not required).
    Connect,
    /// Scan, connect, discover, then read the configured characteristic.
    Read,
    /// Scan, connect, then bond.
    Bond,
}

impl Procedure {
    /// The procedure bound to a catalog id.
    pub fn for_id(id: &str) -> Option<Self> {
        match id {
            "TC01" => Some(Self::Scan),
            "TC02" => Some(Self::Connect),
            "TC03" => Some(Self::Read),
            "TC04" => Some(Self::Bond),
            _ => None,
        }
    }

    /// Log tag the procedure writes under.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Scan => "TC01_Scan",
            Self::Connect => "TC02_Connect",
            Self::Read => "TC03_GATT_Read",
            Self::Bond => "TC04_Bonding",
        }
    }
}

/// Log tag for a case id. Ids without a procedure log under the id itself.
pub fn log_tag_for(id: &str) -> String {
    Procedure::for_id(id)
        .map(|p| p.tag().to_string())
        .unwrap_or_else(|| id.to_string())
}

/// Ordered catalog of test cases with selection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCatalog {
    cases: Vec<TestCase>,
}

impl Default for TestCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl TestCatalog {
    /// The built-in conformance catalog.
    pub fn standard() -> Self {
        Self {
            cases: vec![
                TestCase::new(
                    "TC01",
                    "Advertise & Discover",
                    "Verify DUT is discoverable via scan.",
                ),
                TestCase::new("TC02", "Connect to DUT", "Test GATT connection initiation."),
                TestCase::new("TC03", "Read Characteristics", "Read characteristic from DUT."),
                TestCase::new(
                    "TC04",
                    "Bonding",
                    "Test pairing using Just Works or Passkey.",
                ),
            ],
        }
    }

    /// Build a catalog from custom cases. Ids must be unique.
    pub fn new(cases: Vec<TestCase>) -> Result<Self> {
        let mut seen = HashSet::new();
        for case in &cases {
            if !seen.insert(case.id.as_str()) {
                return Err(Error::invalid_config(format!(
                    "duplicate test case id {}",
                    case.id
                )));
            }
        }
        Ok(Self { cases })
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn get(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Set one case's selection flag. Returns `false` for an unknown id.
    pub fn set_selected(&mut self, id: &str, selected: bool) -> bool {
        match self.cases.iter_mut().find(|c| c.id == id) {
            Some(case) => {
                case.selected = selected;
                true
            }
            None => false,
        }
    }

    /// Select exactly the given ids.
    pub fn select_only<S: AsRef<str>>(&mut self, ids: &[S]) {
        for case in &mut self.cases {
            case.selected = ids.iter().any(|id| id.as_ref() == case.id);
        }
    }

    pub fn clear_selection(&mut self) {
        for case in &mut self.cases {
            case.selected = false;
        }
    }

    /// Selected ids in catalog order.
    pub fn selected_ids(&self) -> Vec<String> {
        self.cases
            .iter()
            .filter(|c| c.selected)
            .map(|c| c.id.clone())
            .collect()
    }
}

/// Runs selected test cases against a DUT.
pub struct TestRunner<A: BleAdapter + ?Sized + 'static> {
    session: SessionController<A>,
    catalog: TestCatalog,
    config: RunnerConfig,
}

impl<A: BleAdapter + ?Sized + 'static> std::fmt::Debug for TestRunner<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("session", &self.session)
            .field("catalog", &self.catalog)
            .field("config", &self.config)
            .finish()
    }
}

impl<A: BleAdapter + ?Sized + 'static> TestRunner<A> {
    /// Runner over the standard catalog with default configuration.
    pub fn new(adapter: Arc<A>, log: LogSink) -> Self {
        let config = RunnerConfig::default();
        Self {
            session: SessionController::with_config(adapter, log, config.session.clone()),
            catalog: TestCatalog::standard(),
            config,
        }
    }

    /// Runner with explicit configuration.
    pub fn with_config(adapter: Arc<A>, log: LogSink, config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            session: SessionController::with_config(adapter, log, config.session.clone()),
            catalog: TestCatalog::standard(),
            config,
        })
    }

    /// Replace the catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: TestCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &TestCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut TestCatalog {
        &mut self.catalog
    }

    pub fn session(&self) -> &SessionController<A> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionController<A> {
        &mut self.session
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run the cases currently selected in the catalog.
    pub async fn run_selected(&mut self, dut_name: &str) -> Result<TestRun> {
        let selected = self.catalog.selected_ids();
        self.run(&selected, dut_name).await
    }

    /// Run `selected` against the device named `dut_name`.
    ///
    /// Catalog cases run in catalog order regardless of the order given;
    /// ids the catalog does not know are appended as `NotImplemented`.
    #[tracing::instrument(level = "info", skip(self, selected), fields(count = selected.len()))]
    pub async fn run<S: AsRef<str>>(&mut self, selected: &[S], dut_name: &str) -> Result<TestRun> {
        if selected.is_empty() {
            return Err(Error::NoSelection);
        }
        let dut_name = dut_name.trim();
        if dut_name.is_empty() {
            return Err(Error::MissingDutName);
        }

        let wanted: Vec<&str> = selected.iter().map(AsRef::as_ref).collect();
        let mut order: Vec<(String, String)> = self
            .catalog
            .cases()
            .iter()
            .filter(|c| wanted.contains(&c.id.as_str()))
            .map(|c| (c.id.clone(), c.title.clone()))
            .collect();
        for id in &wanted {
            if !self.catalog.contains(id) && !order.iter().any(|(known, _)| known == id) {
                order.push(((*id).to_string(), (*id).to_string()));
            }
        }

        let mut run = TestRun::new(dut_name);
        for (id, title) in order {
            let outcome = self.run_case(&id, &title, dut_name).await;
            run.results.push(CaseResult { id, title, outcome });
        }
        info!(
            passed = run.passed(),
            failed = run.failed(),
            "Test run complete"
        );
        Ok(run)
    }

    async fn run_case(&mut self, id: &str, title: &str, dut_name: &str) -> TestOutcome {
        self.session.set_log_tag(log_tag_for(id));
        let Some(procedure) = Procedure::for_id(id) else {
            warn!(id, "No procedure for test case");
            self.session
                .log_sink()
                .append(&log_tag_for(id), &format!("Test {id} is not implemented"));
            return TestOutcome::NotImplemented;
        };

        self.session.log_sink().append(
            procedure.tag(),
            &format!("Starting {id} ({title}) against {dut_name}"),
        );
        let outcome = match self.execute(procedure, dut_name).await {
            Ok(message) => TestOutcome::passed(message),
            Err(e) => TestOutcome::failed(e.to_string()),
        };
        self.session
            .log_sink()
            .append(procedure.tag(), &outcome.to_string());

        if let Err(e) = self.session.disconnect().await {
            warn!("Cleanup after {} failed: {}", id, e);
        }
        outcome
    }

    async fn execute(&mut self, procedure: Procedure, dut_name: &str) -> Result<String> {
        let scan_timeout = self.config.session.scan_timeout;
        let device = self.session.begin_scan(Some(dut_name), scan_timeout).await?;

        match procedure {
            Procedure::Scan => Ok(format!(
                "Found {} ({}) at {} dBm",
                device.display_name(),
                device.address,
                device.rssi
            )),
            Procedure::Connect => {
                self.session.connect(&device).await?;
                if let Err(e) = self.session.discover().await {
                    warn!("Discovery after connect failed: {}", e);
                }
                Ok(format!("Connected to {}", device.address))
            }
            Procedure::Read => {
                self.session.connect(&device).await?;
                self.session.discover().await?;
                let target = self.config.read_target;
                let value = self.session.read(target).await?;
                Ok(format!("Read {target}: Value = {}", format_value(&value)))
            }
            Procedure::Bond => {
                self.session.connect(&device).await?;
                self.session.bond().await?;
                Ok(format!("Bonded with {}", device.address))
            }
        }
    }
}
