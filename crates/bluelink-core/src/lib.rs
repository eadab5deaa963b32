//! BLE session orchestration and conformance test runner.
//!
//! This crate drives a Bluetooth Low Energy peripheral (the device under test,
//! DUT) through scan, connect, service discovery, GATT operations and bonding,
//! and runs a selectable battery of conformance test cases against it. Every
//! step is written to a per-test-case log.
//!
//! # Features
//!
//! - **Capability adapter**: the [`BleAdapter`] trait, a btleplug-backed
//!   implementation and a scripted [`MockAdapter`] for tests
//! - **Session controller**: an explicit state machine with timeouts, a
//!   settle delay after connecting, and exactly-once terminal handling
//! - **Test runner**: a fixed catalog of cases, selection state and
//!   per-case pass/fail outcomes
//! - **Log sink**: timestamped, per-tag, append-only logs with live
//!   subscribers
//! - **Presentation bridge**: [`Workbench`], the entry points a front end
//!   drives
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use bluelink_core::{LogSink, MockAdapterBuilder, TestRunner};
//!
//! #[tokio::main(flavor = "current_thread", start_paused = true)]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
//!     let mut runner = TestRunner::new(adapter, LogSink::in_memory());
//!
//!     let run = runner.run(&["TC01", "TC03"], "DUT-1").await?;
//!     assert_eq!(run.passed(), 2);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod bridge;
pub mod btle;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod log_sink;
pub mod mock;
pub mod runner;
pub mod session;

pub use bluelink_types::types;
pub use bluelink_types::uuids;

pub use adapter::{
    AdapterError, AdapterResult, AdapterStatus, BleAdapter, EventStream, LinkEvent, Notification,
    ScanEvent,
};
pub use bridge::{NoopListener, PresentationListener, Workbench};
pub use btle::BtleplugAdapter;
pub use config::{RunnerConfig, SessionConfig};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, SessionEvent};
pub use guard::{BondListener, ScanGuard, TerminalGuard};
pub use log_sink::{FileLogStore, LogSink, LogStore, MemoryLogStore, SubscriptionId};
pub use mock::{MockAdapter, MockAdapterBuilder};
pub use runner::{Procedure, TestCatalog, TestRunner};
pub use session::{Connection, FailureKind, SessionController, SessionState};
