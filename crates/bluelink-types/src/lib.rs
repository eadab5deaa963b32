//! Platform-agnostic types for the bluelink BLE conformance runner.
//!
//! This crate holds the data model shared by the orchestration core
//! (bluelink-core) and the command-line front end (bluelink-cli).
//!
//! # Features
//!
//! - Discovered devices and the per-scan device list
//! - Service/characteristic descriptors and the flattened GATT item list
//! - Test case, outcome and run report types
//! - Bluetooth SIG UUID constants and short-form helpers
//! - Value formatting and parsing for characteristic payloads
//!
//! # Example
//!
//! ```
//! use bluelink_types::{DeviceList, DiscoveredDevice, format_value};
//!
//! let mut list = DeviceList::new();
//! list.upsert(DiscoveredDevice::new("AA:BB:CC:DD:EE:FF", Some("DUT-1"), -42));
//! assert_eq!(list.len(), 1);
//! assert_eq!(format_value(&[42]), "42");
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    BondState, CaseResult, CharacteristicDescriptor, CharacteristicProperties, CharacteristicRef,
    DeviceList, DiscoveredDevice, GattItem, LogLine, ServiceDescriptor, ServiceKind, TestCase,
    TestOutcome, TestRun, WriteType, format_value, gatt_items, parse_value, split_log_line,
};
pub use uuid as uuids;
