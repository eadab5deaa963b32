//! Error types for bluelink-core.
//!
//! Two layers of errors exist:
//!
//! - [`AdapterError`](crate::adapter::AdapterError) is what a
//!   [`BleAdapter`](crate::adapter::BleAdapter) implementation reports: raw
//!   status codes, unsupported operations, a missing radio.
//! - [`Error`] is what the session controller and test runner report. Adapter
//!   errors are converted at the controller boundary, together with the
//!   state transition they cause.
//!
//! ## Which errors end a test case
//!
//! | Error | Raised by | Connection afterwards |
//! |-------|-----------|-----------------------|
//! | [`Error::PermissionDenied`], [`Error::AdapterUnavailable`] | scan readiness check | none |
//! | [`Error::ScanError`], [`Error::ScanTimeout`] | scan | none |
//! | [`Error::ConnectError`] | connect | released |
//! | [`Error::DiscoveryError`] | discovery | released |
//! | [`Error::OperationError`], [`Error::NotSupported`] | read, write, notify | kept, still ready |
//! | [`Error::BondError`] | bonding | kept |
//! | [`Error::NoSelection`], [`Error::MissingDutName`] | runner input validation | never opened |

use std::time::Duration;

use thiserror::Error;

use bluelink_types::ParseError;

/// Errors reported by the session controller and the test runner.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth permissions are missing.
    #[error("Missing Bluetooth permissions.")]
    PermissionDenied,

    /// No adapter, or the radio is switched off.
    #[error("Bluetooth not available or disabled.")]
    AdapterUnavailable,

    /// The platform rejected or aborted a scan.
    #[error("Scan failed with error code: {code}")]
    ScanError {
        /// Platform status code.
        code: i32,
    },

    /// No matching device appeared before the scan deadline.
    #[error("Scan timeout. Device not found after {duration:?}")]
    ScanTimeout {
        /// The scan window that elapsed.
        duration: Duration,
    },

    /// The link could not be established.
    #[error("Connection to {device} failed: {reason}")]
    ConnectError {
        /// Address of the device.
        device: String,
        /// What the platform reported.
        reason: String,
    },

    /// Service discovery finished with a non-success status.
    #[error("Service discovery failed with status {code}")]
    DiscoveryError {
        /// Platform status code.
        code: i32,
    },

    /// A read, write or notification change failed.
    #[error("{operation} failed with status {code}")]
    OperationError {
        /// The GATT operation, e.g. `Read`.
        operation: String,
        /// Platform status code.
        code: i32,
    },

    /// The characteristic or adapter does not support the operation.
    #[error("{operation} not supported")]
    NotSupported {
        /// The operation that was refused.
        operation: String,
    },

    /// Pairing did not reach the bonded state.
    #[error("Bonding with {device} failed: {reason}")]
    BondError {
        /// Address of the device.
        device: String,
        /// Why bonding stopped.
        reason: String,
    },

    /// A run was requested with no test case selected.
    #[error("No test case selected")]
    NoSelection,

    /// A run was requested without a DUT name.
    #[error("DUT name is required")]
    MissingDutName,

    /// The selected test case has no procedure.
    #[error("Test case {id} is not implemented")]
    NotImplemented {
        /// The unknown test case id.
        id: String,
    },

    /// A characteristic operation was requested before service discovery completed.
    #[error("Services have not been discovered on this connection")]
    NotDiscovered,

    /// No connection is open.
    #[error("Not connected to device")]
    NotConnected,

    /// The characteristic is not part of the discovered tree.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// The controller is in a state that does not accept the request.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The requested operation.
        operation: String,
        /// The state the controller was in.
        state: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Bluetooth Low Energy error from the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A UUID or value could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure.
    pub fn connect_failed(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectError {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create a bonding failure.
    pub fn bond_failed(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BondError {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create a failed GATT operation error.
    pub fn operation_failed(operation: impl Into<String>, code: i32) -> Self {
        Self::OperationError {
            operation: operation.into(),
            code,
        }
    }

    /// Create a not-supported error.
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error rejects caller input before any device interaction.
    ///
    /// Validation errors are returned to the caller instead of being recorded
    /// as a test outcome.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::NoSelection | Self::MissingDutName)
    }
}

/// Result type alias using bluelink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
