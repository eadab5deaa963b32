//! The capability interface between the session controller and a BLE stack.
//!
//! A [`BleAdapter`] exposes the radio operations the controller needs:
//! discovery, link management, GATT access and bonding. Long-running
//! operations (scan, link, bonding, notifications) hand back an
//! [`EventStream`]; the controller owns the stream and decides when to stop
//! listening. Request/response operations resolve once the stack answers.
//!
//! Implementations:
//! - [`BtleplugAdapter`](crate::btle::BtleplugAdapter) for real hardware.
//! - [`MockAdapter`](crate::mock::MockAdapter) for tests and demos.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use bluelink_types::{
    BondState, CharacteristicRef, DiscoveredDevice, ServiceDescriptor, WriteType,
};

/// Generic failure status used when the stack reports no specific code.
pub const GATT_FAILURE: i32 = 0x101;

/// Asynchronous stream of events from the adapter.
///
/// Dropping the receiver detaches the listener; the adapter stops delivering.
pub type EventStream<T> = mpsc::Receiver<T>;

/// Errors reported by a [`BleAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AdapterError {
    /// The stack answered with a non-success status code.
    #[error("status {0}")]
    Status(i32),
    /// The stack or the characteristic cannot perform the operation.
    #[error("operation not supported")]
    NotSupported,
    /// No adapter, or the radio is off.
    #[error("Bluetooth adapter unavailable")]
    Unavailable,
    /// The process lacks Bluetooth permissions.
    #[error("missing Bluetooth permissions")]
    PermissionDenied,
    /// The device handle is unknown to the adapter.
    #[error("unknown device {0}")]
    UnknownDevice(String),
    /// Any other platform error, carried as text.
    #[error("{0}")]
    Platform(String),
}

impl AdapterError {
    /// Status code to report for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Status(code) => *code,
            _ => GATT_FAILURE,
        }
    }
}

impl From<btleplug::Error> for AdapterError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => Self::PermissionDenied,
            btleplug::Error::NotSupported(_) => Self::NotSupported,
            btleplug::Error::DeviceNotFound => Self::UnknownDevice(err.to_string()),
            other => Self::Platform(other.to_string()),
        }
    }
}

/// Result type for adapter calls.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Radio and permission state reported before scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    /// Permissions granted and radio on.
    Ready,
    /// The process lacks Bluetooth permissions.
    PermissionDenied,
    /// Radio is switched off.
    RadioOff,
    /// No adapter present.
    Unavailable,
}

/// One scan callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// An advertisement was received.
    Result(DiscoveredDevice),
    /// The scan was aborted by the stack.
    Failed(i32),
}

/// Link state signals for one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Failed(i32),
}

/// A value-change notification from a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: CharacteristicRef,
    pub value: Vec<u8>,
}

/// BLE capabilities consumed by the session controller.
///
/// The controller serializes calls per connection: at most one GATT
/// operation is in flight against a device at any time.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Report permission and radio state.
    async fn check_ready(&self) -> AdapterStatus;

    /// Start scanning. Events arrive on the returned stream until
    /// [`stop_scan`](Self::stop_scan) is called.
    ///
    /// `name_filter` is a hint; the controller applies its own matching.
    async fn start_scan(&self, name_filter: Option<&str>) -> AdapterResult<EventStream<ScanEvent>>;

    /// Stop the active scan.
    async fn stop_scan(&self) -> AdapterResult<()>;

    /// Open a GATT link. The first event on the stream is the outcome of the
    /// attempt; a later `Disconnected` is an unsolicited link loss.
    async fn connect(&self, device: &DiscoveredDevice) -> AdapterResult<EventStream<LinkEvent>>;

    /// Enumerate services and characteristics on a connected device.
    async fn discover_services(
        &self,
        device: &DiscoveredDevice,
    ) -> AdapterResult<Vec<ServiceDescriptor>>;

    /// Read a characteristic value.
    async fn read_characteristic(
        &self,
        device: &DiscoveredDevice,
        target: &CharacteristicRef,
    ) -> AdapterResult<Vec<u8>>;

    /// Write a characteristic value.
    async fn write_characteristic(
        &self,
        device: &DiscoveredDevice,
        target: &CharacteristicRef,
        value: &[u8],
        write_type: WriteType,
    ) -> AdapterResult<()>;

    /// Enable or disable notifications, including the CCCD write.
    ///
    /// Fails with [`AdapterError::NotSupported`] when enabling a
    /// characteristic that has no notify or indicate property.
    async fn set_notification(
        &self,
        device: &DiscoveredDevice,
        target: &CharacteristicRef,
        enable: bool,
    ) -> AdapterResult<()>;

    /// Stream of notifications from the device's subscribed characteristics.
    async fn notifications(
        &self,
        device: &DiscoveredDevice,
    ) -> AdapterResult<EventStream<Notification>>;

    /// Start pairing. Bond state transitions arrive on the returned stream.
    async fn create_bond(&self, device: &DiscoveredDevice) -> AdapterResult<EventStream<BondState>>;

    /// Close the link and release platform resources.
    async fn disconnect(&self, device: &DiscoveredDevice) -> AdapterResult<()>;
}
