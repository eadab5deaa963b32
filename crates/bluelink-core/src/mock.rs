//! Scripted adapter for testing without BLE hardware.
//!
//! [`MockAdapter`] implements [`BleAdapter`] from a script: which
//! advertisements arrive and when, how a connection attempt ends, what
//! discovery returns, which values characteristics hold and how bonding
//! progresses. Every capability call is counted so tests can assert that an
//! operation never reached the adapter.
//!
//! Timed script entries are measured from the start of the scan, connection
//! or bonding attempt and are driven by `tokio::time`, so tests running on a
//! paused clock finish instantly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bluelink_types::uuids::{
    BATTERY_LEVEL, BATTERY_SERVICE, BODY_SENSOR_LOCATION, DEVICE_NAME, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE, GAP_SERVICE, HEART_RATE_CONTROL_POINT, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE,
};
use bluelink_types::{
    BondState, CharacteristicDescriptor, CharacteristicProperties, CharacteristicRef,
    DiscoveredDevice, ServiceDescriptor, WriteType,
};

use crate::adapter::{
    AdapterError, AdapterResult, AdapterStatus, BleAdapter, EventStream, LinkEvent, Notification,
    ScanEvent,
};

/// Status code the mock returns for a characteristic without a stored value.
pub const READ_NOT_PERMITTED: i32 = 0x02;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct CallCounters {
    check_ready: AtomicU32,
    start_scan: AtomicU32,
    stop_scan: AtomicU32,
    connect: AtomicU32,
    discover: AtomicU32,
    read: AtomicU32,
    write: AtomicU32,
    set_notification: AtomicU32,
    notifications: AtomicU32,
    bond: AtomicU32,
    disconnect: AtomicU32,
}

impl CallCounters {
    fn total(&self) -> u32 {
        [
            &self.check_ready,
            &self.start_scan,
            &self.stop_scan,
            &self.connect,
            &self.discover,
            &self.read,
            &self.write,
            &self.set_notification,
            &self.notifications,
            &self.bond,
            &self.disconnect,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }
}

fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// A write the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub target: CharacteristicRef,
    pub value: Vec<u8>,
    pub write_type: WriteType,
}

/// A scripted BLE stack.
///
/// # Example
///
/// ```
/// use bluelink_core::{BleAdapter, MockAdapterBuilder};
/// use bluelink_types::DiscoveredDevice;
///
/// #[tokio::main]
/// async fn main() {
///     let adapter = MockAdapterBuilder::new()
///         .device(DiscoveredDevice::new("AA:BB:CC:DD:EE:01", Some("DUT-1"), -65))
///         .build();
///     let mut scan = adapter.start_scan(None).await.unwrap();
///     assert!(scan.recv().await.is_some());
///     adapter.stop_scan().await.unwrap();
///     assert_eq!(adapter.stop_scan_count(), 1);
/// }
/// ```
#[derive(Debug)]
pub struct MockAdapter {
    status: RwLock<AdapterStatus>,
    scan_script: RwLock<Vec<(Duration, ScanEvent)>>,
    scan_start_error: RwLock<Option<AdapterError>>,
    scan_token: RwLock<Option<CancellationToken>>,
    link_script: RwLock<Vec<(Duration, LinkEvent)>>,
    connect_error: RwLock<Option<AdapterError>>,
    link_sender: RwLock<Option<mpsc::Sender<LinkEvent>>>,
    services: RwLock<Vec<ServiceDescriptor>>,
    discovery_error: RwLock<Option<AdapterError>>,
    values: RwLock<HashMap<CharacteristicRef, Vec<u8>>>,
    read_error: RwLock<Option<AdapterError>>,
    write_error: RwLock<Option<AdapterError>>,
    notify_error: RwLock<Option<AdapterError>>,
    writes: RwLock<Vec<RecordedWrite>>,
    cccd_writes: RwLock<Vec<(CharacteristicRef, [u8; 2])>>,
    notification_sender: RwLock<Option<mpsc::Sender<Notification>>>,
    bond_script: RwLock<Option<Vec<(Duration, BondState)>>>,
    bond_events_dropped: Arc<AtomicU32>,
    latency: RwLock<Duration>,
    calls: CallCounters,
}

impl Default for MockAdapter {
    fn default() -> Self {
        MockAdapterBuilder::new().build()
    }
}

impl MockAdapter {
    /// Create an adapter with an empty script: no advertisements, links
    /// connect immediately, bonding unsupported.
    pub fn new() -> Self {
        Self::default()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read().await;
        if !latency.is_zero() {
            sleep(latency).await;
        }
    }

    async fn check_connected(&self) -> AdapterResult<()> {
        if self.link_sender.read().await.is_some() {
            Ok(())
        } else {
            Err(AdapterError::Platform("not connected".to_string()))
        }
    }

    async fn find_characteristic(
        &self,
        target: &CharacteristicRef,
    ) -> AdapterResult<CharacteristicDescriptor> {
        self.services
            .read()
            .await
            .iter()
            .filter(|s| s.uuid == target.service)
            .find_map(|s| s.characteristic(&target.characteristic).cloned())
            .ok_or(AdapterError::Status(READ_NOT_PERMITTED))
    }

    // --- Test control methods ---

    /// Change the readiness reported by `check_ready`.
    pub async fn set_status(&self, status: AdapterStatus) {
        *self.status.write().await = status;
    }

    /// Store the value returned by reads of a characteristic.
    pub async fn set_value(&self, target: CharacteristicRef, value: Vec<u8>) {
        self.values.write().await.insert(target, value);
    }

    /// Make every read fail with this error, or clear the failure.
    pub async fn set_read_error(&self, error: Option<AdapterError>) {
        *self.read_error.write().await = error;
    }

    /// Make every write fail with this error, or clear the failure.
    pub async fn set_write_error(&self, error: Option<AdapterError>) {
        *self.write_error.write().await = error;
    }

    /// Delay applied to every GATT request.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    /// Report an unsolicited link loss on the open connection.
    pub async fn simulate_disconnect(&self) -> bool {
        match self.link_sender.write().await.take() {
            Some(sender) => sender.send(LinkEvent::Disconnected).await.is_ok(),
            None => false,
        }
    }

    /// Deliver a notification to the subscriber, if one is listening.
    pub async fn push_notification(&self, target: CharacteristicRef, value: Vec<u8>) -> bool {
        let sender = self.notification_sender.read().await.clone();
        match sender {
            Some(sender) => sender
                .send(Notification {
                    characteristic: target,
                    value,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Writes received so far, in order.
    pub async fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.read().await.clone()
    }

    /// CCCD values written by `set_notification`, in order.
    pub async fn cccd_writes(&self) -> Vec<(CharacteristicRef, [u8; 2])> {
        self.cccd_writes.read().await.clone()
    }

    /// Whether a link is currently open.
    pub async fn is_connected(&self) -> bool {
        self.link_sender.read().await.is_some()
    }

    pub fn check_ready_count(&self) -> u32 {
        self.calls.check_ready.load(Ordering::Relaxed)
    }

    pub fn start_scan_count(&self) -> u32 {
        self.calls.start_scan.load(Ordering::Relaxed)
    }

    pub fn stop_scan_count(&self) -> u32 {
        self.calls.stop_scan.load(Ordering::Relaxed)
    }

    pub fn connect_count(&self) -> u32 {
        self.calls.connect.load(Ordering::Relaxed)
    }

    pub fn discover_count(&self) -> u32 {
        self.calls.discover.load(Ordering::Relaxed)
    }

    pub fn read_count(&self) -> u32 {
        self.calls.read.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u32 {
        self.calls.write.load(Ordering::Relaxed)
    }

    pub fn set_notification_count(&self) -> u32 {
        self.calls.set_notification.load(Ordering::Relaxed)
    }

    pub fn bond_count(&self) -> u32 {
        self.calls.bond.load(Ordering::Relaxed)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.calls.disconnect.load(Ordering::Relaxed)
    }

    /// Number of capability calls of any kind.
    pub fn total_calls(&self) -> u32 {
        self.calls.total()
    }

    /// Scripted bond events that found no listener.
    pub fn bond_events_dropped(&self) -> u32 {
        self.bond_events_dropped.load(Ordering::Relaxed)
    }
}

/// Send timed events on a channel, measured from `start`.
///
/// Returns the number of events the receiver was no longer there to take.
async fn play<T: Send>(
    start: Instant,
    script: Vec<(Duration, T)>,
    tx: &mpsc::Sender<T>,
    cancel: Option<&CancellationToken>,
) -> u32 {
    let mut dropped = 0;
    for (at, event) in script {
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return dropped,
                    _ = sleep_until(start + at) => {}
                }
            }
            None => sleep_until(start + at).await,
        }
        if tx.send(event).await.is_err() {
            dropped += 1;
        }
    }
    dropped
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn check_ready(&self) -> AdapterStatus {
        bump(&self.calls.check_ready);
        *self.status.read().await
    }

    async fn start_scan(&self, name_filter: Option<&str>) -> AdapterResult<EventStream<ScanEvent>> {
        bump(&self.calls.start_scan);
        if let Some(err) = self.scan_start_error.read().await.clone() {
            return Err(err);
        }
        debug!(?name_filter, "Mock scan started");

        let token = CancellationToken::new();
        if let Some(previous) = self.scan_token.write().await.replace(token.clone()) {
            previous.cancel();
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let script = self.scan_script.read().await.clone();
        let start = Instant::now();
        tokio::spawn(async move {
            play(start, script, &tx, Some(&token)).await;
            // The stream stays open until the scan is stopped.
            token.cancelled().await;
        });
        Ok(rx)
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        bump(&self.calls.stop_scan);
        if let Some(token) = self.scan_token.write().await.take() {
            token.cancel();
        }
        Ok(())
    }

    async fn connect(&self, device: &DiscoveredDevice) -> AdapterResult<EventStream<LinkEvent>> {
        bump(&self.calls.connect);
        if let Some(err) = self.connect_error.read().await.clone() {
            return Err(err);
        }
        debug!(address = %device.address, "Mock connect");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let script = self.link_script.read().await.clone();
        let connects = script
            .iter()
            .any(|(_, event)| matches!(event, LinkEvent::Connected));
        if connects {
            *self.link_sender.write().await = Some(tx.clone());
        }
        let start = Instant::now();
        tokio::spawn(async move {
            play(start, script, &tx, None).await;
        });
        Ok(rx)
    }

    async fn discover_services(
        &self,
        _device: &DiscoveredDevice,
    ) -> AdapterResult<Vec<ServiceDescriptor>> {
        bump(&self.calls.discover);
        self.check_connected().await?;
        self.simulate_latency().await;
        if let Some(err) = self.discovery_error.read().await.clone() {
            return Err(err);
        }
        Ok(self.services.read().await.clone())
    }

    async fn read_characteristic(
        &self,
        _device: &DiscoveredDevice,
        target: &CharacteristicRef,
    ) -> AdapterResult<Vec<u8>> {
        bump(&self.calls.read);
        self.check_connected().await?;
        self.simulate_latency().await;
        if let Some(err) = self.read_error.read().await.clone() {
            return Err(err);
        }
        if let Some(value) = self.values.read().await.get(target) {
            return Ok(value.clone());
        }
        self.find_characteristic(target)
            .await?
            .value
            .ok_or(AdapterError::Status(READ_NOT_PERMITTED))
    }

    async fn write_characteristic(
        &self,
        _device: &DiscoveredDevice,
        target: &CharacteristicRef,
        value: &[u8],
        write_type: WriteType,
    ) -> AdapterResult<()> {
        bump(&self.calls.write);
        self.check_connected().await?;
        self.simulate_latency().await;
        if let Some(err) = self.write_error.read().await.clone() {
            return Err(err);
        }
        self.find_characteristic(target).await?;
        self.writes.write().await.push(RecordedWrite {
            target: *target,
            value: value.to_vec(),
            write_type,
        });
        self.values.write().await.insert(*target, value.to_vec());
        Ok(())
    }

    async fn set_notification(
        &self,
        _device: &DiscoveredDevice,
        target: &CharacteristicRef,
        enable: bool,
    ) -> AdapterResult<()> {
        bump(&self.calls.set_notification);
        self.check_connected().await?;
        self.simulate_latency().await;
        if let Some(err) = self.notify_error.read().await.clone() {
            return Err(err);
        }
        let characteristic = self.find_characteristic(target).await?;
        if enable && !characteristic.properties.is_notifiable() {
            return Err(AdapterError::NotSupported);
        }
        let value = if enable {
            ENABLE_NOTIFICATION_VALUE
        } else {
            DISABLE_NOTIFICATION_VALUE
        };
        self.cccd_writes.write().await.push((*target, value));
        Ok(())
    }

    async fn notifications(
        &self,
        _device: &DiscoveredDevice,
    ) -> AdapterResult<EventStream<Notification>> {
        bump(&self.calls.notifications);
        self.check_connected().await?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.notification_sender.write().await = Some(tx);
        Ok(rx)
    }

    async fn create_bond(&self, device: &DiscoveredDevice) -> AdapterResult<EventStream<BondState>> {
        bump(&self.calls.bond);
        let Some(script) = self.bond_script.read().await.clone() else {
            return Err(AdapterError::NotSupported);
        };
        debug!(address = %device.address, "Mock bonding started");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let dropped = Arc::clone(&self.bond_events_dropped);
        let start = Instant::now();
        tokio::spawn(async move {
            let lost = play(start, script, &tx, None).await;
            dropped.fetch_add(lost, Ordering::Relaxed);
        });
        Ok(rx)
    }

    async fn disconnect(&self, _device: &DiscoveredDevice) -> AdapterResult<()> {
        bump(&self.calls.disconnect);
        self.link_sender.write().await.take();
        self.notification_sender.write().await.take();
        Ok(())
    }
}

/// Builder for creating mock adapters with a custom script.
#[derive(Debug, Clone)]
pub struct MockAdapterBuilder {
    status: AdapterStatus,
    scan_script: Vec<(Duration, ScanEvent)>,
    scan_start_error: Option<AdapterError>,
    link_script: Vec<(Duration, LinkEvent)>,
    connect_error: Option<AdapterError>,
    services: Vec<ServiceDescriptor>,
    discovery_error: Option<AdapterError>,
    values: HashMap<CharacteristicRef, Vec<u8>>,
    read_error: Option<AdapterError>,
    write_error: Option<AdapterError>,
    notify_error: Option<AdapterError>,
    bond_script: Option<Vec<(Duration, BondState)>>,
    latency: Duration,
}

impl Default for MockAdapterBuilder {
    fn default() -> Self {
        Self {
            status: AdapterStatus::Ready,
            scan_script: Vec::new(),
            scan_start_error: None,
            link_script: vec![(Duration::ZERO, LinkEvent::Connected)],
            connect_error: None,
            services: Vec::new(),
            discovery_error: None,
            values: HashMap::new(),
            read_error: None,
            write_error: None,
            notify_error: None,
            bond_script: None,
            latency: Duration::ZERO,
        }
    }
}

impl MockAdapterBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A heart-rate peripheral named `name` as it would appear on a test bench.
    ///
    /// An unnamed device advertises first; the DUT is seen at -65 dBm after
    /// 300 ms. Body sensor location reads `[42]`, heart rate measurement
    /// notifies, and bonding completes after 1.5 s.
    #[must_use]
    pub fn heart_rate_dut(name: &str) -> Self {
        let heart_rate = ServiceDescriptor::primary(HEART_RATE_SERVICE)
            .with_characteristic(CharacteristicDescriptor::new(
                HEART_RATE_MEASUREMENT,
                CharacteristicProperties::NOTIFY,
            ))
            .with_characteristic(CharacteristicDescriptor::new(
                BODY_SENSOR_LOCATION,
                CharacteristicProperties::READ,
            ))
            .with_characteristic(CharacteristicDescriptor::new(
                HEART_RATE_CONTROL_POINT,
                CharacteristicProperties::WRITE,
            ));
        let battery = ServiceDescriptor::primary(BATTERY_SERVICE).with_characteristic(
            CharacteristicDescriptor::new(
                BATTERY_LEVEL,
                CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
            ),
        );
        let gap = ServiceDescriptor::primary(GAP_SERVICE).with_characteristic(
            CharacteristicDescriptor::new(DEVICE_NAME, CharacteristicProperties::READ),
        );

        Self::new()
            .device_at(
                Duration::from_millis(100),
                DiscoveredDevice::new("5C:F3:70:11:22:33", None, -88),
            )
            .device_at(
                Duration::from_millis(300),
                DiscoveredDevice::new("00:11:22:33:44:55", Some(name), -65),
            )
            .service(gap)
            .service(heart_rate)
            .service(battery)
            .value(
                CharacteristicRef::new(HEART_RATE_SERVICE, BODY_SENSOR_LOCATION),
                vec![42],
            )
            .value(CharacteristicRef::new(BATTERY_SERVICE, BATTERY_LEVEL), vec![87])
            .value(
                CharacteristicRef::new(GAP_SERVICE, DEVICE_NAME),
                name.as_bytes().to_vec(),
            )
            .bond_events(vec![
                (Duration::from_millis(500), BondState::Bonding),
                (Duration::from_millis(1500), BondState::Bonded),
            ])
    }

    /// Set the readiness reported by `check_ready`.
    #[must_use]
    pub fn status(mut self, status: AdapterStatus) -> Self {
        self.status = status;
        self
    }

    /// Advertise a device as soon as the scan starts.
    #[must_use]
    pub fn device(self, device: DiscoveredDevice) -> Self {
        self.device_at(Duration::ZERO, device)
    }

    /// Advertise a device `at` after the scan starts.
    #[must_use]
    pub fn device_at(mut self, at: Duration, device: DiscoveredDevice) -> Self {
        self.scan_script.push((at, ScanEvent::Result(device)));
        self
    }

    /// Abort the scan with a status code `at` after it starts.
    #[must_use]
    pub fn scan_failure_at(mut self, at: Duration, code: i32) -> Self {
        self.scan_script.push((at, ScanEvent::Failed(code)));
        self
    }

    /// Refuse to start scanning.
    #[must_use]
    pub fn scan_start_error(mut self, error: AdapterError) -> Self {
        self.scan_start_error = Some(error);
        self
    }

    /// Replace the link events played for each connection attempt.
    #[must_use]
    pub fn link_events(mut self, events: Vec<(Duration, LinkEvent)>) -> Self {
        self.link_script = events;
        self
    }

    /// Make connection attempts end with `Failed(code)`.
    #[must_use]
    pub fn connect_failure(self, code: i32) -> Self {
        self.link_events(vec![(Duration::ZERO, LinkEvent::Failed(code))])
    }

    /// Refuse connection attempts outright.
    #[must_use]
    pub fn connect_error(mut self, error: AdapterError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Add a service to the discovery result.
    #[must_use]
    pub fn service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }

    /// Make discovery fail.
    #[must_use]
    pub fn discovery_error(mut self, error: AdapterError) -> Self {
        self.discovery_error = Some(error);
        self
    }

    /// Value returned by reads of a characteristic.
    #[must_use]
    pub fn value(mut self, target: CharacteristicRef, value: Vec<u8>) -> Self {
        self.values.insert(target, value);
        self
    }

    #[must_use]
    pub fn read_error(mut self, error: AdapterError) -> Self {
        self.read_error = Some(error);
        self
    }

    #[must_use]
    pub fn write_error(mut self, error: AdapterError) -> Self {
        self.write_error = Some(error);
        self
    }

    #[must_use]
    pub fn notify_error(mut self, error: AdapterError) -> Self {
        self.notify_error = Some(error);
        self
    }

    /// Bond states played after `create_bond`. Without a script bonding
    /// is reported as unsupported.
    #[must_use]
    pub fn bond_events(mut self, events: Vec<(Duration, BondState)>) -> Self {
        self.bond_script = Some(events);
        self
    }

    /// Delay applied to every GATT request.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Build the mock adapter.
    #[must_use]
    pub fn build(self) -> MockAdapter {
        MockAdapter {
            status: RwLock::new(self.status),
            scan_script: RwLock::new(self.scan_script),
            scan_start_error: RwLock::new(self.scan_start_error),
            scan_token: RwLock::new(None),
            link_script: RwLock::new(self.link_script),
            connect_error: RwLock::new(self.connect_error),
            link_sender: RwLock::new(None),
            services: RwLock::new(self.services),
            discovery_error: RwLock::new(self.discovery_error),
            values: RwLock::new(self.values),
            read_error: RwLock::new(self.read_error),
            write_error: RwLock::new(self.write_error),
            notify_error: RwLock::new(self.notify_error),
            writes: RwLock::new(Vec::new()),
            cccd_writes: RwLock::new(Vec::new()),
            notification_sender: RwLock::new(None),
            bond_script: RwLock::new(self.bond_script),
            bond_events_dropped: Arc::new(AtomicU32::new(0)),
            latency: RwLock::new(self.latency),
            calls: CallCounters::default(),
        }
    }
}
