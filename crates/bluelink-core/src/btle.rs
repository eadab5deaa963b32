//! [`BleAdapter`] over the host Bluetooth stack via btleplug.
//!
//! Peripherals seen during a scan are remembered by identifier so later
//! connect and GATT calls can find them again. A new scan forgets every
//! peripheral without an open link. On macOS the address is
//! hidden (`00:00:00:00:00:00`), so the platform peripheral id is used as
//! the identifier instead.
//!
//! btleplug has no pairing API; [`create_bond`](BleAdapter::create_bond)
//! reports [`AdapterError::NotSupported`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    CentralEvent, CharPropFlags, Characteristic, Central as _, Manager as _, Peripheral as _,
    ScanFilter, WriteType as PlatformWriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bluelink_types::{
    BondState, CharacteristicDescriptor, CharacteristicProperties, CharacteristicRef,
    DiscoveredDevice, ServiceDescriptor, ServiceKind, WriteType,
};

use crate::adapter::{
    AdapterError, AdapterResult, AdapterStatus, BleAdapter, EventStream, LinkEvent, Notification,
    ScanEvent,
};
use crate::error::{Error, Result};

const CHANNEL_CAPACITY: usize = 64;
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Render a platform peripheral id without its debug wrapper.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{id:?}")
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Identifier for a peripheral: its address, or the platform id where the
/// address is hidden.
fn identifier(address: &str, platform_id: &str) -> String {
    if address == HIDDEN_ADDRESS {
        platform_id.to_string()
    } else {
        address.to_string()
    }
}

/// Drop remembered peripherals that have no open link.
fn retain_linked<P, L>(peripherals: &mut HashMap<String, P>, links: &HashMap<String, L>) {
    peripherals.retain(|address, _| links.contains_key(address));
}

fn properties_of(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties::from_bits(flags.bits())
}

fn kind_of(primary: bool) -> ServiceKind {
    if primary {
        ServiceKind::Primary
    } else {
        ServiceKind::Secondary
    }
}

fn platform_write_type(write_type: WriteType) -> PlatformWriteType {
    match write_type {
        WriteType::WithResponse => PlatformWriteType::WithResponse,
        WriteType::WithoutResponse => PlatformWriteType::WithoutResponse,
    }
}

/// Adapter bound to one host Bluetooth controller.
pub struct BtleplugAdapter {
    adapter: Adapter,
    peripherals: Arc<RwLock<HashMap<String, Peripheral>>>,
    scan: RwLock<Option<CancellationToken>>,
    links: RwLock<HashMap<String, CancellationToken>>,
}

impl std::fmt::Debug for BtleplugAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugAdapter").finish_non_exhaustive()
    }
}

impl BtleplugAdapter {
    /// Bind to the first Bluetooth controller on the host.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::AdapterUnavailable)?;
        Ok(Self::from_adapter(adapter))
    }

    /// Wrap an adapter obtained elsewhere.
    pub fn from_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
            scan: RwLock::new(None),
            links: RwLock::new(HashMap::new()),
        }
    }

    async fn peripheral(&self, device: &DiscoveredDevice) -> AdapterResult<Peripheral> {
        self.peripherals
            .read()
            .await
            .get(&device.address)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownDevice(device.address.clone()))
    }

    fn characteristic(
        peripheral: &Peripheral,
        target: &CharacteristicRef,
    ) -> AdapterResult<Characteristic> {
        peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == target.service)
            .flat_map(|s| s.characteristics.into_iter())
            .find(|c| c.uuid == target.characteristic)
            .ok_or(AdapterError::NotSupported)
    }
}

/// Turn a discovery event into a device record, remembering the peripheral.
async fn sighting(
    adapter: &Adapter,
    peripherals: &RwLock<HashMap<String, Peripheral>>,
    id: &PeripheralId,
) -> Option<DiscoveredDevice> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let platform_id = format_peripheral_id(id);
    let address = identifier(&properties.address.to_string(), &platform_id);
    let device = DiscoveredDevice::new(
        address.clone(),
        properties.local_name.as_deref(),
        properties.rssi.unwrap_or_default(),
    )
    .with_platform_id(platform_id);
    peripherals.write().await.insert(address, peripheral);
    Some(device)
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn check_ready(&self) -> AdapterStatus {
        match self.adapter.adapter_info().await {
            Ok(info) => {
                debug!(%info, "Adapter ready");
                AdapterStatus::Ready
            }
            Err(btleplug::Error::PermissionDenied) => AdapterStatus::PermissionDenied,
            Err(e) => {
                warn!("Adapter not ready: {}", e);
                AdapterStatus::Unavailable
            }
        }
    }

    async fn start_scan(&self, name_filter: Option<&str>) -> AdapterResult<EventStream<ScanEvent>> {
        {
            let links = self.links.read().await;
            retain_linked(&mut *self.peripherals.write().await, &links);
        }
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!(?name_filter, "BLE scan started");

        let token = CancellationToken::new();
        if let Some(previous) = self.scan.write().await.replace(token.clone()) {
            previous.cancel();
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let adapter = self.adapter.clone();
        let peripherals = Arc::clone(&self.peripherals);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.next() => event,
                };
                let id = match event {
                    Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => id,
                    Some(_) => continue,
                    None => break,
                };
                let Some(device) = sighting(&adapter, &peripherals, &id).await else {
                    continue;
                };
                if tx.send(ScanEvent::Result(device)).await.is_err() {
                    break;
                }
            }
            debug!("Scan event task finished");
        });
        Ok(rx)
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        if let Some(token) = self.scan.write().await.take() {
            token.cancel();
        }
        self.adapter.stop_scan().await?;
        info!("BLE scan stopped");
        Ok(())
    }

    async fn connect(&self, device: &DiscoveredDevice) -> AdapterResult<EventStream<LinkEvent>> {
        let peripheral = self.peripheral(device).await?;
        let mut events = self.adapter.events().await?;
        let id = peripheral.id();

        let token = CancellationToken::new();
        if let Some(previous) = self
            .links
            .write()
            .await
            .insert(device.address.clone(), token.clone())
        {
            previous.cancel();
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let outcome = match peripheral.connect().await {
                Ok(()) => LinkEvent::Connected,
                Err(e) => {
                    warn!("Connect failed: {}", e);
                    LinkEvent::Failed(AdapterError::from(e).code())
                }
            };
            if tx.send(outcome).await.is_err() || outcome != LinkEvent::Connected {
                return;
            }
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.next() => event,
                };
                match event {
                    Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                        let _ = tx.send(LinkEvent::Disconnected).await;
                        break;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        });
        Ok(rx)
    }

    async fn discover_services(
        &self,
        device: &DiscoveredDevice,
    ) -> AdapterResult<Vec<ServiceDescriptor>> {
        let peripheral = self.peripheral(device).await?;
        peripheral.discover_services().await?;

        let services = peripheral
            .services()
            .into_iter()
            .map(|service| ServiceDescriptor {
                uuid: service.uuid,
                kind: kind_of(service.primary),
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| CharacteristicDescriptor::new(c.uuid, properties_of(c.properties)))
                    .collect(),
            })
            .collect::<Vec<_>>();
        debug!("Found {} services", services.len());
        Ok(services)
    }

    async fn read_characteristic(
        &self,
        device: &DiscoveredDevice,
        target: &CharacteristicRef,
    ) -> AdapterResult<Vec<u8>> {
        let peripheral = self.peripheral(device).await?;
        let characteristic = Self::characteristic(&peripheral, target)?;
        Ok(peripheral.read(&characteristic).await?)
    }

    async fn write_characteristic(
        &self,
        device: &DiscoveredDevice,
        target: &CharacteristicRef,
        value: &[u8],
        write_type: WriteType,
    ) -> AdapterResult<()> {
        let peripheral = self.peripheral(device).await?;
        let characteristic = Self::characteristic(&peripheral, target)?;
        peripheral
            .write(&characteristic, value, platform_write_type(write_type))
            .await?;
        Ok(())
    }

    async fn set_notification(
        &self,
        device: &DiscoveredDevice,
        target: &CharacteristicRef,
        enable: bool,
    ) -> AdapterResult<()> {
        let peripheral = self.peripheral(device).await?;
        let characteristic = Self::characteristic(&peripheral, target)?;
        // subscribe/unsubscribe write the CCCD.
        if enable {
            if !properties_of(characteristic.properties).is_notifiable() {
                return Err(AdapterError::NotSupported);
            }
            peripheral.subscribe(&characteristic).await?;
        } else {
            peripheral.unsubscribe(&characteristic).await?;
        }
        Ok(())
    }

    async fn notifications(
        &self,
        device: &DiscoveredDevice,
    ) -> AdapterResult<EventStream<Notification>> {
        let peripheral = self.peripheral(device).await?;
        let owners: HashMap<Uuid, Uuid> = peripheral
            .services()
            .into_iter()
            .flat_map(|s| s.characteristics.into_iter())
            .map(|c| (c.uuid, c.service_uuid))
            .collect();
        let mut stream = peripheral.notifications().await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let Some(service) = owners.get(&notification.uuid) else {
                    debug!(uuid = %notification.uuid, "Notification from unknown characteristic");
                    continue;
                };
                let forwarded = Notification {
                    characteristic: CharacteristicRef::new(*service, notification.uuid),
                    value: notification.value,
                };
                if tx.send(forwarded).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn create_bond(&self, device: &DiscoveredDevice) -> AdapterResult<EventStream<BondState>> {
        debug!(address = %device.address, "Bonding requested but not available on this stack");
        Err(AdapterError::NotSupported)
    }

    async fn disconnect(&self, device: &DiscoveredDevice) -> AdapterResult<()> {
        if let Some(token) = self.links.write().await.remove(&device.address) {
            token.cancel();
        }
        let peripheral = self.peripheral(device).await?;
        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
