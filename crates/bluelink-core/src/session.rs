//! Session controller: drives one device through scan, connect, discovery,
//! GATT operations, bonding and disconnect.
//!
//! ```text
//! Idle -> Scanning -> Found -> Connecting -> Connected -> DiscoveringServices -> Ready
//!                                                Ready -> Reading | Writing | SettingNotification -> Ready
//!                                    Connected | Ready -> Bonding -> Connected | Ready
//! any state -> Disconnected | Failed -> Idle
//! ```
//!
//! Every operation takes `&mut self`, so at most one request is in flight
//! against the connection. Each operation writes its start and outcome to the
//! [`LogSink`] under the controller's current tag, and every state change is
//! published on the session's [`EventDispatcher`].
//!
//! Failures of read, write and notification changes are reported to the
//! caller but leave the connection `Ready`. Failures of scan, connect and
//! discovery pass through `Failed` and end in `Idle`, releasing the link.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use bluelink_types::uuids::short_label;
use bluelink_types::{
    BondState, CharacteristicDescriptor, CharacteristicRef, DeviceList, DiscoveredDevice, GattItem,
    ServiceDescriptor, WriteType, format_value, gatt_items,
};

use crate::adapter::{
    AdapterError, AdapterStatus, BleAdapter, EventStream, LinkEvent, Notification, ScanEvent,
};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, SessionEvent};
use crate::guard::{BondListener, ScanGuard};
use crate::log_sink::LogSink;

/// Log tag used until a caller sets one.
pub const DEFAULT_LOG_TAG: &str = "session";

/// Why a session entered the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    PermissionDenied,
    AdapterUnavailable,
    ScanError(i32),
    ScanTimeout,
    ConnectError,
    DiscoveryError(i32),
    Timeout,
}

impl FailureKind {
    /// The failure state an error leads to, if it ends the session.
    pub fn of(error: &Error) -> Option<Self> {
        let kind = match error {
            Error::PermissionDenied => Self::PermissionDenied,
            Error::AdapterUnavailable => Self::AdapterUnavailable,
            Error::ScanError { code } => Self::ScanError(*code),
            Error::ScanTimeout { .. } => Self::ScanTimeout,
            Error::ConnectError { .. } => Self::ConnectError,
            Error::DiscoveryError { code } => Self::DiscoveryError(*code),
            Error::Timeout { .. } => Self::Timeout,
            _ => return None,
        };
        Some(kind)
    }
}

/// States of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Scanning,
    Found,
    Connecting,
    Connected,
    DiscoveringServices,
    Ready,
    Reading,
    Writing,
    SettingNotification,
    Bonding,
    Disconnected,
    Failed(FailureKind),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({kind:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// A live GATT session with one device.
#[derive(Debug)]
pub struct Connection {
    device: DiscoveredDevice,
    services: Option<Vec<ServiceDescriptor>>,
    link: EventStream<LinkEvent>,
}

impl Connection {
    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    /// The discovered tree, once discovery has completed.
    pub fn services(&self) -> Option<&[ServiceDescriptor]> {
        self.services.as_deref()
    }

    pub fn is_discovered(&self) -> bool {
        self.services.is_some()
    }
}

/// The asynchronous state machine for one device session.
pub struct SessionController<A: BleAdapter + ?Sized + 'static> {
    adapter: Arc<A>,
    log: LogSink,
    config: SessionConfig,
    tag: String,
    state: SessionState,
    devices: DeviceList,
    found: Option<DiscoveredDevice>,
    connection: Option<Connection>,
    events: EventDispatcher,
}

impl<A: BleAdapter + ?Sized + 'static> fmt::Debug for SessionController<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("tag", &self.tag)
            .field("state", &self.state)
            .field("devices", &self.devices.len())
            .field("connection", &self.connection)
            .finish()
    }
}

impl<A: BleAdapter + ?Sized + 'static> SessionController<A> {
    /// Create a controller with default timeouts.
    pub fn new(adapter: Arc<A>, log: LogSink) -> Self {
        Self::with_config(adapter, log, SessionConfig::default())
    }

    pub fn with_config(adapter: Arc<A>, log: LogSink, config: SessionConfig) -> Self {
        Self {
            adapter,
            log,
            config,
            tag: DEFAULT_LOG_TAG.to_string(),
            state: SessionState::Idle,
            devices: DeviceList::new(),
            found: None,
            connection: None,
            events: EventDispatcher::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config;
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn log_sink(&self) -> &LogSink {
        &self.log
    }

    /// Tag under which operations are logged.
    pub fn log_tag(&self) -> &str {
        &self.tag
    }

    pub fn set_log_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    /// Subscribe to state, device list and bond events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Devices seen in the current or last scan session.
    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    /// The device matched by the last targeted scan.
    pub fn found_device(&self) -> Option<&DiscoveredDevice> {
        self.found.as_ref()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn services(&self) -> Option<&[ServiceDescriptor]> {
        self.connection.as_ref().and_then(Connection::services)
    }

    /// The discovered tree flattened for display.
    pub fn gatt_items(&self) -> Vec<GattItem> {
        self.services().map(gatt_items).unwrap_or_default()
    }

    fn log(&self, message: impl AsRef<str>) {
        self.log.append(&self.tag, message.as_ref());
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "Session state changed");
        self.state = to;
        self.events.send(SessionEvent::StateChanged { from, to });
    }

    /// Pass through `Failed` into `Idle`, releasing any open link.
    async fn fail(&mut self, error: Error) -> Error {
        warn!(tag = %self.tag, "Session failed: {}", error);
        if let Some(kind) = FailureKind::of(&error) {
            self.transition(SessionState::Failed(kind));
        }
        self.release().await;
        self.transition(SessionState::Idle);
        error
    }

    async fn release(&mut self) {
        if let Some(connection) = self.connection.take()
            && let Err(e) = self.adapter.disconnect(&connection.device).await
        {
            warn!("Failed to release connection: {}", e);
        }
    }

    async fn check_ready(&mut self) -> Result<()> {
        let error = match self.adapter.check_ready().await {
            AdapterStatus::Ready => {
                self.log("Bluetooth adapter ready");
                return Ok(());
            }
            AdapterStatus::PermissionDenied => Error::PermissionDenied,
            AdapterStatus::RadioOff | AdapterStatus::Unavailable => Error::AdapterUnavailable,
        };
        self.log(error.to_string());
        Err(self.fail(error).await)
    }

    fn publish_devices(&self) {
        self.events.send(SessionEvent::DeviceListChanged {
            devices: self.devices.to_vec(),
        });
    }

    /// Scan until a device matching `target` appears or `window` elapses.
    ///
    /// Without a target the first device seen matches. The scan is stopped
    /// exactly once on whichever terminal event arrives first; events after
    /// that are never processed.
    #[tracing::instrument(level = "info", skip(self), fields(tag = %self.tag))]
    pub async fn begin_scan(
        &mut self,
        target: Option<&str>,
        window: Duration,
    ) -> Result<DiscoveredDevice> {
        match self.run_scan(target, true, window).await? {
            Some(device) => Ok(device),
            None => {
                self.log("Scan timeout. Device not found.");
                Err(self
                    .fail(Error::ScanTimeout { duration: window })
                    .await)
            }
        }
    }

    /// Scan for the whole `window`, collecting every device seen.
    ///
    /// Returns the de-duplicated list in first-seen order.
    #[tracing::instrument(level = "info", skip(self), fields(tag = %self.tag))]
    pub async fn scan_devices(&mut self, window: Duration) -> Result<Vec<DiscoveredDevice>> {
        self.run_scan(None, false, window).await?;
        self.log(format!("Scan finished: {} device(s) found", self.devices.len()));
        self.transition(SessionState::Idle);
        Ok(self.devices.to_vec())
    }

    async fn run_scan(
        &mut self,
        target: Option<&str>,
        stop_on_match: bool,
        window: Duration,
    ) -> Result<Option<DiscoveredDevice>> {
        if self.connection.is_some()
            || !matches!(self.state, SessionState::Idle | SessionState::Found)
        {
            return Err(Error::invalid_state("scan", self.state));
        }
        self.check_ready().await?;

        self.found = None;
        if !self.devices.is_empty() {
            self.devices.clear();
            self.publish_devices();
        }
        self.transition(SessionState::Scanning);
        match target {
            Some(name) => self.log(format!("Starting scan for {name}")),
            None => self.log("Starting scan"),
        }

        let mut stream = match self.adapter.start_scan(target).await {
            Ok(stream) => stream,
            Err(e) => {
                let error = match e {
                    AdapterError::PermissionDenied => Error::PermissionDenied,
                    AdapterError::Unavailable => Error::AdapterUnavailable,
                    other => Error::ScanError { code: other.code() },
                };
                self.log(error.to_string());
                return Err(self.fail(error).await);
            }
        };
        let scan = ScanGuard::new(Arc::clone(&self.adapter));

        let deadline = sleep(window);
        tokio::pin!(deadline);
        let mut open = true;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break Ok(None),
                event = stream.recv(), if open => match event {
                    Some(ScanEvent::Result(device)) => {
                        self.log(format!(
                            "Found device: {} ({})",
                            device.display_name(),
                            device.address
                        ));
                        let address = device.address.clone();
                        if self.devices.upsert(device) {
                            self.publish_devices();
                        }
                        if !stop_on_match {
                            continue;
                        }
                        let Some(seen) = self.devices.get(&address) else {
                            continue;
                        };
                        let matched = target.is_none_or(|name| seen.matches_name(name));
                        if matched {
                            break Ok(Some(seen.clone()));
                        }
                    }
                    Some(ScanEvent::Failed(code)) => break Err(Error::ScanError { code }),
                    None => {
                        debug!("Scan stream closed by adapter");
                        open = false;
                    }
                }
            }
        };
        drop(stream);
        match scan.stop().await {
            Some(Ok(())) => self.log("Scan stopped"),
            Some(Err(e)) => {
                warn!("Failed to stop scan: {}", e);
                self.log(format!("Failed to stop scan: {e}"));
            }
            None => {}
        }

        match outcome {
            Ok(Some(device)) => {
                info!(address = %device.address, "Target device found");
                self.log(format!("Target device found: {}", device.display_name()));
                self.found = Some(device.clone());
                self.transition(SessionState::Found);
                Ok(Some(device))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                self.log(error.to_string());
                Err(self.fail(error).await)
            }
        }
    }

    /// Open a GATT link to `device`.
    ///
    /// Reports success only after the settle delay has elapsed with the link
    /// still up.
    #[tracing::instrument(level = "info", skip_all, fields(tag = %self.tag, address = %device.address))]
    pub async fn connect(&mut self, device: &DiscoveredDevice) -> Result<()> {
        if self.connection.is_some()
            || !matches!(self.state, SessionState::Idle | SessionState::Found)
        {
            return Err(Error::invalid_state("connect", self.state));
        }
        self.transition(SessionState::Connecting);
        self.log(format!(
            "Connecting to {} ({})",
            device.display_name(),
            device.address
        ));

        let mut link = match self.adapter.connect(device).await {
            Ok(link) => link,
            Err(e) => return Err(self.connect_failed(device, e.to_string()).await),
        };

        let connect_timeout = self.config.connect_timeout;
        match timeout(connect_timeout, link.recv()).await {
            Ok(Some(LinkEvent::Connected)) => {}
            Ok(Some(LinkEvent::Disconnected)) => {
                self.log(format!("Disconnected from {}", device.address));
                return Err(self.connect_failed(device, "disconnected").await);
            }
            Ok(Some(LinkEvent::Failed(code))) => {
                return Err(self.connect_failed(device, format!("status {code}")).await);
            }
            Ok(None) => return Err(self.connect_failed(device, "link closed").await),
            Err(_) => {
                let reason = format!("timed out after {connect_timeout:?}");
                return Err(self.connect_failed(device, reason).await);
            }
        }

        let settle = self.config.settle_delay;
        if !settle.is_zero() {
            debug!(?settle, "Waiting for link to settle");
            sleep(settle).await;
        }
        if let Ok(LinkEvent::Disconnected | LinkEvent::Failed(_)) = link.try_recv() {
            self.log(format!("Disconnected from {}", device.address));
            return Err(self.connect_failed(device, "link lost while settling").await);
        }

        self.log(format!("Connected to {}", device.address));
        self.connection = Some(Connection {
            device: device.clone(),
            services: None,
            link,
        });
        self.transition(SessionState::Connected);
        Ok(())
    }

    async fn connect_failed(&mut self, device: &DiscoveredDevice, reason: impl Into<String>) -> Error {
        let error = Error::connect_failed(device.address.clone(), reason);
        self.log("Connection failed or unknown state");
        self.log(error.to_string());
        if let Err(e) = self.adapter.disconnect(device).await {
            warn!("Failed to release link after connect failure: {}", e);
        }
        self.fail(error).await
    }

    /// Drain link events and handle an unsolicited disconnect.
    async fn check_link(&mut self) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::NotConnected);
        };
        let lost = loop {
            match connection.link.try_recv() {
                Ok(LinkEvent::Connected) => continue,
                Ok(LinkEvent::Disconnected | LinkEvent::Failed(_)) => break true,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break false,
            }
        };
        if lost {
            if let Some(connection) = self.connection.take() {
                warn!(address = %connection.device.address, "Link lost");
                self.log(format!("Disconnected from {}", connection.device.address));
                if let Err(e) = self.adapter.disconnect(&connection.device).await {
                    warn!("Failed to release lost link: {}", e);
                }
            }
            self.transition(SessionState::Disconnected);
            self.transition(SessionState::Idle);
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Whether the link is still up. Processes pending link-loss signals.
    pub async fn is_connected(&mut self) -> bool {
        self.check_link().await.is_ok()
    }

    /// Enumerate services and characteristics. Re-discovery replaces the tree.
    #[tracing::instrument(level = "info", skip(self), fields(tag = %self.tag))]
    pub async fn discover(&mut self) -> Result<Vec<ServiceDescriptor>> {
        self.check_link().await?;
        if !matches!(self.state, SessionState::Connected | SessionState::Ready) {
            return Err(Error::invalid_state("discover services", self.state));
        }
        let Some(device) = self.connection.as_ref().map(|c| c.device.clone()) else {
            return Err(Error::NotConnected);
        };

        self.transition(SessionState::DiscoveringServices);
        self.log(format!("Discovering services on {}", device.address));

        let discovery_timeout = self.config.discovery_timeout;
        let result = timeout(discovery_timeout, self.adapter.discover_services(&device)).await;
        let error = match result {
            Ok(Ok(services)) => {
                self.log(format!("Services discovered on {}", device.address));
                for service in &services {
                    debug!(
                        "Service {} with {} characteristics",
                        short_label(&service.uuid),
                        service.characteristics.len()
                    );
                }
                if let Some(connection) = self.connection.as_mut() {
                    connection.services = Some(services.clone());
                }
                self.transition(SessionState::Ready);
                return Ok(services);
            }
            Ok(Err(e)) => Error::DiscoveryError { code: e.code() },
            Err(_) => Error::timeout("discover services", discovery_timeout),
        };
        self.log(error.to_string());
        Err(self.fail(error).await)
    }

    /// Resolve a characteristic for a GATT operation.
    ///
    /// Fails before touching the adapter when discovery has not completed.
    fn resolve(
        &self,
        operation: &str,
        target: &CharacteristicRef,
    ) -> Result<(DiscoveredDevice, CharacteristicDescriptor)> {
        let connection = self.connection.as_ref().ok_or(Error::NotConnected)?;
        let services = connection.services().ok_or(Error::NotDiscovered)?;
        if self.state != SessionState::Ready {
            return Err(Error::invalid_state(operation, self.state));
        }
        let characteristic = services
            .iter()
            .filter(|s| s.uuid == target.service)
            .find_map(|s| s.characteristic(&target.characteristic))
            .ok_or_else(|| {
                Error::characteristic_not_found(short_label(&target.characteristic), services.len())
            })?;
        Ok((connection.device.clone(), characteristic.clone()))
    }

    fn store_value(&mut self, target: &CharacteristicRef, value: &[u8]) {
        let Some(services) = self.connection.as_mut().and_then(|c| c.services.as_mut()) else {
            return;
        };
        let slot = services
            .iter_mut()
            .filter(|s| s.uuid == target.service)
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.uuid == target.characteristic);
        if let Some(characteristic) = slot {
            characteristic.value = Some(value.to_vec());
        }
    }

    fn operation_error(operation: &str, error: AdapterError) -> Error {
        match error {
            AdapterError::NotSupported => Error::not_supported(operation),
            other => {
                debug!("{} failed: {}", operation, other);
                Error::operation_failed(operation, other.code())
            }
        }
    }

    /// Read a characteristic. Failure leaves the session `Ready`.
    #[tracing::instrument(level = "info", skip(self), fields(tag = %self.tag, target = %target))]
    pub async fn read(&mut self, target: CharacteristicRef) -> Result<Vec<u8>> {
        self.check_link().await?;
        let (device, characteristic) = self.resolve("read", &target)?;
        if !characteristic.properties.is_readable() {
            let error = Error::not_supported("Read");
            self.log(format!("{error} on {target}"));
            return Err(error);
        }

        self.transition(SessionState::Reading);
        self.log(format!("Reading {target}"));
        let operation_timeout = self.config.operation_timeout;
        let result = timeout(
            operation_timeout,
            self.adapter.read_characteristic(&device, &target),
        )
        .await;
        let outcome = match result {
            Ok(Ok(value)) => {
                self.log(format!("Read success: Value = {}", format_value(&value)));
                self.store_value(&target, &value);
                Ok(value)
            }
            Ok(Err(e)) => Err(Self::operation_error("Read", e)),
            Err(_) => Err(Error::timeout("read", operation_timeout)),
        };
        if let Err(error) = &outcome {
            self.log(error.to_string());
        }
        self.transition(SessionState::Ready);
        outcome
    }

    /// Write a characteristic. Failure leaves the session `Ready`.
    #[tracing::instrument(level = "info", skip(self, value), fields(tag = %self.tag, target = %target, len = value.len()))]
    pub async fn write(
        &mut self,
        target: CharacteristicRef,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.check_link().await?;
        let (device, characteristic) = self.resolve("write", &target)?;
        if !characteristic.properties.is_writable() {
            let error = Error::not_supported("Write");
            self.log(format!("{error} on {target}"));
            return Err(error);
        }

        self.transition(SessionState::Writing);
        self.log(format!("Writing {} to {target}", format_value(value)));
        let operation_timeout = self.config.operation_timeout;
        let result = timeout(
            operation_timeout,
            self.adapter
                .write_characteristic(&device, &target, value, write_type),
        )
        .await;
        let outcome = match result {
            Ok(Ok(())) => {
                self.log("Write success");
                Ok(())
            }
            Ok(Err(e)) => Err(Self::operation_error("Write", e)),
            Err(_) => Err(Error::timeout("write", operation_timeout)),
        };
        if let Err(error) = &outcome {
            self.log(error.to_string());
        }
        self.transition(SessionState::Ready);
        outcome
    }

    /// Enable or disable notifications on a characteristic.
    ///
    /// Enabling a characteristic without the notify or indicate property
    /// fails with [`Error::NotSupported`] before the adapter is called.
    #[tracing::instrument(level = "info", skip(self), fields(tag = %self.tag, target = %target))]
    pub async fn set_notification(&mut self, target: CharacteristicRef, enable: bool) -> Result<()> {
        self.check_link().await?;
        let (device, characteristic) = self.resolve("set notification", &target)?;
        if enable && !characteristic.properties.is_notifiable() {
            let error = Error::not_supported("Notification");
            self.log(format!("{error} on {target}"));
            return Err(error);
        }

        self.transition(SessionState::SettingNotification);
        let action = if enable { "Enabling" } else { "Disabling" };
        self.log(format!("{action} notifications on {target}"));
        let operation_timeout = self.config.operation_timeout;
        let result = timeout(
            operation_timeout,
            self.adapter.set_notification(&device, &target, enable),
        )
        .await;
        let outcome = match result {
            Ok(Ok(())) => {
                let state = if enable { "enabled" } else { "disabled" };
                self.log(format!("Notifications {state} on {target}"));
                Ok(())
            }
            Ok(Err(e)) => Err(Self::operation_error("Notification", e)),
            Err(_) => Err(Error::timeout("set notification", operation_timeout)),
        };
        if let Err(error) = &outcome {
            self.log(error.to_string());
        }
        self.transition(SessionState::Ready);
        outcome
    }

    /// Stream of notifications from the connected device.
    ///
    /// Each notification is logged under the tag current at subscription.
    pub async fn notifications(&mut self) -> Result<EventStream<Notification>> {
        self.check_link().await?;
        let Some(device) = self.connection.as_ref().map(|c| c.device.clone()) else {
            return Err(Error::NotConnected);
        };
        let mut upstream = match self.adapter.notifications(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                let error = Self::operation_error("Notification", e);
                self.log(error.to_string());
                return Err(error);
            }
        };
        self.log("Subscribed to notifications");

        let (tx, rx) = mpsc::channel(64);
        let log = self.log.clone();
        let tag = self.tag.clone();
        tokio::spawn(async move {
            while let Some(notification) = upstream.recv().await {
                log.append(
                    &tag,
                    &format!(
                        "Notification from {}: {}",
                        notification.characteristic.characteristic,
                        format_value(&notification.value)
                    ),
                );
                if tx.send(notification).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    /// Pair with the connected device.
    ///
    /// Succeeds when the bond state reaches `Bonded`; a return to `None`, a
    /// closed stream or the bond timeout fail. The bond listener detaches on
    /// the first terminal state, and the connection stays open either way.
    #[tracing::instrument(level = "info", skip(self), fields(tag = %self.tag))]
    pub async fn bond(&mut self) -> Result<()> {
        self.check_link().await?;
        if !matches!(self.state, SessionState::Connected | SessionState::Ready) {
            return Err(Error::invalid_state("bond", self.state));
        }
        let Some(device) = self.connection.as_ref().map(|c| c.device.clone()) else {
            return Err(Error::NotConnected);
        };
        let resume = self.state;

        self.transition(SessionState::Bonding);
        self.log(format!("Starting bonding with {}", device.address));
        let events = match self.adapter.create_bond(&device).await {
            Ok(events) => events,
            Err(e) => {
                let error = match e {
                    AdapterError::NotSupported => Error::not_supported("Bonding"),
                    other => Error::bond_failed(device.address.clone(), other.to_string()),
                };
                self.log(error.to_string());
                self.transition(resume);
                return Err(error);
            }
        };

        let mut listener = BondListener::new(device.address.clone(), events);
        let bond_timeout = self.config.bond_timeout;
        let result = timeout(bond_timeout, async {
            loop {
                let state = listener.next().await;
                if let Some(state) = state {
                    self.events.send(SessionEvent::BondStateChanged {
                        address: device.address.clone(),
                        state,
                    });
                }
                match state {
                    Some(BondState::Bonding) => self.log("Bonding in progress..."),
                    Some(BondState::Bonded) => break Ok(()),
                    Some(BondState::None) => break Err("bond state returned to none"),
                    None => break Err("bond events ended"),
                }
            }
        })
        .await;
        listener.detach();

        let outcome = match result {
            Ok(Ok(())) => {
                self.log("Bonding successful");
                Ok(())
            }
            Ok(Err(reason)) => {
                self.log("Bonding failed");
                Err(Error::bond_failed(device.address.clone(), reason))
            }
            Err(_) => {
                self.log("Bonding timed out");
                Err(Error::bond_failed(
                    device.address.clone(),
                    format!("timed out after {bond_timeout:?}"),
                ))
            }
        };
        self.transition(resume);
        outcome
    }

    /// Close the connection and return to `Idle`. Safe to call in any state.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            let address = connection.device.address.clone();
            self.log(format!("Disconnecting from {address}"));
            if let Err(e) = self.adapter.disconnect(&connection.device).await {
                warn!("Failed to disconnect {}: {}", address, e);
            }
            self.log(format!("Disconnected from {address}"));
            self.transition(SessionState::Disconnected);
        }
        self.found = None;
        self.transition(SessionState::Idle);
        Ok(())
    }
}

impl<A: BleAdapter + ?Sized + 'static> Drop for SessionController<A> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let adapter = Arc::clone(&self.adapter);
            handle.spawn(async move {
                if let Err(e) = adapter.disconnect(&connection.device).await {
                    warn!("Failed to disconnect in controller drop: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAdapter, MockAdapterBuilder};
    use bluelink_types::uuids::{BODY_SENSOR_LOCATION, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
    use bluelink_types::{CharacteristicProperties, split_log_line};

    const WINDOW: Duration = Duration::from_millis(10_000);

    fn controller(adapter: MockAdapter) -> (Arc<MockAdapter>, SessionController<MockAdapter>) {
        let adapter = Arc::new(adapter);
        let mut session = SessionController::new(Arc::clone(&adapter), LogSink::in_memory());
        session.set_log_tag("unit");
        (adapter, session)
    }

    fn states(rx: &mut EventReceiver) -> Vec<SessionState> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::StateChanged { to, .. } = event {
                seen.push(to);
            }
        }
        seen
    }

    fn bsl() -> CharacteristicRef {
        CharacteristicRef::new(HEART_RATE_SERVICE, BODY_SENSOR_LOCATION)
    }

    async fn ready(session: &mut SessionController<MockAdapter>) {
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();
        session.discover().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_matches_case_insensitively() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let device = session.begin_scan(Some("dut-1"), WINDOW).await.unwrap();
        assert_eq!(device.name.as_deref(), Some("DUT-1"));
        assert_eq!(session.state(), SessionState::Found);
        assert_eq!(adapter.stop_scan_count(), 1);
        assert_eq!(session.devices().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_without_target_takes_first_device() {
        let (_, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let device = session.begin_scan(None, WINDOW).await.unwrap();
        assert_eq!(device.address, "5C:F3:70:11:22:33");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_fails_once() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let mut rx = session.subscribe();
        let err = session.begin_scan(Some("DUT-9"), WINDOW).await.unwrap_err();
        assert!(matches!(err, Error::ScanTimeout { duration } if duration == WINDOW));
        assert_eq!(adapter.stop_scan_count(), 1);

        let seen = states(&mut rx);
        let failures = seen
            .iter()
            .filter(|s| **s == SessionState::Failed(FailureKind::ScanTimeout))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_error_from_stack() {
        let (adapter, mut session) = controller(
            MockAdapterBuilder::new()
                .scan_failure_at(Duration::from_millis(50), 2)
                .build(),
        );
        let err = session.begin_scan(None, WINDOW).await.unwrap_err();
        assert!(matches!(err, Error::ScanError { code: 2 }));
        assert_eq!(adapter.stop_scan_count(), 1);
        let lines = session.log_sink().read("unit").unwrap();
        assert!(lines.iter().any(|l| l.ends_with("Scan failed with error code: 2")));
    }

    #[tokio::test]
    async fn test_readiness_checked_before_scan() {
        let (adapter, mut session) = controller(
            MockAdapterBuilder::new()
                .status(AdapterStatus::PermissionDenied)
                .build(),
        );
        let err = session.begin_scan(None, WINDOW).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied));
        assert_eq!(adapter.start_scan_count(), 0);

        adapter.set_status(AdapterStatus::RadioOff).await;
        let err = session.begin_scan(None, WINDOW).await.unwrap_err();
        assert!(matches!(err, Error::AdapterUnavailable));
        let lines = session.log_sink().read("unit").unwrap();
        assert!(lines[0].ends_with("Missing Bluetooth permissions."));
        assert!(lines[1].ends_with("Bluetooth not available or disabled."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_devices_collects_for_full_window() {
        let (adapter, mut session) = controller(
            MockAdapterBuilder::heart_rate_dut("DUT-1")
                .device_at(
                    Duration::from_secs(2),
                    DiscoveredDevice::new("00:11:22:33:44:55", Some("DUT-1"), -40),
                )
                .build(),
        );
        let mut rx = session.subscribe();
        let devices = session.scan_devices(Duration::from_secs(5)).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].rssi, -40);
        assert_eq!(adapter.stop_scan_count(), 1);
        assert_eq!(session.state(), SessionState::Idle);

        let mut list_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::DeviceListChanged { .. }) {
                list_events += 1;
            }
        }
        assert_eq!(list_events, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_settle_delay() {
        let (_, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        let started = tokio::time::Instant::now();
        session.connect(&device).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_returns_to_idle() {
        let (adapter, mut session) = controller(
            MockAdapterBuilder::heart_rate_dut("DUT-1")
                .connect_failure(133)
                .build(),
        );
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        let mut rx = session.subscribe();
        let err = session.connect(&device).await.unwrap_err();
        assert!(matches!(err, Error::ConnectError { .. }));
        assert!(states(&mut rx).contains(&SessionState::Failed(FailureKind::ConnectError)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.connection().is_none());
        assert_eq!(adapter.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_lost_during_settle() {
        let (_, mut session) = controller(
            MockAdapterBuilder::heart_rate_dut("DUT-1")
                .link_events(vec![
                    (Duration::ZERO, LinkEvent::Connected),
                    (Duration::from_millis(500), LinkEvent::Disconnected),
                ])
                .build(),
        );
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        let err = session.connect(&device).await.unwrap_err();
        assert!(err.to_string().contains("settling"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_rejected_while_connected() {
        let (_, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();
        let err = session.connect(&device).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_before_discovery_is_precondition_error() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();

        let err = session.read(bsl()).await.unwrap_err();
        assert!(matches!(err, Error::NotDiscovered));
        assert_eq!(adapter.read_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_updates_last_value() {
        let (_, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        ready(&mut session).await;
        assert_eq!(session.read(bsl()).await.unwrap(), vec![42]);
        assert_eq!(session.state(), SessionState::Ready);

        let stored = session
            .services()
            .unwrap()
            .iter()
            .find_map(|s| s.characteristic(&BODY_SENSOR_LOCATION))
            .and_then(|c| c.value.clone());
        assert_eq!(stored, Some(vec![42]));

        let lines = session.log_sink().read("unit").unwrap();
        let (_, last) = split_log_line(lines.last().unwrap()).unwrap();
        assert_eq!(last, "Read success: Value = 42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_keeps_connection_ready() {
        let (adapter, mut session) = controller(
            MockAdapterBuilder::heart_rate_dut("DUT-1")
                .read_error(AdapterError::Status(137))
                .build(),
        );
        ready(&mut session).await;
        let err = session.read(bsl()).await.unwrap_err();
        assert!(matches!(err, Error::OperationError { code: 137, .. }));
        assert_eq!(session.state(), SessionState::Ready);

        adapter.set_read_error(None).await;
        assert_eq!(session.read(bsl()).await.unwrap(), vec![42]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let (_, mut session) = controller(
            MockAdapterBuilder::heart_rate_dut("DUT-1")
                .latency(Duration::from_secs(60))
                .build(),
        );
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();
        session.adapter().set_latency(Duration::ZERO).await;
        session.discover().await.unwrap();
        session.adapter().set_latency(Duration::from_secs(60)).await;

        let err = session.read(bsl()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_characteristic() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        ready(&mut session).await;
        let missing = CharacteristicRef::new(HEART_RATE_SERVICE, bluelink_types::uuids::from_short(0xFFF1));
        let err = session.read(missing).await.unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
        assert_eq!(adapter.read_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_records_payload() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        ready(&mut session).await;
        let control = CharacteristicRef::new(
            HEART_RATE_SERVICE,
            bluelink_types::uuids::HEART_RATE_CONTROL_POINT,
        );
        session
            .write(control, &[1], WriteType::WithResponse)
            .await
            .unwrap();
        assert_eq!(adapter.writes().await[0].value, vec![1]);

        let err = session
            .write(bsl(), &[1], WriteType::WithResponse)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_not_supported_is_explicit() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        ready(&mut session).await;
        let err = session.set_notification(bsl(), true).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported { .. }));
        assert_eq!(adapter.set_notification_count(), 0);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_are_logged_and_forwarded() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        ready(&mut session).await;
        let hrm = CharacteristicRef::new(HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT);
        session.set_notification(hrm, true).await.unwrap();
        let mut stream = session.notifications().await.unwrap();

        assert!(adapter.push_notification(hrm, vec![0, 72]).await);
        let notification = stream.recv().await.unwrap();
        assert_eq!(notification.value, vec![0, 72]);

        let lines = session.log_sink().read("unit").unwrap();
        assert!(lines.iter().any(|l| l.ends_with(" - Subscribed to notifications")));
        assert!(
            lines
                .iter()
                .any(|l| l.ends_with(&format!("Notification from {HEART_RATE_MEASUREMENT}: 0 72")))
        );
        assert_eq!(
            adapter.cccd_writes().await,
            vec![(hrm, bluelink_types::uuids::ENABLE_NOTIFICATION_VALUE)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_disconnect_returns_to_idle() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        ready(&mut session).await;
        assert!(adapter.simulate_disconnect().await);

        let err = session.read(bsl()).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.connection().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bond_success() {
        let (_, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();
        session.bond().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        let lines = session.log_sink().read("unit").unwrap();
        assert!(lines.iter().any(|l| l.ends_with("Bonding in progress...")));
        assert!(lines.last().unwrap().ends_with("Bonding successful"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bond_rejected_returns_error() {
        let (_, mut session) = controller(
            MockAdapterBuilder::heart_rate_dut("DUT-1")
                .bond_events(vec![
                    (Duration::from_millis(100), BondState::Bonding),
                    (Duration::from_millis(200), BondState::None),
                ])
                .build(),
        );
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();
        let err = session.bond().await.unwrap_err();
        assert!(matches!(err, Error::BondError { .. }));
        assert!(session.connection().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bond_not_supported() {
        let (_, mut session) = controller(
            MockAdapterBuilder::new()
                .device(DiscoveredDevice::new("AA", Some("DUT-1"), -50))
                .build(),
        );
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();
        let err = session.bond().await.unwrap_err();
        assert!(matches!(err, Error::NotSupported { .. }));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bond_timeout() {
        let (_, mut session) = controller(
            MockAdapterBuilder::heart_rate_dut("DUT-1")
                .bond_events(vec![
                    (Duration::from_millis(100), BondState::Bonding),
                    (Duration::from_secs(60), BondState::Bonded),
                ])
                .build(),
        );
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();
        let err = session.bond().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let (adapter, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        session.disconnect().await.unwrap();
        assert_eq!(adapter.disconnect_count(), 0);

        ready(&mut session).await;
        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(adapter.disconnect_count(), 1);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_releases_link() {
        let (adapter, mut session) = controller(
            MockAdapterBuilder::heart_rate_dut("DUT-1")
                .discovery_error(AdapterError::Status(129))
                .build(),
        );
        let device = session.begin_scan(Some("DUT-1"), WINDOW).await.unwrap();
        session.connect(&device).await.unwrap();
        let err = session.discover().await.unwrap_err();
        assert!(matches!(err, Error::DiscoveryError { code: 129 }));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(adapter.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gatt_items_after_discovery() {
        let (_, mut session) = controller(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
        assert!(session.gatt_items().is_empty());
        ready(&mut session).await;
        let items = session.gatt_items();
        assert!(items.iter().any(|i| matches!(
            i,
            GattItem::Characteristic { properties, .. } if *properties == CharacteristicProperties::READ
        )));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Ready.to_string(), "Ready");
        assert_eq!(
            SessionState::Failed(FailureKind::ScanError(2)).to_string(),
            "Failed(ScanError(2))"
        );
    }
}
