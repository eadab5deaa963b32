//! Core data model: discovered devices, the GATT tree, test cases and outcomes.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParseError, ParseResult};
use crate::uuid::{name_for, short_label};

/// A BLE peripheral seen during a scan.
///
/// Identity is the `address`; name and RSSI are refreshed by later
/// advertisements for the same address.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiscoveredDevice {
    /// Bluetooth address (or platform identifier where addresses are hidden).
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Opaque handle the adapter uses to find the platform peripheral again.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub platform_id: Option<String>,
}

impl DiscoveredDevice {
    /// Create a device record from a scan result.
    pub fn new(address: impl Into<String>, name: Option<&str>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
            rssi,
            platform_id: None,
        }
    }

    /// Attach the adapter's platform handle.
    #[must_use]
    pub fn with_platform_id(mut self, id: impl Into<String>) -> Self {
        self.platform_id = Some(id.into());
        self
    }

    /// Name for display, falling back to `"Unknown Device"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }

    /// Case-insensitive comparison of the advertised name against `target`.
    ///
    /// A device without a name never matches.
    pub fn matches_name(&self, target: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| {
                name.chars()
                    .flat_map(char::to_lowercase)
                    .eq(target.trim().chars().flat_map(char::to_lowercase))
            })
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} dBm",
            self.display_name(),
            self.address,
            self.rssi
        )
    }
}

/// Devices discovered in one scan session, at most one entry per address.
///
/// Entries keep first-seen order; later sightings of the same address
/// overwrite name and RSSI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    devices: Vec<DiscoveredDevice>,
}

impl DeviceList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a device. Returns `true` if the list changed.
    pub fn upsert(&mut self, device: DiscoveredDevice) -> bool {
        match self
            .devices
            .iter_mut()
            .find(|d| d.address == device.address)
        {
            Some(existing) => {
                // A later advertisement without a name keeps the known one.
                let name = device.name.or_else(|| existing.name.clone());
                let updated = DiscoveredDevice {
                    name,
                    platform_id: device
                        .platform_id
                        .or_else(|| existing.platform_id.clone()),
                    ..device
                };
                let changed = *existing != updated;
                *existing = updated;
                changed
            }
            None => {
                self.devices.push(device);
                true
            }
        }
    }

    /// Look up a device by address.
    pub fn get(&self, address: &str) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|d| d.address == address)
    }

    /// Discard all entries (a new scan session starts).
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Number of distinct devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device has been seen.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterate in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.iter()
    }

    /// Snapshot of the entries.
    pub fn to_vec(&self) -> Vec<DiscoveredDevice> {
        self.devices.clone()
    }
}

/// GATT characteristic property bitmask (Core Spec Vol 3, Part G, 3.3.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    /// Wrap a raw bitmask.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_readable(self) -> bool {
        self.contains(Self::READ)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITE) || self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }

    pub const fn is_notifiable(self) -> bool {
        self.contains(Self::NOTIFY) || self.contains(Self::INDICATE)
    }
}

impl core::ops::BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(CharacteristicProperties, &str); 6] = [
            (CharacteristicProperties::BROADCAST, "BROADCAST"),
            (CharacteristicProperties::READ, "READ"),
            (CharacteristicProperties::WRITE_WITHOUT_RESPONSE, "WRITE_NO_RESP"),
            (CharacteristicProperties::WRITE, "WRITE"),
            (CharacteristicProperties::NOTIFY, "NOTIFY"),
            (CharacteristicProperties::INDICATE, "INDICATE"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Whether a service is primary or included by another service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ServiceKind {
    #[default]
    Primary,
    Secondary,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Primary => write!(f, "Primary"),
            ServiceKind::Secondary => write!(f, "Secondary"),
        }
    }
}

/// A characteristic as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    /// Last value read from the characteristic, if any.
    pub value: Option<Vec<u8>>,
}

impl CharacteristicDescriptor {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            value: None,
        }
    }
}

/// A service and its characteristics, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub kind: ServiceKind,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    /// Create a primary service with no characteristics.
    pub fn primary(uuid: Uuid) -> Self {
        Self {
            uuid,
            kind: ServiceKind::Primary,
            characteristics: Vec::new(),
        }
    }

    /// Add a characteristic (builder style).
    #[must_use]
    pub fn with_characteristic(mut self, characteristic: CharacteristicDescriptor) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// Find a characteristic of this service by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

/// Address of one characteristic within the discovered tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            short_label(&self.service),
            short_label(&self.characteristic)
        )
    }
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WriteType {
    #[default]
    WithResponse,
    WithoutResponse,
}

/// Bond state of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// One row of the interleaved service/characteristic list shown after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattItem {
    Service {
        uuid: Uuid,
        kind: ServiceKind,
    },
    Characteristic {
        service: Uuid,
        uuid: Uuid,
        properties: CharacteristicProperties,
    },
}

impl GattItem {
    pub fn uuid(&self) -> &Uuid {
        match self {
            GattItem::Service { uuid, .. } | GattItem::Characteristic { uuid, .. } => uuid,
        }
    }

    /// Four-hex-digit label (`180D`).
    pub fn short_uuid(&self) -> String {
        short_label(self.uuid())
    }

    /// Friendly SIG name, or `"Unknown"`.
    pub fn name(&self) -> &'static str {
        name_for(self.uuid()).unwrap_or("Unknown")
    }

    /// The reference for characteristic rows.
    pub fn characteristic_ref(&self) -> Option<CharacteristicRef> {
        match self {
            GattItem::Characteristic { service, uuid, .. } => {
                Some(CharacteristicRef::new(*service, *uuid))
            }
            GattItem::Service { .. } => None,
        }
    }
}

impl fmt::Display for GattItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattItem::Service { kind, .. } => {
                write!(f, "{} [{}] ({})", self.name(), self.short_uuid(), kind)
            }
            GattItem::Characteristic { properties, .. } => {
                write!(f, "  {} [{}] {}", self.name(), self.short_uuid(), properties)
            }
        }
    }
}

/// Flatten a discovery tree into service rows each followed by their characteristics.
pub fn gatt_items(services: &[ServiceDescriptor]) -> Vec<GattItem> {
    let mut items = Vec::new();
    for service in services {
        items.push(GattItem::Service {
            uuid: service.uuid,
            kind: service.kind,
        });
        items.extend(
            service
                .characteristics
                .iter()
                .map(|c| GattItem::Characteristic {
                    service: service.uuid,
                    uuid: c.uuid,
                    properties: c.properties,
                }),
        );
    }
    items
}

/// A selectable entry of the conformance catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TestCase {
    /// Short unique code, e.g. `TC01`.
    pub id: String,
    pub title: String,
    pub description: String,
    pub selected: bool,
}

impl TestCase {
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            selected: false,
        }
    }
}

/// Result of executing one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "status", rename_all = "snake_case"))]
pub enum TestOutcome {
    Passed { message: String },
    Failed { message: String },
    NotImplemented,
}

impl TestOutcome {
    pub fn passed(message: impl Into<String>) -> Self {
        Self::Passed {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Passed { message } | Self::Failed { message } => message,
            Self::NotImplemented => "not implemented",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed { message } => write!(f, "PASS: {message}"),
            Self::Failed { message } => write!(f, "FAIL: {message}"),
            Self::NotImplemented => write!(f, "NOT IMPLEMENTED"),
        }
    }
}

/// Outcome of one case within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CaseResult {
    pub id: String,
    pub title: String,
    pub outcome: TestOutcome,
}

/// Results of one invocation of the runner against a DUT.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TestRun {
    pub dut_name: String,
    pub results: Vec<CaseResult>,
}

impl TestRun {
    pub fn new(dut_name: impl Into<String>) -> Self {
        Self {
            dut_name: dut_name.into(),
            results: Vec::new(),
        }
    }

    /// Outcome recorded for a case id.
    pub fn outcome(&self, id: &str) -> Option<&TestOutcome> {
        self.results
            .iter()
            .find(|r| r.id == id)
            .map(|r| &r.outcome)
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_pass()).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, TestOutcome::Failed { .. }))
            .count()
    }
}

/// A formatted log line as delivered to live observers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogLine {
    /// Test-case tag the line was written under.
    pub tag: String,
    /// `YYYY-MM-DD HH:MM:SS - message`, without trailing newline.
    pub line: String,
}

impl LogLine {
    /// Split the line into its timestamp and message parts.
    pub fn split(&self) -> Option<(&str, &str)> {
        split_log_line(&self.line)
    }
}

/// Split `YYYY-MM-DD HH:MM:SS - message` into `(timestamp, message)`.
///
/// Returns `None` when the timestamp prefix is malformed.
pub fn split_log_line(line: &str) -> Option<(&str, &str)> {
    let (timestamp, message) = line.split_once(" - ")?;
    let bytes = timestamp.as_bytes();
    let well_formed = bytes.len() == 19
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            10 => *b == b' ',
            13 | 16 => *b == b':',
            _ => b.is_ascii_digit(),
        });
    well_formed.then_some((timestamp, message))
}

/// Render bytes as space-separated unsigned decimals (`"42 7"`).
pub fn format_value(value: &[u8]) -> String {
    value
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a write payload: `hex:0a0b` for raw bytes, anything else as UTF-8 text.
pub fn parse_value(input: &str) -> ParseResult<Vec<u8>> {
    if input.is_empty() {
        return Err(ParseError::EmptyValue);
    }
    let Some(hex) = input.strip_prefix("hex:") else {
        return Ok(input.as_bytes().to_vec());
    };
    let digits: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(ParseError::InvalidHex(hex.to_string()));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| ParseError::InvalidHex(hex.to_string()))
        })
        .collect()
}
