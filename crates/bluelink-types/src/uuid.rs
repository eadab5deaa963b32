//! Bluetooth SIG UUIDs and helpers for the short (16-bit) form.
//!
//! Every 16-bit SIG-assigned UUID expands to a 128-bit UUID on top of the
//! Bluetooth Base UUID `00000000-0000-1000-8000-00805f9b34fb`.

use uuid::{Uuid, uuid};

use crate::error::{ParseError, ParseResult};

/// The Bluetooth Base UUID.
pub const BASE_UUID: Uuid = Uuid::from_u128(BASE_UUID_BITS);

const BASE_UUID_BITS: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Client Characteristic Configuration Descriptor (CCCD).
///
/// Written with `ENABLE_NOTIFICATION_VALUE` / `DISABLE_NOTIFICATION_VALUE`
/// to switch notifications on a characteristic.
pub const CCCD: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// CCCD value that enables notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value that disables notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = from_short(0x1800);

/// Generic Attribute Profile (GATT) service.
pub const GATT_SERVICE: Uuid = from_short(0x1801);

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = from_short(0x180A);

/// Heart Rate service.
pub const HEART_RATE_SERVICE: Uuid = from_short(0x180D);

/// Battery service.
pub const BATTERY_SERVICE: Uuid = from_short(0x180F);

// --- Standard BLE Characteristic UUIDs ---

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = from_short(0x2A00);

/// Appearance characteristic.
pub const APPEARANCE: Uuid = from_short(0x2A01);

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = from_short(0x2A19);

/// Heart rate measurement characteristic.
pub const HEART_RATE_MEASUREMENT: Uuid = from_short(0x2A37);

/// Body sensor location characteristic.
pub const BODY_SENSOR_LOCATION: Uuid = from_short(0x2A38);

/// Heart rate control point characteristic.
pub const HEART_RATE_CONTROL_POINT: Uuid = from_short(0x2A39);

/// Manufacturer name string characteristic.
pub const MANUFACTURER_NAME: Uuid = from_short(0x2A29);

/// Model number string characteristic.
pub const MODEL_NUMBER: Uuid = from_short(0x2A24);

/// Serial number string characteristic.
pub const SERIAL_NUMBER: Uuid = from_short(0x2A25);

/// Firmware revision string characteristic.
pub const FIRMWARE_REVISION: Uuid = from_short(0x2A26);

/// Expand a 16-bit SIG UUID onto the Bluetooth Base UUID.
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID_BITS | ((short as u128) << 96))
}

/// Return the 16-bit short form of a SIG UUID, if it is built on the Base UUID.
pub fn to_short(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let mask: u128 = !(0xFFFF_FFFFu128 << 96);
    if value & mask == BASE_UUID_BITS && value >> 112 == 0 {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

/// Short display label for a UUID: `180D` for SIG UUIDs, characters 4..8 of
/// the hyphenated form otherwise.
pub fn short_label(uuid: &Uuid) -> String {
    match to_short(uuid) {
        Some(short) => format!("{short:04X}"),
        None => uuid.to_string()[4..8].to_uppercase(),
    }
}

/// Friendly name for well-known SIG UUIDs.
pub fn name_for(uuid: &Uuid) -> Option<&'static str> {
    let name = match to_short(uuid)? {
        0x1800 => "Generic Access",
        0x1801 => "Generic Attribute",
        0x180A => "Device Information",
        0x180D => "Heart Rate",
        0x180F => "Battery Service",
        0x1809 => "Health Thermometer",
        0x1810 => "Blood Pressure",
        0x1816 => "Cycling Speed and Cadence",
        0x2A00 => "Device Name",
        0x2A01 => "Appearance",
        0x2A04 => "Peripheral Preferred Connection Parameters",
        0x2A05 => "Service Changed",
        0x2A19 => "Battery Level",
        0x2A24 => "Model Number String",
        0x2A25 => "Serial Number String",
        0x2A26 => "Firmware Revision String",
        0x2A27 => "Hardware Revision String",
        0x2A28 => "Software Revision String",
        0x2A29 => "Manufacturer Name String",
        0x2A37 => "Heart Rate Measurement",
        0x2A38 => "Body Sensor Location",
        0x2A39 => "Heart Rate Control Point",
        0x2902 => "Client Characteristic Configuration",
        _ => return None,
    };
    Some(name)
}

/// Parse a UUID given either as 4 hex digits (`180D`, `0x180d`) or in full.
pub fn parse_uuid(input: &str) -> ParseResult<Uuid> {
    let trimmed = input.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if short.len() == 4 {
        return u16::from_str_radix(short, 16)
            .map(from_short)
            .map_err(|_| ParseError::InvalidUuid(input.to_string()));
    }

    Uuid::parse_str(trimmed).map_err(|_| ParseError::InvalidUuid(input.to_string()))
}
