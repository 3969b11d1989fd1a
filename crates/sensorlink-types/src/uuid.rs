//! Bluetooth UUIDs used by the standard attribute registry.
//!
//! Standard GATT characteristics are assigned 16-bit identifiers that expand
//! into the Bluetooth base UUID `0000xxxx-0000-1000-8000-00805f9b34fb`.

use uuid::{Uuid, uuid};

/// The Bluetooth base UUID with a zero 16-bit slot.
pub const BLUETOOTH_BASE: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

/// Expand a 16-bit assigned number into a full 128-bit UUID.
///
/// # Examples
///
/// ```
/// use sensorlink_types::uuids::{from_short, BATTERY_LEVEL};
///
/// assert_eq!(from_short(0x2A19), BATTERY_LEVEL);
/// ```
#[must_use]
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE.as_u128() | ((short as u128) << 96))
}

/// Return the 16-bit assigned number if `uuid` lies in the Bluetooth base range.
#[must_use]
pub fn to_short(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short = (value >> 96) as u16;
    (value & !(0xFFFF_u128 << 96) == BLUETOOTH_BASE.as_u128()).then_some(short)
}

// --- Standard BLE Service UUIDs ---

/// Battery service.
pub const BATTERY_SERVICE: Uuid = from_short(0x180F);

/// Environmental Sensing service.
pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid = from_short(0x181A);

/// Heart Rate service.
pub const HEART_RATE_SERVICE: Uuid = from_short(0x180D);

// --- Standard BLE Characteristic UUIDs ---

/// Battery level, percent.
pub const BATTERY_LEVEL: Uuid = from_short(0x2A19);

/// Body sensor location (enumerated byte).
pub const BODY_SENSOR_LOCATION: Uuid = from_short(0x2A38);

/// Temperature, hundredths of a degree Celsius.
pub const TEMPERATURE: Uuid = from_short(0x2A6E);

/// Relative humidity, hundredths of a percent.
pub const HUMIDITY: Uuid = from_short(0x2A6F);

/// Irradiance, tenths of W/m².
pub const IRRADIANCE: Uuid = from_short(0x2A77);

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = from_short(0x2902);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_short_matches_literal() {
        assert_eq!(
            BATTERY_LEVEL,
            uuid!("00002a19-0000-1000-8000-00805f9b34fb")
        );
        assert_eq!(TEMPERATURE, uuid!("00002a6e-0000-1000-8000-00805f9b34fb"));
    }

    #[test]
    fn test_to_short_round_trips_standard_ids() {
        assert_eq!(to_short(&HUMIDITY), Some(0x2A6F));
        assert_eq!(to_short(&BATTERY_SERVICE), Some(0x180F));
    }

    #[test]
    fn test_to_short_rejects_vendor_uuid() {
        let vendor = uuid!("f0cd1503-95da-4f4b-9ac8-aa55d312af0c");
        assert_eq!(to_short(&vendor), None);
    }

    #[test]
    fn test_standard_characteristics_are_distinct() {
        let ids = [
            BATTERY_LEVEL,
            BODY_SENSOR_LOCATION,
            TEMPERATURE,
            HUMIDITY,
            IRRADIANCE,
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_standard_characteristic_prefix() {
        for uuid in [BATTERY_LEVEL, TEMPERATURE, HUMIDITY, IRRADIANCE] {
            assert!(
                uuid.to_string().starts_with("00002a"),
                "UUID {} should start with 00002a",
                uuid
            );
        }
    }
}
