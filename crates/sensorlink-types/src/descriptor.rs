//! Attribute descriptors and the registry that maps attribute ids to them.

use std::collections::HashMap;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CodecError, CodecResult};
use crate::uuid as ids;

/// How the raw bytes of an attribute are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RawFormat {
    Uint8,
    /// Little-endian unsigned 16-bit.
    Uint16,
    /// Little-endian signed 16-bit.
    Int16,
    /// No interpretation; payload is passed through.
    RawBytes,
}

impl RawFormat {
    /// Number of payload bytes the format consumes, `None` for raw bytes.
    #[must_use]
    pub fn width(self) -> Option<usize> {
        match self {
            RawFormat::Uint8 => Some(1),
            RawFormat::Uint16 | RawFormat::Int16 => Some(2),
            RawFormat::RawBytes => None,
        }
    }

    /// Inclusive integer range representable by the format.
    #[must_use]
    pub fn range(self) -> Option<(i64, i64)> {
        match self {
            RawFormat::Uint8 => Some((0, u8::MAX as i64)),
            RawFormat::Uint16 => Some((0, u16::MAX as i64)),
            RawFormat::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            RawFormat::RawBytes => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RawFormat::Uint8 => "uint8",
            RawFormat::Uint16 => "uint16",
            RawFormat::Int16 => "int16",
            RawFormat::RawBytes => "raw",
        }
    }
}

/// Decode format for one attribute id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AttributeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub raw_format: RawFormat,
    /// Power-of-ten exponent applied to the raw integer. Zero keeps the
    /// value an integer.
    pub decimal_scale: i8,
}

impl AttributeDescriptor {
    pub fn new(id: Uuid, name: impl Into<String>, raw_format: RawFormat) -> Self {
        Self {
            id,
            name: name.into(),
            raw_format,
            decimal_scale: 0,
        }
    }

    #[must_use]
    pub fn with_scale(mut self, decimal_scale: i8) -> Self {
        self.decimal_scale = decimal_scale;
        self
    }
}

/// Immutable table of known attributes.
///
/// Built once at startup and shared by every link that decodes values.
/// Unknown ids are not an error: callers fall back to raw passthrough.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    by_id: HashMap<Uuid, AttributeDescriptor>,
}

impl DescriptorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table of standard GATT characteristics.
    ///
    /// | name | id | format | scale |
    /// |------|----|--------|-------|
    /// | `battery-level` | 0x2A19 | uint8 | 0 |
    /// | `body-sensor-location` | 0x2A38 | uint8 | 0 |
    /// | `temperature` | 0x2A6E | int16 | -2 |
    /// | `humidity` | 0x2A6F | uint16 | -2 |
    /// | `irradiance` | 0x2A77 | uint16 | -1 |
    pub fn standard() -> Self {
        Self::new()
            .with(AttributeDescriptor::new(
                ids::BATTERY_LEVEL,
                "battery-level",
                RawFormat::Uint8,
            ))
            .with(AttributeDescriptor::new(
                ids::BODY_SENSOR_LOCATION,
                "body-sensor-location",
                RawFormat::Uint8,
            ))
            .with(AttributeDescriptor::new(ids::TEMPERATURE, "temperature", RawFormat::Int16).with_scale(-2))
            .with(AttributeDescriptor::new(ids::HUMIDITY, "humidity", RawFormat::Uint16).with_scale(-2))
            .with(AttributeDescriptor::new(ids::IRRADIANCE, "irradiance", RawFormat::Uint16).with_scale(-1))
    }

    /// Add or replace a descriptor.
    #[must_use]
    pub fn with(mut self, descriptor: AttributeDescriptor) -> Self {
        self.by_id.insert(descriptor.id, descriptor);
        self
    }

    pub fn get(&self, id: &Uuid) -> Option<&AttributeDescriptor> {
        self.by_id.get(id)
    }

    /// Look up a descriptor by its registered name (case-insensitive).
    pub fn by_name(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.by_id
            .values()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Resolve a user-supplied attribute reference: a registered name, a
    /// full UUID, or a 16-bit hex number such as `2a19` / `0x2A19`.
    pub fn resolve(&self, reference: &str) -> CodecResult<Uuid> {
        if let Some(d) = self.by_name(reference) {
            return Ok(d.id);
        }
        if let Ok(id) = Uuid::from_str(reference) {
            return Ok(id);
        }
        let hex = reference
            .strip_prefix("0x")
            .or_else(|| reference.strip_prefix("0X"))
            .unwrap_or(reference);
        if hex.len() == 4
            && let Ok(short) = u16::from_str_radix(hex, 16)
        {
            return Ok(ids::from_short(short));
        }
        Err(CodecError::UnknownAttribute(reference.to_string()))
    }

    /// Descriptors sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        let mut all: Vec<_> = self.by_id.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all.into_iter()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_contents() {
        let reg = DescriptorRegistry::standard();
        assert_eq!(reg.len(), 5);

        let battery = reg.get(&ids::BATTERY_LEVEL).unwrap();
        assert_eq!(battery.name, "battery-level");
        assert_eq!(battery.raw_format, RawFormat::Uint8);
        assert_eq!(battery.decimal_scale, 0);

        let temp = reg.by_name("Temperature").unwrap();
        assert_eq!(temp.raw_format, RawFormat::Int16);
        assert_eq!(temp.decimal_scale, -2);
    }

    #[test]
    fn test_resolve_name_uuid_and_short() {
        let reg = DescriptorRegistry::standard();
        assert_eq!(reg.resolve("humidity").unwrap(), ids::HUMIDITY);
        assert_eq!(
            reg.resolve("00002a19-0000-1000-8000-00805f9b34fb").unwrap(),
            ids::BATTERY_LEVEL
        );
        assert_eq!(reg.resolve("0x2A77").unwrap(), ids::IRRADIANCE);
        assert_eq!(reg.resolve("2a38").unwrap(), ids::BODY_SENSOR_LOCATION);
    }

    #[test]
    fn test_resolve_unknown() {
        let reg = DescriptorRegistry::standard();
        let err = reg.resolve("heart-rate-ish").unwrap_err();
        assert_eq!(err, CodecError::UnknownAttribute("heart-rate-ish".into()));
    }

    #[test]
    fn test_with_replaces_existing() {
        let reg = DescriptorRegistry::standard().with(
            AttributeDescriptor::new(ids::BATTERY_LEVEL, "battery", RawFormat::Uint16),
        );
        assert_eq!(reg.len(), 5);
        assert_eq!(reg.get(&ids::BATTERY_LEVEL).unwrap().raw_format, RawFormat::Uint16);
    }

    #[test]
    fn test_iter_sorted_by_name() {
        let names: Vec<_> = DescriptorRegistry::standard()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_format_widths() {
        assert_eq!(RawFormat::Uint8.width(), Some(1));
        assert_eq!(RawFormat::Int16.width(), Some(2));
        assert_eq!(RawFormat::RawBytes.width(), None);
        assert_eq!(RawFormat::Int16.range(), Some((-32768, 32767)));
    }
}
