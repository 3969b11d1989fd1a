//! Stateless conversion between raw attribute payloads and typed values.
//!
//! Decoding is lenient: integer formats read the first N bytes little-endian
//! and a payload shorter than N bytes decodes to zero. Use
//! [`is_well_formed`] to detect (and count) such payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::descriptor::{AttributeDescriptor, RawFormat};
use crate::error::{CodecError, CodecResult};
use crate::types::AttributeValue;

fn scale_factor(decimal_scale: i8) -> f64 {
    10f64.powi(i32::from(decimal_scale))
}

/// Decode a payload.
///
/// Without a descriptor, or for [`RawFormat::RawBytes`], the payload is
/// returned unchanged. A non-zero `decimal_scale` multiplies the raw integer
/// by `10^scale` and yields [`AttributeValue::Float`]; otherwise the result
/// is an [`AttributeValue::Integer`].
///
/// # Examples
///
/// ```
/// use sensorlink_types::{codec, AttributeValue, DescriptorRegistry, uuids};
///
/// let registry = DescriptorRegistry::standard();
/// let battery = registry.get(&uuids::BATTERY_LEVEL);
/// assert_eq!(codec::decode(battery, &[0x32]), AttributeValue::Integer(50));
/// ```
#[must_use]
pub fn decode(descriptor: Option<&AttributeDescriptor>, raw: &[u8]) -> AttributeValue {
    let Some(descriptor) = descriptor else {
        return AttributeValue::Raw(Bytes::copy_from_slice(raw));
    };

    let mut buf = raw;
    let value: i64 = match descriptor.raw_format {
        RawFormat::RawBytes => return AttributeValue::Raw(Bytes::copy_from_slice(raw)),
        _ if !is_well_formed(Some(descriptor), raw) => 0,
        RawFormat::Uint8 => i64::from(buf.get_u8()),
        RawFormat::Uint16 => i64::from(buf.get_u16_le()),
        RawFormat::Int16 => i64::from(buf.get_i16_le()),
    };

    if descriptor.decimal_scale == 0 {
        AttributeValue::Integer(value)
    } else {
        AttributeValue::Float(value as f64 * scale_factor(descriptor.decimal_scale))
    }
}

/// Whether `raw` carries enough bytes for the descriptor's format.
///
/// Payloads for unknown attributes and raw formats are always well formed.
#[must_use]
pub fn is_well_formed(descriptor: Option<&AttributeDescriptor>, raw: &[u8]) -> bool {
    descriptor
        .and_then(|d| d.raw_format.width())
        .is_none_or(|width| raw.len() >= width)
}

/// Encode a value into the descriptor's raw format.
///
/// Scaled values are rounded to the nearest raw integer. Values that do not
/// fit the format are rejected.
pub fn encode(descriptor: &AttributeDescriptor, value: &AttributeValue) -> CodecResult<Bytes> {
    let format = descriptor.raw_format;
    let Some((min, max)) = format.range() else {
        return match value {
            AttributeValue::Raw(bytes) => Ok(bytes.clone()),
            other => Err(CodecError::KindMismatch {
                value_kind: other.kind(),
                format: format.name(),
            }),
        };
    };

    let out_of_range = || CodecError::ValueOutOfRange {
        value: value.to_string(),
        format: format.name(),
        scale: descriptor.decimal_scale,
    };

    let raw: i64 = match value {
        AttributeValue::Integer(v) if descriptor.decimal_scale == 0 => *v,
        AttributeValue::Integer(v) => unscale(*v as f64, descriptor.decimal_scale).ok_or_else(out_of_range)?,
        AttributeValue::Float(v) => unscale(*v, descriptor.decimal_scale).ok_or_else(out_of_range)?,
        AttributeValue::Raw(_) => {
            return Err(CodecError::KindMismatch {
                value_kind: value.kind(),
                format: format.name(),
            });
        }
    };

    if raw < min || raw > max {
        return Err(out_of_range());
    }

    let mut buf = BytesMut::with_capacity(2);
    match format {
        RawFormat::Uint8 => buf.put_u8(raw as u8),
        RawFormat::Uint16 => buf.put_u16_le(raw as u16),
        RawFormat::Int16 => buf.put_i16_le(raw as i16),
        RawFormat::RawBytes => unreachable!("raw formats return above"),
    }
    Ok(buf.freeze())
}

fn unscale(value: f64, decimal_scale: i8) -> Option<i64> {
    let raw = (value / scale_factor(decimal_scale)).round();
    (raw.is_finite() && raw >= i64::MIN as f64 && raw <= i64::MAX as f64).then_some(raw as i64)
}
