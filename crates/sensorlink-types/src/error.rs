//! Error types for the attribute value codec.

use thiserror::Error;

/// Errors that can occur when encoding attribute values.
///
/// Decoding is lenient and never fails; only encoding into a fixed raw
/// format can be rejected.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The value does not fit the descriptor's raw format after scaling.
    #[error("value {value} is out of range for {format} (scale {scale})")]
    ValueOutOfRange {
        /// The value that was rejected, as text.
        value: String,
        /// The raw format name.
        format: &'static str,
        /// Decimal scale applied during encoding.
        scale: i8,
    },

    /// The value variant cannot be stored in the descriptor's raw format.
    #[error("cannot encode {value_kind} value as {format}")]
    KindMismatch {
        /// Kind of the value that was supplied.
        value_kind: &'static str,
        /// The raw format name.
        format: &'static str,
    },

    /// No descriptor is registered under the given name.
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),
}

/// Result type alias using sensorlink-types' CodecError type.
pub type CodecResult<T> = std::result::Result<T, CodecError>;
