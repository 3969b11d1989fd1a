//! Error types for sensorlink-core.
//!
//! # Recovery
//!
//! Links recover from most failures on their own; callers mainly see
//! configuration errors and cancellation.
//!
//! | Error Type | Who handles it | Notes |
//! |------------|----------------|-------|
//! | [`Error::Bluetooth`] | link worker | logged, retried after backoff |
//! | [`Error::Io`] | link worker | stream closed, link reconnects |
//! | [`Error::ConnectionFailed`] | link worker | retried with backoff |
//! | [`Error::Timeout`] | caller | only produced by caller-bounded waits |
//! | [`Error::FrameTooLarge`] | link worker | protocol violation, stream is dropped |
//! | [`Error::InvalidConfig`] | caller | returned from `connect()`, not retried |
//! | [`Error::DeviceNotFound`] | caller / worker | no bonded match or peripheral not seen |
//! | [`Error::Cancelled`] | caller | `disconnect()` ran while waiting |
//! | [`Error::ReconnectExhausted`] | caller | `max_attempts` reached |
//!
//! [`Error::is_transient`] classifies errors the way the reconnect loop does.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while managing a link.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// BlueZ error from the classic-session backend.
    #[cfg(all(target_os = "linux", feature = "bluez"))]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),

    /// Device not found during lookup or connection.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while not connected.
    #[error("Not connected to device")]
    NotConnected,

    /// Attribute not present on the connected peripheral.
    #[error("Attribute not found: {uuid} (searched in {service_count} services)")]
    AttributeNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Value could not be encoded.
    #[error(transparent)]
    Codec(#[from] sensorlink_types::CodecError),

    /// A frame header announced an illegal length.
    #[error("Frame of {actual} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Maximum accepted payload size.
        limit: usize,
        /// Size announced by the peer.
        actual: usize,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// The reconnect policy ran out of attempts.
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// Device is out of range.
    OutOfRange,
    /// Remote refused the session (no listener, wrong channel).
    Refused,
    /// Connection attempt timed out.
    Timeout,
    /// Listening endpoint is already in use.
    AddressInUse,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::OutOfRange => write!(f, "device out of range"),
            Self::Refused => write!(f, "connection refused by remote"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::AddressInUse => write!(f, "session endpoint already in use"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// No bonded device has the requested name and no fallback address is set.
    NotBonded { name: String },
    /// Device with specified name/address not found.
    NotFound { identifier: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotBonded { name } => write!(f, "no bonded device named '{}'", name),
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create an attribute not found error.
    pub fn attribute_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::AttributeNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Create a connection failure with a string reason.
    pub fn connection_failed_str(device_id: Option<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            device_id,
            reason: ConnectionFailureReason::Other(reason.into()),
        }
    }

    /// Whether a link worker should retry after this error.
    ///
    /// Configuration problems and cancellation are permanent; everything
    /// that comes from the radio or the stream is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Bluetooth(_)
            | Error::Io(_)
            | Error::Timeout { .. }
            | Error::NotConnected
            | Error::FrameTooLarge { .. }
            | Error::ConnectionFailed { .. } => true,
            #[cfg(all(target_os = "linux", feature = "bluez"))]
            Error::Bluez(_) => true,
            // A bonded device can show up later; an unknown address can come into range.
            Error::DeviceNotFound(reason) => {
                !matches!(reason, DeviceNotFoundReason::NoAdapter)
            }
            Error::AttributeNotFound { .. }
            | Error::Codec(_)
            | Error::Cancelled
            | Error::ReconnectExhausted { .. }
            | Error::InvalidConfig(_) => false,
        }
    }
}

/// Result type alias using sensorlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("Polar H10");
        assert!(err.to_string().contains("Polar H10"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::attribute_not_found("0x2A19", 5);
        assert!(err.to_string().contains("0x2A19"));
        assert!(err.to_string().contains("5 services"));

        let err = Error::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("10s"));

        let err = Error::FrameTooLarge {
            limit: 64,
            actual: 100,
        };
        assert_eq!(err.to_string(), "Frame of 100 bytes exceeds limit of 64 bytes");
    }

    #[test]
    fn test_device_not_found_reasons() {
        let err = Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter);
        assert!(err.to_string().contains("no Bluetooth adapter"));

        let err = Error::DeviceNotFound(DeviceNotFoundReason::NotBonded {
            name: "Headset".into(),
        });
        assert!(err.to_string().contains("no bonded device named 'Headset'"));
    }

    #[test]
    fn test_connection_failed_display() {
        let err = Error::connection_failed(Some("AA".into()), ConnectionFailureReason::Refused);
        assert_eq!(err.to_string(), "Connection failed: connection refused by remote");

        let err = Error::connection_failed_str(None, "adapter reset");
        assert_eq!(err.to_string(), "Connection failed: adapter reset");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::NotConnected.is_transient());
        assert!(Error::connection_failed(None, ConnectionFailureReason::OutOfRange).is_transient());
        assert!(Error::device_not_found("x").is_transient());
        assert!(!Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter).is_transient());
        assert!(!Error::Cancelled.is_transient());
        assert!(!Error::invalid_config("bad").is_transient());
        assert!(!Error::ReconnectExhausted { attempts: 3 }.is_transient());
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_codec_error_conversion() {
        let err: Error = sensorlink_types::CodecError::UnknownAttribute("foo".into()).into();
        assert_eq!(err.to_string(), "unknown attribute: foo");
    }
}
