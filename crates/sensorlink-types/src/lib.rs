//! Platform-agnostic types for sensorlink.
//!
//! This crate holds everything that does not touch a radio: link identities
//! and statuses, the attribute descriptor registry, and the value codec that
//! turns raw notification payloads into typed readings.
//!
//! # Features
//!
//! - [`LinkIdentity`], [`ConnectionStatus`] and [`RemoteDeviceRef`]
//! - [`DescriptorRegistry`] with the standard GATT characteristics
//! - Lenient [`codec::decode`] and strict [`codec::encode`]
//! - UUID constants for standard BLE characteristics
//!
//! # Example
//!
//! ```
//! use sensorlink_types::{codec, DescriptorRegistry};
//!
//! let registry = DescriptorRegistry::standard();
//! let humidity = registry.by_name("humidity");
//! let value = codec::decode(humidity, &[0x88, 0x13]).as_f64().unwrap();
//! assert!((value - 50.0).abs() < 1e-9);
//! ```

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod types;
pub mod uuid;

pub use descriptor::{AttributeDescriptor, DescriptorRegistry, RawFormat};
pub use error::{CodecError, CodecResult};
pub use types::{AttributeValue, ConnectionStatus, LinkIdentity, RemoteDeviceRef, Role};
pub use uuid as uuids;
