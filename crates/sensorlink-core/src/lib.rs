//! Connection layer between Bluetooth peripherals and a fixed-rate sampling
//! pipeline.
//!
//! Two link kinds are provided:
//!
//! - [`SessionLink`]: a classic stream session (RFCOMM style) identified by a
//!   session name. As server it listens for one peer, as client it dials a
//!   bonded device by name or a literal address. A background worker
//!   reconnects with backoff until [`SessionLink::disconnect`] is called.
//! - [`AttributeLink`]: a low-energy link that subscribes to notifications of
//!   registered attributes. Configuration requests go out one at a time, and
//!   every decoded value is cached for sampling.
//!
//! [`SessionChannel`] and [`AttributeChannel`] adapt either link to a
//! pipeline that samples once per tick and never blocks.
//!
//! # Backends
//!
//! | Link | Backend | Platform |
//! |------|---------|----------|
//! | [`SessionLink`] | `RfcommTransport` (BlueZ) | Linux, `bluez` feature |
//! | [`AttributeLink`] | [`BtleplugBackend`] | Linux, macOS, Windows |
//! | both | [`mock`] | everywhere, in memory |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensorlink_core::{
//!     AttributeLink, AttributeLinkOptions, BtleConfig, BtleplugBackend, attribute_event_channel,
//! };
//! use sensorlink_types::DescriptorRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (events, callbacks) = attribute_event_channel();
//!     let backend = BtleplugBackend::with_default_adapter(BtleConfig::default(), events).await?;
//!     let link = AttributeLink::new(
//!         "thermometer",
//!         Arc::new(backend),
//!         callbacks,
//!         Arc::new(DescriptorRegistry::standard()),
//!         AttributeLinkOptions::default(),
//!     )?;
//!
//!     let mut temperature = link.observe_named("temperature")?;
//!     link.connect("AA:BB:CC:DD:EE:FF")?;
//!     link.wait_until_ready().await?;
//!
//!     while let Some(value) = temperature.changed().await {
//!         println!("{:?}", value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod attribute;
pub mod backend;
pub mod btle;
pub mod channel;
pub mod error;
pub mod events;
pub mod framing;
pub mod machine;
pub mod metrics;
pub mod mock;
pub mod presence;
pub mod queue;
pub mod reconnect;
#[cfg(all(target_os = "linux", feature = "bluez"))]
pub mod rfcomm;
pub mod session;
pub mod status;
pub mod transport;

// Re-export types from sensorlink-types
pub use sensorlink_types::uuid as uuids;
pub use sensorlink_types::{
    AttributeDescriptor, AttributeValue, ConnectionStatus, DescriptorRegistry, LinkIdentity,
    RemoteDeviceRef, Role,
};

// Core exports
pub use attribute::{AttributeLink, AttributeLinkOptions};
pub use backend::{
    AttributeBackend, AttributeEvent, AttributeEventReceiver, AttributeEventSender,
    AttributeHandle, DiscoveredAttribute, attribute_event_channel,
};
pub use btle::{BtleConfig, BtleplugBackend, BtleplugPresence};
pub use channel::{AttributeChannel, SessionChannel};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use events::{DisconnectReason, EventReceiver, EventSender, LinkEvent, LinkId, LinkKind};
pub use machine::{Action, AttributeMachine, Phase};
pub use metrics::{LinkMetrics, LinkMetricsSummary, OperationMetrics};
pub use mock::{MockAttributeBackend, MockAttributeBackendBuilder, MockSessionHub};
pub use presence::{DevicePresenceObserver, PresenceEvent, PresenceKind, PresenceSource};
pub use queue::{PendingRequest, RequestKind, RequestQueue};
pub use reconnect::ReconnectOptions;
#[cfg(all(target_os = "linux", feature = "bluez"))]
pub use rfcomm::RfcommTransport;
pub use session::{SessionLink, SessionOptions};
pub use status::{LinkState, StatusCell};
pub use transport::{BondedDevice, SessionListener, SessionStream, SessionTransport};
