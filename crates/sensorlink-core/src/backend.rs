//! Host-stack seam for attribute-subscription links.
//!
//! Backend calls only submit work; results arrive later as
//! [`AttributeEvent`]s on the channel the backend was built with. This
//! mirrors callback-driven platform GATT APIs and lets one driver task
//! serialize everything.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Platform handle of a discovered attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeHandle(pub u32);

impl std::fmt::Display for AttributeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredAttribute {
    pub id: Uuid,
    pub handle: AttributeHandle,
}

/// Callback from the host stack.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeEvent {
    /// The low-level connection is up.
    Connected,
    /// The low-level connection is gone (or the open failed).
    Disconnected,
    /// Service discovery finished.
    AttributesDiscovered(Vec<DiscoveredAttribute>),
    /// A notification-configuration write finished.
    OperationComplete { attribute: Uuid, success: bool },
    /// The peer notified a new value.
    ValueChanged { attribute: Uuid, value: Bytes },
}

pub type AttributeEventSender = mpsc::UnboundedSender<AttributeEvent>;
pub type AttributeEventReceiver = mpsc::UnboundedReceiver<AttributeEvent>;

/// Create the callback channel shared by a backend and its link.
pub fn attribute_event_channel() -> (AttributeEventSender, AttributeEventReceiver) {
    mpsc::unbounded_channel()
}

/// The attribute side of a host Bluetooth stack, bound to one link.
#[async_trait]
pub trait AttributeBackend: Send + Sync {
    /// Start opening a connection to `address`. With `reuse`, an existing
    /// live connection to the same address should be adopted.
    ///
    /// Completion: [`AttributeEvent::Connected`] or [`AttributeEvent::Disconnected`].
    async fn open(&self, address: &str, reuse: bool) -> Result<()>;

    /// Start service discovery.
    ///
    /// Completion: [`AttributeEvent::AttributesDiscovered`].
    async fn discover(&self) -> Result<()>;

    /// Start enabling or disabling notifications for one attribute.
    ///
    /// Completion: [`AttributeEvent::OperationComplete`].
    async fn configure_notifications(
        &self,
        handle: AttributeHandle,
        attribute: Uuid,
        enable: bool,
    ) -> Result<()>;

    /// Drop the low-level connection. Idempotent; no completion event.
    async fn release(&self) -> Result<()>;
}
