//! Link event system for lifecycle and data-path notifications.
//!
//! Every link owns an [`EventDispatcher`]. Subscribers receive status
//! changes, reconnect attempts, notification-request traffic and data
//! contract violations without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use sensorlink_types::{ConnectionStatus, RemoteDeviceRef};

use crate::queue::RequestKind;

/// Which kind of link produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Session,
    Attribute,
}

/// Link identifier for events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkId {
    pub kind: LinkKind,
    /// Session name or peripheral address.
    pub name: String,
}

impl LinkId {
    pub fn session(name: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Session,
            name: name.into(),
        }
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Attribute,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            LinkKind::Session => write!(f, "session:{}", self.name),
            LinkKind::Attribute => write!(f, "attribute:{}", self.name),
        }
    }
}

/// Events that can be emitted by links.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LinkEvent {
    /// Status moved along a legal transition.
    StatusChanged {
        link: LinkId,
        status: ConnectionStatus,
    },
    /// Low-level channel opened to a peer.
    Connected { link: LinkId, peer: RemoteDeviceRef },
    /// Low-level channel closed.
    Disconnected {
        link: LinkId,
        reason: DisconnectReason,
    },
    /// Reconnection attempt started.
    ReconnectStarted { link: LinkId, attempt: u32 },
    /// Reconnection succeeded.
    ReconnectSucceeded { link: LinkId, attempts: u32 },
    /// A notification-configuration request was handed to the host stack.
    RequestIssued {
        link: LinkId,
        kind: RequestKind,
        attribute: Uuid,
    },
    /// The host stack reported completion of the in-flight request.
    RequestCompleted {
        link: LinkId,
        kind: RequestKind,
        attribute: Uuid,
        success: bool,
    },
    /// All subscriptions are configured.
    AttributesReady { link: LinkId, subscribed: usize },
    /// A notification payload was shorter than its descriptor's format.
    MalformedPayload {
        link: LinkId,
        attribute: Uuid,
        len: usize,
    },
    /// A sampled frame did not match the caller's buffer length.
    FrameSizeMismatch {
        link: LinkId,
        expected: usize,
        actual: usize,
    },
    /// Error occurred during link operation.
    Error { link: LinkId, error: String },
}

/// Reason for disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    UserRequested,
    /// The system reported the peer gone.
    PeerLost,
    /// The framed stream ended or failed.
    StreamClosed,
    /// BLE error occurred.
    BleError(String),
    /// Unknown reason.
    Unknown,
}

/// Sender for link events.
pub type EventSender = broadcast::Sender<LinkEvent>;

/// Receiver for link events.
pub type EventReceiver = broadcast::Receiver<LinkEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event. Dropped silently when nobody listens.
    pub fn send(&self, event: LinkEvent) {
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = LinkEvent::StatusChanged {
            link: LinkId::session("eeg"),
            status: ConnectionStatus::Connected,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"status_changed""#));
        assert!(json.contains(r#""kind":"session""#));
        assert!(json.contains(r#""status":"connected""#));
    }

    #[test]
    fn test_link_id_display() {
        assert_eq!(LinkId::attribute("AA:BB").to_string(), "attribute:AA:BB");
    }

    #[tokio::test]
    async fn test_dispatcher_fan_out() {
        let dispatcher = EventDispatcher::default();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(LinkEvent::ReconnectStarted {
            link: LinkId::session("s"),
            attempt: 1,
        });

        assert!(matches!(a.recv().await.unwrap(), LinkEvent::ReconnectStarted { attempt: 1, .. }));
        assert!(matches!(b.recv().await.unwrap(), LinkEvent::ReconnectStarted { .. }));
    }

    #[test]
    fn test_send_without_receivers_is_silent() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.send(LinkEvent::Error {
            link: LinkId::session("s"),
            error: "boom".into(),
        });
        assert_eq!(dispatcher.receiver_count(), 0);
    }
}
