//! System-level device presence notifications.
//!
//! Host stacks report ACL connect/disconnect for every device, not just ours.
//! [`DevicePresenceObserver`] filters those reports against the peer a
//! session is currently attached to and drops the session status to
//! `Disconnected` when that peer goes away, which wakes the worker so it can
//! reconnect.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sensorlink_types::RemoteDeviceRef;

use crate::error::Result;
use crate::events::{DisconnectReason, EventDispatcher, LinkEvent, LinkId};
use crate::status::StatusCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Connected,
    Disconnected,
}

/// A connect or disconnect report for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub address: String,
    pub kind: PresenceKind,
}

impl PresenceEvent {
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            kind: PresenceKind::Connected,
        }
    }

    pub fn disconnected(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            kind: PresenceKind::Disconnected,
        }
    }
}

/// Source of system-wide presence reports.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    /// Start receiving reports. The stream ends when the source shuts down.
    async fn subscribe(&self) -> Result<BoxStream<'static, PresenceEvent>>;
}

/// Watches presence reports on behalf of one session.
#[derive(Debug)]
pub struct DevicePresenceObserver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DevicePresenceObserver {
    /// Subscribe to `source` and start filtering.
    ///
    /// `peer` tracks the device the session is attached to; reports for any
    /// other address are ignored.
    pub async fn start(
        source: Arc<dyn PresenceSource>,
        peer: watch::Receiver<Option<RemoteDeviceRef>>,
        status: Arc<StatusCell>,
        link: LinkId,
        events: EventDispatcher,
    ) -> Result<Self> {
        let mut stream = source.subscribe().await?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(event) => event,
                        None => {
                            debug!(%link, "Presence source closed");
                            break;
                        }
                    },
                };

                let ours = peer
                    .borrow()
                    .as_ref()
                    .is_some_and(|p| p.matches(&event.address));
                if !ours {
                    continue;
                }

                match event.kind {
                    PresenceKind::Connected => {
                        debug!(%link, address = %event.address, "Peer reported connected");
                    }
                    PresenceKind::Disconnected => {
                        if status.mark_disconnected() {
                            info!(%link, address = %event.address, "Peer lost");
                            events.send(LinkEvent::Disconnected {
                                link: link.clone(),
                                reason: DisconnectReason::PeerLost,
                            });
                        }
                    }
                }
            }
        });

        Ok(Self { cancel, task })
    }

    /// Stop watching and wait for the task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_types::ConnectionStatus;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Presence source backed by an mpsc channel.
    struct ChannelSource(std::sync::Mutex<Option<mpsc::UnboundedReceiver<PresenceEvent>>>);

    #[async_trait]
    impl PresenceSource for ChannelSource {
        async fn subscribe(&self) -> Result<BoxStream<'static, PresenceEvent>> {
            let rx = self.0.lock().unwrap().take().expect("subscribed twice");
            Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed())
        }
    }

    async fn setup() -> (
        mpsc::UnboundedSender<PresenceEvent>,
        watch::Sender<Option<RemoteDeviceRef>>,
        Arc<StatusCell>,
        DevicePresenceObserver,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(ChannelSource(std::sync::Mutex::new(Some(rx))));
        let (peer_tx, peer_rx) = watch::channel(None);
        let status = Arc::new(StatusCell::new(LinkId::session("s"), EventDispatcher::default()));
        status.transition(ConnectionStatus::Connecting);
        status.transition(ConnectionStatus::Connected);
        let observer = DevicePresenceObserver::start(
            source,
            peer_rx,
            Arc::clone(&status),
            LinkId::session("s"),
            EventDispatcher::default(),
        )
        .await
        .unwrap();
        (tx, peer_tx, status, observer)
    }

    #[tokio::test]
    async fn test_disconnect_for_our_peer_drops_status() {
        let (tx, peer, status, observer) = setup().await;
        peer.send_replace(Some(RemoteDeviceRef::new("AA:BB:CC:DD:EE:FF")));

        tx.send(PresenceEvent::disconnected("aa:bb:cc:dd:ee:ff")).unwrap();
        tokio::time::timeout(Duration::from_secs(1), status.wait_for_disconnection())
            .await
            .unwrap();
        assert_eq!(status.status(), ConnectionStatus::Disconnected);
        observer.stop().await;
    }

    #[tokio::test]
    async fn test_other_devices_are_ignored() {
        let (tx, peer, status, observer) = setup().await;
        peer.send_replace(Some(RemoteDeviceRef::new("AA:BB:CC:DD:EE:FF")));

        tx.send(PresenceEvent::disconnected("11:22:33:44:55:66")).unwrap();
        tx.send(PresenceEvent::connected("AA:BB:CC:DD:EE:FF")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(status.status(), ConnectionStatus::Connected);
        observer.stop().await;
    }

    #[tokio::test]
    async fn test_no_peer_means_no_match() {
        let (tx, _peer, status, observer) = setup().await;
        tx.send(PresenceEvent::disconnected("AA:BB:CC:DD:EE:FF")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(status.is_connected());
        observer.stop().await;
    }
}
