//! In-memory host stacks for testing without hardware.
//!
//! [`MockSessionHub`] connects session links over `tokio::io::duplex` pipes
//! and can inject presence reports and connect failures.
//! [`MockAttributeBackend`] records every command it receives and answers
//! with callbacks, either automatically or when a test says so.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Notify, broadcast, mpsc, watch};
use uuid::Uuid;

use sensorlink_types::{LinkIdentity, RemoteDeviceRef};

use crate::backend::{
    AttributeBackend, AttributeEvent, AttributeEventReceiver, AttributeEventSender,
    AttributeHandle, DiscoveredAttribute, attribute_event_channel,
};
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::framing::{DEFAULT_MAX_FRAME_SIZE, FrameReader, FrameWriter};
use crate::presence::{PresenceEvent, PresenceSource};
use crate::transport::{BondedDevice, SessionListener, SessionStream, SessionTransport};

const PIPE_BUFFER: usize = 64 * 1024;

/// Address the hub itself answers to.
pub const HUB_ADDRESS: &str = "00:11:22:33:44:55";

struct Incoming {
    io: DuplexStream,
    peer: RemoteDeviceRef,
}

struct Endpoint {
    address: String,
    tx: mpsc::UnboundedSender<Incoming>,
}

struct HubInner {
    endpoints: StdMutex<HashMap<String, Endpoint>>,
    endpoint_added: Notify,
    bonded: StdMutex<Vec<BondedDevice>>,
    presence: broadcast::Sender<PresenceEvent>,
    remaining_failures: AtomicU32,
    connect_attempts: AtomicU32,
}

impl HubInner {
    fn endpoints(&self) -> MutexGuard<'_, HashMap<String, Endpoint>> {
        self.endpoints.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn register(&self, session: &str, address: &str) -> Result<mpsc::UnboundedReceiver<Incoming>> {
        let mut endpoints = self.endpoints();
        if endpoints.get(session).is_some_and(|e| !e.tx.is_closed()) {
            return Err(Error::connection_failed(
                Some(session.to_string()),
                ConnectionFailureReason::AddressInUse,
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.insert(
            session.to_string(),
            Endpoint {
                address: address.to_string(),
                tx,
            },
        );
        drop(endpoints);
        self.endpoint_added.notify_waiters();
        Ok(rx)
    }

    fn unregister(&self, session: &str) {
        let mut endpoints = self.endpoints();
        if endpoints.get(session).is_some_and(|e| e.tx.is_closed()) {
            endpoints.remove(session);
        }
    }

    /// Open a pipe to the endpoint `session` at `address`.
    fn dial(&self, session: &str, address: Option<&str>, from: &str) -> Result<DuplexStream> {
        let endpoints = self.endpoints();
        let endpoint = endpoints
            .get(session)
            .filter(|e| address.is_none_or(|a| e.address.eq_ignore_ascii_case(a)))
            .ok_or_else(|| {
                Error::connection_failed(
                    address.map(str::to_string),
                    ConnectionFailureReason::Refused,
                )
            })?;
        let (near, far) = tokio::io::duplex(PIPE_BUFFER);
        endpoint
            .tx
            .send(Incoming {
                io: far,
                peer: RemoteDeviceRef::new(from),
            })
            .map_err(|_| {
                Error::connection_failed(
                    address.map(str::to_string),
                    ConnectionFailureReason::Refused,
                )
            })?;
        Ok(near)
    }

    fn take_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory classic-session host stack.
///
/// Session links built on [`transport`](Self::transport) listen under
/// [`HUB_ADDRESS`]; tests play the remote side through
/// [`dial`](Self::dial) and [`listen_as`](Self::listen_as).
#[derive(Clone)]
pub struct MockSessionHub {
    inner: Arc<HubInner>,
}

impl Default for MockSessionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockSessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSessionHub")
            .field("endpoints", &self.inner.endpoints().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MockSessionHub {
    pub fn new() -> Self {
        let (presence, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(HubInner {
                endpoints: StdMutex::new(HashMap::new()),
                endpoint_added: Notify::new(),
                bonded: StdMutex::new(Vec::new()),
                presence,
                remaining_failures: AtomicU32::new(0),
                connect_attempts: AtomicU32::new(0),
            }),
        }
    }

    pub fn transport(&self) -> Arc<dyn SessionTransport> {
        Arc::new(self.clone())
    }

    pub fn presence(&self) -> Arc<dyn PresenceSource> {
        Arc::new(self.clone())
    }

    /// Add a bonded device.
    pub fn add_bonded(&self, address: impl Into<String>, name: impl Into<String>) {
        if let Ok(mut bonded) = self.inner.bonded.lock() {
            bonded.push(BondedDevice::new(address, Some(name.into())));
        }
    }

    /// Forget a bonded device, as if the user unpaired it.
    pub fn remove_bonded(&self, address: &str) {
        if let Ok(mut bonded) = self.inner.bonded.lock() {
            bonded.retain(|d| !d.address.eq_ignore_ascii_case(address));
        }
    }

    /// Broadcast a presence report to every subscribed observer.
    pub fn emit_presence(&self, event: PresenceEvent) {
        let _ = self.inner.presence.send(event);
    }

    /// Make the next `count` listen/connect calls fail.
    pub fn set_transient_failures(&self, count: u32) {
        self.inner.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Listen and connect calls made so far.
    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Whether some link is listening under `session`.
    pub fn is_listening(&self, session: &str) -> bool {
        self.inner
            .endpoints()
            .get(session)
            .is_some_and(|e| !e.tx.is_closed())
    }

    /// Play a remote client: wait until something listens under `session`,
    /// then connect to it from `from`.
    pub async fn dial(&self, session: &str, from: &str) -> Result<MockPeer> {
        loop {
            let added = self.inner.endpoint_added.notified();
            tokio::pin!(added);
            added.as_mut().enable();
            if self.is_listening(session) {
                let io = self.inner.dial(session, None, from)?;
                return Ok(MockPeer::new(io));
            }
            added.await;
        }
    }

    /// Play a remote server: listen under `session` at `address`.
    pub fn listen_as(&self, session: &str, address: &str) -> Result<MockPeerListener> {
        let rx = self.inner.register(session, address)?;
        Ok(MockPeerListener {
            session: session.to_string(),
            rx,
            hub: Arc::clone(&self.inner),
        })
    }
}

#[async_trait]
impl SessionTransport for MockSessionHub {
    async fn bonded_devices(&self) -> Result<Vec<BondedDevice>> {
        Ok(self
            .inner
            .bonded
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default())
    }

    async fn listen(&self, identity: &LinkIdentity) -> Result<Box<dyn SessionListener>> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.take_failure() {
            return Err(Error::connection_failed_str(None, "injected listen failure"));
        }
        let rx = self.inner.register(identity.session_name(), HUB_ADDRESS)?;
        Ok(Box::new(MockListener {
            session: identity.session_name().to_string(),
            rx: Some(rx),
            hub: Arc::clone(&self.inner),
        }))
    }

    async fn connect(&self, address: &str, identity: &LinkIdentity) -> Result<SessionStream> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.take_failure() {
            return Err(Error::connection_failed(
                Some(address.to_string()),
                ConnectionFailureReason::Timeout,
            ));
        }
        let io = self
            .inner
            .dial(identity.session_name(), Some(address), HUB_ADDRESS)?;
        Ok(SessionStream::new(RemoteDeviceRef::new(address), io))
    }
}

#[async_trait]
impl PresenceSource for MockSessionHub {
    async fn subscribe(&self) -> Result<BoxStream<'static, PresenceEvent>> {
        let rx = self.inner.presence.subscribe();
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}

struct MockListener {
    session: String,
    rx: Option<mpsc::UnboundedReceiver<Incoming>>,
    hub: Arc<HubInner>,
}

#[async_trait]
impl SessionListener for MockListener {
    async fn accept(&mut self) -> Result<SessionStream> {
        let rx = self.rx.as_mut().ok_or(Error::NotConnected)?;
        let incoming = rx.recv().await.ok_or(Error::NotConnected)?;
        Ok(SessionStream::new(incoming.peer, incoming.io))
    }

    async fn close(&mut self) -> Result<()> {
        self.rx = None;
        self.hub.unregister(&self.session);
        Ok(())
    }
}

impl Drop for MockListener {
    fn drop(&mut self) {
        self.rx = None;
        self.hub.unregister(&self.session);
    }
}

/// Remote server side played by a test.
pub struct MockPeerListener {
    session: String,
    rx: mpsc::UnboundedReceiver<Incoming>,
    hub: Arc<HubInner>,
}

impl MockPeerListener {
    /// Wait for a client link to connect.
    pub async fn accept(&mut self) -> Result<MockPeer> {
        let incoming = self.rx.recv().await.ok_or(Error::NotConnected)?;
        Ok(MockPeer::new(incoming.io))
    }
}

impl Drop for MockPeerListener {
    fn drop(&mut self) {
        self.rx.close();
        self.hub.unregister(&self.session);
    }
}

/// The remote end of a mock session, speaking the same framing as a link.
pub struct MockPeer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
}

impl MockPeer {
    fn new(io: DuplexStream) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: FrameReader::new(read_half, DEFAULT_MAX_FRAME_SIZE),
            writer: FrameWriter::new(write_half, DEFAULT_MAX_FRAME_SIZE),
        }
    }

    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_frame(frame).await
    }

    /// Next frame from the link; `None` once the link closed the session.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        self.reader.read_frame().await
    }

    /// Close the session as if the radio link dropped.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

// ---------------------------------------------------------------------------

/// A command recorded by [`MockAttributeBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    Open { address: String, reuse: bool },
    Discover,
    Configure { attribute: Uuid, enable: bool },
    Release,
}

/// Builder for [`MockAttributeBackend`].
#[derive(Debug, Clone)]
pub struct MockAttributeBackendBuilder {
    attributes: Vec<Uuid>,
    auto_connect: bool,
    auto_complete: bool,
    open_failures: u32,
}

impl Default for MockAttributeBackendBuilder {
    fn default() -> Self {
        Self {
            attributes: Vec::new(),
            auto_connect: true,
            auto_complete: true,
            open_failures: 0,
        }
    }
}

impl MockAttributeBackendBuilder {
    /// Offer `attribute` during discovery.
    #[must_use]
    pub fn attribute(mut self, attribute: Uuid) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Answer `open` with `Connected` right away.
    #[must_use]
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Answer every configuration request with a successful completion.
    #[must_use]
    pub fn auto_complete(mut self, enabled: bool) -> Self {
        self.auto_complete = enabled;
        self
    }

    /// Fail the first `count` opens with `Disconnected`.
    #[must_use]
    pub fn open_failures(mut self, count: u32) -> Self {
        self.open_failures = count;
        self
    }

    /// Build the backend and the callback receiver to hand to the link.
    pub fn build(self) -> (MockAttributeBackend, AttributeEventReceiver) {
        let (events, rx) = attribute_event_channel();
        let (operation_count, _) = watch::channel(0);
        let backend = MockAttributeBackend {
            events,
            attributes: self.attributes,
            auto_connect: self.auto_connect,
            auto_complete: self.auto_complete,
            open_failures: AtomicU32::new(self.open_failures),
            connected: AtomicBool::new(false),
            operations: StdMutex::new(Vec::new()),
            operation_count,
            outstanding: AtomicUsize::new(0),
            max_outstanding: AtomicUsize::new(0),
        };
        (backend, rx)
    }
}

/// Scriptable attribute host stack.
pub struct MockAttributeBackend {
    events: AttributeEventSender,
    attributes: Vec<Uuid>,
    auto_connect: bool,
    auto_complete: bool,
    open_failures: AtomicU32,
    connected: AtomicBool,
    operations: StdMutex<Vec<MockOperation>>,
    operation_count: watch::Sender<usize>,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
}

impl std::fmt::Debug for MockAttributeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAttributeBackend")
            .field("attributes", &self.attributes)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl MockAttributeBackend {
    pub fn builder() -> MockAttributeBackendBuilder {
        MockAttributeBackendBuilder::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Everything the link asked for, in order.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.operations.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Wait until at least `count` operations were recorded.
    pub async fn wait_for_operations(&self, count: usize) {
        let mut rx = self.operation_count.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    /// Most configuration requests ever outstanding at once.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.load(Ordering::SeqCst)
    }

    /// Report the open as successful.
    pub fn accept_connection(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.fire(AttributeEvent::Connected);
    }

    /// Report completion of the outstanding configuration request.
    pub fn complete(&self, attribute: Uuid, success: bool) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.fire(AttributeEvent::OperationComplete { attribute, success });
    }

    /// Deliver a notification.
    pub fn notify(&self, attribute: Uuid, value: &[u8]) {
        self.fire(AttributeEvent::ValueChanged {
            attribute,
            value: Bytes::copy_from_slice(value),
        });
    }

    /// Drop the connection as if the peer went out of range.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outstanding.store(0, Ordering::SeqCst);
        self.fire(AttributeEvent::Disconnected);
    }

    fn fire(&self, event: AttributeEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, operation: MockOperation) {
        if let Ok(mut operations) = self.operations.lock() {
            operations.push(operation);
        }
        self.operation_count.send_modify(|n| *n += 1);
    }
}

#[async_trait]
impl AttributeBackend for MockAttributeBackend {
    async fn open(&self, address: &str, reuse: bool) -> Result<()> {
        self.record(MockOperation::Open {
            address: address.to_string(),
            reuse,
        });
        let failed = self
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            self.fire(AttributeEvent::Disconnected);
        } else if self.auto_connect || (reuse && self.is_connected()) {
            self.accept_connection();
        }
        Ok(())
    }

    async fn discover(&self) -> Result<()> {
        self.record(MockOperation::Discover);
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let found = self
            .attributes
            .iter()
            .enumerate()
            .map(|(i, id)| DiscoveredAttribute {
                id: *id,
                handle: AttributeHandle(i as u32 + 1),
            })
            .collect();
        self.fire(AttributeEvent::AttributesDiscovered(found));
        Ok(())
    }

    async fn configure_notifications(
        &self,
        _handle: AttributeHandle,
        attribute: Uuid,
        enable: bool,
    ) -> Result<()> {
        self.record(MockOperation::Configure { attribute, enable });
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_outstanding.fetch_max(now, Ordering::SeqCst);
        if self.auto_complete {
            self.complete(attribute, true);
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.record(MockOperation::Release);
        self.connected.store(false, Ordering::SeqCst);
        self.outstanding.store(0, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_types::uuids::BATTERY_LEVEL;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_without_listener_is_refused() {
        let hub = MockSessionHub::new();
        let identity = LinkIdentity::client("s", "Peer");
        let err = hub.connect("AA:BB", &identity).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectionFailed {
                reason: ConnectionFailureReason::Refused,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_connect_reaches_peer_listener() {
        let hub = MockSessionHub::new();
        let mut remote = hub.listen_as("s", "AA:BB").unwrap();
        let identity = LinkIdentity::client("s", "Peer");
        let stream = hub.connect("aa:bb", &identity).await.unwrap();
        assert_eq!(stream.peer.address, "aa:bb");
        let _peer = tokio::time::timeout(Duration::from_secs(1), remote.accept())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_listener_on_same_session_rejected() {
        let hub = MockSessionHub::new();
        let _first = hub.listen(&LinkIdentity::server("s")).await.unwrap();
        assert!(hub.listen(&LinkIdentity::server("s")).await.is_err());
    }

    #[tokio::test]
    async fn test_listener_close_unregisters() {
        let hub = MockSessionHub::new();
        let mut listener = hub.listen(&LinkIdentity::server("s")).await.unwrap();
        assert!(hub.is_listening("s"));
        listener.close().await.unwrap();
        assert!(!hub.is_listening("s"));
        assert!(hub.listen(&LinkIdentity::server("s")).await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_failures_are_consumed() {
        let hub = MockSessionHub::new();
        hub.set_transient_failures(2);
        let id = LinkIdentity::server("s");
        assert!(hub.listen(&id).await.is_err());
        assert!(hub.listen(&id).await.is_err());
        assert!(hub.listen(&id).await.is_ok());
        assert_eq!(hub.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_presence_is_broadcast() {
        let hub = MockSessionHub::new();
        let mut stream = hub.subscribe().await.unwrap();
        hub.emit_presence(PresenceEvent::disconnected("AA:BB"));
        assert_eq!(stream.next().await, Some(PresenceEvent::disconnected("AA:BB")));
    }

    #[tokio::test]
    async fn test_attribute_backend_records_and_answers() {
        let (backend, mut rx) = MockAttributeBackend::builder()
            .attribute(BATTERY_LEVEL)
            .build();
        backend.open("AA:BB", false).await.unwrap();
        assert_eq!(rx.recv().await, Some(AttributeEvent::Connected));
        backend.discover().await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(AttributeEvent::AttributesDiscovered(found)) if found.len() == 1
        ));
        backend
            .configure_notifications(AttributeHandle(1), BATTERY_LEVEL, true)
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(AttributeEvent::OperationComplete {
                attribute: BATTERY_LEVEL,
                success: true
            })
        );
        assert_eq!(backend.operations().len(), 3);
        assert_eq!(backend.max_outstanding(), 1);
    }

    #[tokio::test]
    async fn test_open_failures_report_disconnected() {
        let (backend, mut rx) = MockAttributeBackend::builder().open_failures(1).build();
        backend.open("AA:BB", false).await.unwrap();
        assert_eq!(rx.recv().await, Some(AttributeEvent::Disconnected));
        backend.open("AA:BB", false).await.unwrap();
        assert_eq!(rx.recv().await, Some(AttributeEvent::Connected));
    }
}
