//! Worker-driven classic stream session with automatic recovery.
//!
//! A [`SessionLink`] owns one background worker. The worker opens the
//! session (listen + accept as server, dial as client), publishes frames from
//! the peer, waits for the connection to drop and starts over until
//! [`SessionLink::disconnect`] is called.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──accept/dial ok──► Connected
//!       ▲                          │ ▲                           │
//!       │                  failure │ │ backoff                   │ peer lost / stream end
//!       │                          ▼ │                           ▼
//!       └──── disconnect() ─────── retry ◄─────────────── Disconnected
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensorlink_types::{ConnectionStatus, LinkIdentity, RemoteDeviceRef, Role};

use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventDispatcher, LinkEvent, LinkId};
use crate::framing::{DEFAULT_MAX_FRAME_SIZE, FrameReader, FrameWriter};
use crate::metrics::LinkMetrics;
use crate::presence::{DevicePresenceObserver, PresenceSource};
use crate::reconnect::ReconnectOptions;
use crate::status::{LinkState, StatusCell};
use crate::transport::{SessionIo, SessionStream, SessionTransport, resolve_remote};

/// A connected period shorter than this counts as a flap and is followed by
/// the reconnect delay before the next attempt.
const STABLE_SESSION: Duration = Duration::from_secs(1);

/// Upper bound on closing the write half during teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Tuning for a [`SessionLink`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub reconnect: ReconnectOptions,
    /// Largest frame accepted from or sent to the peer.
    pub max_frame_size: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectOptions::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_capacity: 100,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.reconnect.validate()?;
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(Error::invalid_config(
                "max_frame_size must be between 1 and u32::MAX",
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}

type Writer = FrameWriter<WriteHalf<Box<dyn SessionIo>>>;

/// Handles of the running worker, guarded by one async lock so `connect`
/// and `disconnect` never interleave.
#[derive(Default)]
struct Control {
    worker: Option<JoinHandle<()>>,
    observer: Option<DevicePresenceObserver>,
}

struct Shared {
    identity: LinkIdentity,
    transport: Arc<dyn SessionTransport>,
    presence: Option<Arc<dyn PresenceSource>>,
    options: SessionOptions,
    link: LinkId,
    status: Arc<StatusCell>,
    events: EventDispatcher,
    metrics: Arc<LinkMetrics>,
    peer: watch::Sender<Option<RemoteDeviceRef>>,
    latest: watch::Sender<Option<Bytes>>,
    writer: Mutex<Option<Writer>>,
    cancel: StdMutex<CancellationToken>,
    control: Mutex<Control>,
}

/// A classic stream session that reconnects on its own.
///
/// Cloning is cheap and every clone controls the same session. The worker
/// keeps running until [`disconnect`](Self::disconnect) is called; dropping
/// the last handle does not stop it.
#[derive(Clone)]
pub struct SessionLink {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLink")
            .field("identity", &self.shared.identity)
            .field("status", &self.shared.status.status())
            .finish_non_exhaustive()
    }
}

impl SessionLink {
    /// Create a link. Nothing happens on the radio until [`connect`](Self::connect).
    pub fn new(
        identity: LinkIdentity,
        transport: Arc<dyn SessionTransport>,
        options: SessionOptions,
    ) -> Result<Self> {
        options.validate()?;
        if identity.session_name().is_empty() {
            return Err(Error::invalid_config("session name must not be empty"));
        }
        let link = LinkId::session(identity.session_name());
        let events = EventDispatcher::new(options.event_capacity);
        let status = Arc::new(StatusCell::new(link.clone(), events.clone()));
        let (peer, _) = watch::channel(None);
        let (latest, _) = watch::channel(None);

        Ok(Self {
            shared: Arc::new(Shared {
                identity,
                transport,
                presence: None,
                options,
                link,
                status,
                events,
                metrics: LinkMetrics::shared(),
                peer,
                latest,
                writer: Mutex::new(None),
                cancel: StdMutex::new(CancellationToken::new()),
                control: Mutex::new(Control::default()),
            }),
        })
    }

    /// Attach a system presence source. Must be called before the first
    /// clone is made.
    pub fn with_presence(mut self, source: Arc<dyn PresenceSource>) -> Result<Self> {
        let shared = Arc::get_mut(&mut self.shared)
            .ok_or_else(|| Error::invalid_config("presence source must be set before sharing the link"))?;
        shared.presence = Some(source);
        Ok(self)
    }

    pub fn identity(&self) -> &LinkIdentity {
        &self.shared.identity
    }

    pub fn link_id(&self) -> &LinkId {
        &self.shared.link
    }

    /// Start (or join) the worker and wait until the session is connected.
    ///
    /// Client identities are resolved first; a name that matches no bonded
    /// device with no fallback address is a configuration error. Returns
    /// [`Error::Cancelled`] if [`disconnect`](Self::disconnect) runs while
    /// waiting.
    #[tracing::instrument(skip(self), fields(link = %self.shared.link))]
    pub async fn connect(&self) -> Result<()> {
        {
            let mut control = self.shared.control.lock().await;

            if self.shared.identity.role() == Role::Client {
                self.shared.resolve_target().await?;
            }

            self.shared.status.revive();

            if control.worker.as_ref().is_none_or(|w| w.is_finished()) {
                let token = CancellationToken::new();
                if let Ok(mut cancel) = self.shared.cancel.lock() {
                    *cancel = token.clone();
                }

                if control.observer.is_none()
                    && let Some(source) = &self.shared.presence
                {
                    match DevicePresenceObserver::start(
                        Arc::clone(source),
                        self.shared.peer.subscribe(),
                        Arc::clone(&self.shared.status),
                        self.shared.link.clone(),
                        self.shared.events.clone(),
                    )
                    .await
                    {
                        Ok(observer) => control.observer = Some(observer),
                        Err(e) => warn!("Presence notifications unavailable: {}", e),
                    }
                }

                info!(identity = %self.shared.identity, "Starting session worker");
                control.worker = Some(tokio::spawn(Arc::clone(&self.shared).run(token)));
            }
        }

        self.shared.status.wait_for_connection().await
    }

    /// Stop the worker, close the session and release every waiter.
    ///
    /// Safe to call any number of times.
    pub async fn disconnect(&self) {
        let mut control = self.shared.control.lock().await;
        let was_running = control.worker.is_some();

        self.shared.status.terminate();
        if let Ok(cancel) = self.shared.cancel.lock() {
            cancel.cancel();
        }
        if let Some(worker) = control.worker.take()
            && let Err(e) = worker.await
        {
            warn!(link = %self.shared.link, "Session worker ended abnormally: {}", e);
        }
        if let Some(observer) = control.observer.take() {
            observer.stop().await;
        }

        if was_running {
            info!(link = %self.shared.link, "Session disconnected");
            self.shared.events.send(LinkEvent::Disconnected {
                link: self.shared.link.clone(),
                reason: DisconnectReason::UserRequested,
            });
        }
    }

    /// Whether the session is currently connected. Never blocks.
    pub fn is_connected(&self) -> bool {
        self.shared.status.is_connected()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.status()
    }

    /// Watch the lifecycle state.
    pub fn state_watch(&self) -> watch::Receiver<LinkState> {
        self.shared.status.subscribe()
    }

    /// Watch the most recent frame received from the peer.
    pub fn frame_watch(&self) -> watch::Receiver<Option<Bytes>> {
        self.shared.latest.subscribe()
    }

    /// The peer of the current connection.
    pub fn peer(&self) -> Option<RemoteDeviceRef> {
        self.shared.peer.borrow().clone()
    }

    /// Send one frame to the peer.
    ///
    /// A write the peer does not drain is abandoned as soon as the session
    /// drops or [`disconnect`](Self::disconnect) runs.
    pub async fn send_frame(&self, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let started = Instant::now();
        let cancel = self.shared.cancel_token();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.shared.status.wait_for_disconnection() => Err(Error::NotConnected),
            result = self.shared.write(payload) => result,
        };
        match result {
            Ok(()) => {
                self.shared.metrics.writes.record_success(started.elapsed());
                self.shared.metrics.record_bytes_written(payload.len() as u64);
                Ok(())
            }
            Err(e) => {
                self.shared.metrics.writes.record_failure(started.elapsed());
                // Oversized payloads are the caller's fault; an abandoned write
                // means the stream is already going away.
                if !matches!(
                    e,
                    Error::FrameTooLarge { .. } | Error::Cancelled | Error::NotConnected
                ) {
                    self.shared.lose_stream(&e);
                }
                Err(e)
            }
        }
    }

    pub fn subscribe(&self) -> crate::events::EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn metrics(&self) -> Arc<LinkMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Wait until the status leaves `Connected` (or the link is stopped).
    pub async fn wait_for_disconnection(&self) {
        self.shared.status.wait_for_disconnection().await;
    }

    pub(crate) fn report_frame_mismatch(&self, expected: usize, actual: usize) {
        self.shared.report_frame_mismatch(expected, actual);
    }
}

impl Shared {
    fn cancel_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(cancel) => cancel.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn write(&self, payload: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(Error::NotConnected);
        };
        w.write_frame(payload).await
    }

    fn report_frame_mismatch(&self, expected: usize, actual: usize) {
        self.metrics.record_frame_mismatch();
        self.events.send(LinkEvent::FrameSizeMismatch {
            link: self.link.clone(),
            expected,
            actual,
        });
    }

    async fn resolve_target(&self) -> Result<RemoteDeviceRef> {
        let bonded = match self.transport.bonded_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Could not list bonded devices: {}", e);
                Vec::new()
            }
        };
        resolve_remote(&self.identity, &bonded).ok_or_else(|| {
            Error::invalid_config(format!(
                "no bonded device named '{}' and no remote address configured",
                self.identity.remote_name()
            ))
        })
    }

    /// Open one session. `Ok(None)` means the attempt was cancelled.
    async fn open(&self, cancel: &CancellationToken) -> Result<Option<SessionStream>> {
        match self.identity.role() {
            Role::Server => {
                let mut listener = tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    listener = self.transport.listen(&self.identity) => listener?,
                };
                debug!(session = self.identity.session_name(), "Listening");
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => None,
                    stream = listener.accept() => Some(stream),
                };
                if let Err(e) = listener.close().await {
                    debug!("Closing listener failed: {}", e);
                }
                accepted.transpose()
            }
            Role::Client => {
                let target = self.resolve_target().await?;
                debug!(address = %target.address, "Dialing");
                let mut stream = tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    stream = self.transport.connect(&target.address, &self.identity) => stream?,
                };
                if stream.peer.name.is_none() {
                    stream.peer.name = target.name;
                }
                Ok(Some(stream))
            }
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let policy = self.options.reconnect.clone();
        let mut failures: u32 = 0;
        let mut flaps: u32 = 0;
        let mut ever_connected = false;

        while !self.status.is_terminated() && !cancel.is_cancelled() {
            self.status.transition(ConnectionStatus::Connecting);
            if ever_connected {
                self.events.send(LinkEvent::ReconnectStarted {
                    link: self.link.clone(),
                    attempt: failures + 1,
                });
            }

            let started = Instant::now();
            match self.open(&cancel).await {
                Ok(None) => break,
                Ok(Some(stream)) => {
                    self.metrics.connect.record_success(started.elapsed());
                    if ever_connected {
                        self.metrics.reconnects.record_success(started.elapsed());
                        self.events.send(LinkEvent::ReconnectSucceeded {
                            link: self.link.clone(),
                            attempts: failures + 1,
                        });
                    }
                    failures = 0;
                    ever_connected = true;

                    let connected_at = Instant::now();
                    self.serve(stream, &cancel).await;
                    if connected_at.elapsed() >= STABLE_SESSION {
                        flaps = 0;
                        continue;
                    }
                    // A peer that accepts and hangs up at once gets the same
                    // backoff as one that refuses.
                    flaps = flaps.saturating_add(1);
                    debug!(link = %self.link, flaps, "Session ended right after opening");
                    if !self.pause(policy.delay_for_attempt(flaps - 1), &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    self.metrics.connect.record_failure(started.elapsed());
                    if ever_connected {
                        self.metrics.reconnects.record_failure(started.elapsed());
                    }
                    failures = failures.saturating_add(1);
                    warn!(link = %self.link, attempt = failures, "Session open failed: {}", e);
                    self.events.send(LinkEvent::Error {
                        link: self.link.clone(),
                        error: e.to_string(),
                    });

                    if !e.is_transient() {
                        warn!(link = %self.link, "Not retrying: {}", e);
                        self.status.exhaust(failures);
                        break;
                    }
                    if !policy.allows_attempt(failures) {
                        warn!(link = %self.link, "Giving up after {} attempts", failures);
                        self.status.exhaust(failures);
                        break;
                    }

                    let delay = policy.delay_for_attempt(failures - 1);
                    if !self.pause(delay, &cancel).await {
                        break;
                    }
                }
            }
        }

        self.status.mark_disconnected();
        debug!(link = %self.link, "Session worker stopped");
    }

    /// Sleep between attempts. Returns `false` if cancelled.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return !cancel.is_cancelled();
        }
        debug!(link = %self.link, ?delay, "Waiting before next attempt");
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Run one connected period: attach the stream, wait for it to drop,
    /// detach.
    async fn serve(self: &Arc<Self>, stream: SessionStream, cancel: &CancellationToken) {
        let SessionStream { peer, io } = stream;
        let (read_half, write_half) = tokio::io::split(io);
        let max = self.options.max_frame_size;

        *self.writer.lock().await = Some(FrameWriter::new(write_half, max));
        self.latest.send_replace(None);
        self.peer.send_replace(Some(peer.clone()));

        let reader_cancel = cancel.child_token();
        let reader = tokio::spawn(
            Arc::clone(self).pump(FrameReader::new(read_half, max), reader_cancel.clone()),
        );

        if self.status.transition(ConnectionStatus::Connected) {
            info!(link = %self.link, %peer, "Session connected");
            self.metrics.set_connected(true);
            self.events.send(LinkEvent::Connected {
                link: self.link.clone(),
                peer,
            });

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.status.wait_for_disconnection() => {}
            }
            self.metrics.set_connected(false);
        }

        reader_cancel.cancel();
        let _ = reader.await;
        // Any send still in progress has been abandoned by now, so the lock
        // is free.
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Closing session stream failed: {}", e),
                Err(_) => debug!("Closing session stream timed out"),
            }
        }
        self.peer.send_replace(None);
        self.latest.send_replace(None);
        debug!(link = %self.link, "Session stream closed");
    }

    /// Publish incoming frames until the stream ends or the connection is
    /// torn down.
    async fn pump(
        self: Arc<Self>,
        mut reader: FrameReader<ReadHalf<Box<dyn SessionIo>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let started = Instant::now();
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = reader.read_frame() => next,
            };
            match next {
                Ok(Some(frame)) => {
                    self.metrics.reads.record_success(started.elapsed());
                    self.metrics.record_bytes_read(frame.len() as u64);
                    self.latest.send_replace(Some(frame));
                }
                Ok(None) => {
                    self.lose_stream(&Error::NotConnected);
                    return;
                }
                Err(Error::FrameTooLarge { limit, actual }) => {
                    // Skipped whole; the stream is still aligned. Drop the held
                    // frame so the next sample fails instead of repeating it.
                    self.metrics.reads.record_failure(started.elapsed());
                    debug!(link = %self.link, limit, actual, "Discarded oversized frame");
                    self.latest.send_replace(None);
                    self.report_frame_mismatch(limit, actual);
                }
                Err(e) => {
                    self.metrics.reads.record_failure(started.elapsed());
                    self.lose_stream(&e);
                    return;
                }
            }
        }
    }

    fn lose_stream(&self, cause: &Error) {
        if self.status.mark_disconnected() {
            info!(link = %self.link, "Session stream lost: {}", cause);
            self.events.send(LinkEvent::Disconnected {
                link: self.link.clone(),
                reason: DisconnectReason::StreamClosed,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSessionHub;

    fn fast() -> SessionOptions {
        SessionOptions::default().reconnect(ReconnectOptions::fixed_delay(Duration::from_millis(5)))
    }

    #[test]
    fn test_options_validate() {
        assert!(SessionOptions::default().validate().is_ok());
        assert!(SessionOptions::default().max_frame_size(0).validate().is_err());
        assert!(SessionOptions::default().event_capacity(0).validate().is_err());
    }

    #[test]
    fn test_empty_session_name_rejected() {
        let hub = MockSessionHub::new();
        let err = SessionLink::new(LinkIdentity::server(""), hub.transport(), fast()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_unresolvable_client_is_hard_error() {
        let hub = MockSessionHub::new();
        let link = SessionLink::new(LinkIdentity::client("s", "Nobody"), hub.transport(), fast()).unwrap();
        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(link.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let hub = MockSessionHub::new();
        let link = SessionLink::new(LinkIdentity::server("s"), hub.transport(), fast()).unwrap();
        link.disconnect().await;
        link.disconnect().await;
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_send_frame_requires_connection() {
        let hub = MockSessionHub::new();
        let link = SessionLink::new(LinkIdentity::server("s"), hub.transport(), fast()).unwrap();
        assert!(matches!(link.send_frame(b"x").await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_with_presence_after_clone_fails() {
        let hub = MockSessionHub::new();
        let link = SessionLink::new(LinkIdentity::server("s"), hub.transport(), fast()).unwrap();
        let _other = link.clone();
        assert!(link.with_presence(hub.presence()).is_err());
    }
}
