//! Callback-driven attribute-subscription link.
//!
//! An [`AttributeLink`] pairs an [`AttributeMachine`] with one driver task.
//! User calls and host-stack callbacks both go through the machine under a
//! short synchronous lock; every command the machine produces is executed by
//! the driver, so backend calls are never concurrent and the caller is never
//! suspended on the hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sensorlink_types::{ConnectionStatus, DescriptorRegistry, RemoteDeviceRef};

use crate::backend::{AttributeBackend, AttributeEvent, AttributeEventReceiver};
use crate::channel::AttributeChannel;
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventDispatcher, EventReceiver, LinkEvent, LinkId};
use crate::machine::{Action, AttributeMachine, Phase};
use crate::metrics::LinkMetrics;
use crate::reconnect::ReconnectOptions;
use crate::status::{LinkState, StatusCell};

/// Tuning for an [`AttributeLink`].
#[derive(Debug, Clone)]
pub struct AttributeLinkOptions {
    /// How long `disconnect()` waits for disable requests before forcing the
    /// release.
    pub teardown_timeout: Duration,
    /// Reconnect after an unexpected loss. `None` leaves the link
    /// disconnected until `connect()` is called again.
    pub reconnect: Option<ReconnectOptions>,
    pub event_capacity: usize,
}

impl Default for AttributeLinkOptions {
    fn default() -> Self {
        Self {
            teardown_timeout: Duration::from_secs(2),
            reconnect: Some(ReconnectOptions::default()),
            event_capacity: 100,
        }
    }
}

impl AttributeLinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    #[must_use]
    pub fn no_reconnect(mut self) -> Self {
        self.reconnect = None;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(reconnect) = &self.reconnect {
            reconnect.validate()?;
        }
        if self.teardown_timeout.is_zero() {
            return Err(Error::invalid_config("teardown_timeout must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}

enum Work {
    Run(Vec<Action>),
    Reconnect { address: String },
}

struct Shared {
    link: LinkId,
    backend: Arc<dyn AttributeBackend>,
    options: AttributeLinkOptions,
    machine: StdMutex<AttributeMachine>,
    status: Arc<StatusCell>,
    ready: watch::Sender<bool>,
    /// Bumped every time the driver has released the connection.
    releases: watch::Sender<u64>,
    /// The user wants the link up; cleared by `disconnect()`.
    wanted: AtomicBool,
    events: EventDispatcher,
    metrics: Arc<LinkMetrics>,
    work: mpsc::UnboundedSender<Work>,
}

/// A link that subscribes to attribute notifications on one remote device
/// and caches their latest decoded values.
///
/// Cloning is cheap. The driver task stops once every clone is dropped.
#[derive(Clone)]
pub struct AttributeLink {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AttributeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeLink")
            .field("link", &self.shared.link)
            .field("status", &self.shared.status.status())
            .finish_non_exhaustive()
    }
}

impl AttributeLink {
    /// Create a link and start its driver task.
    ///
    /// `callbacks` must be the receiving end of the channel `backend` reports
    /// to. Must be called from within a Tokio runtime.
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn AttributeBackend>,
        callbacks: AttributeEventReceiver,
        registry: Arc<DescriptorRegistry>,
        options: AttributeLinkOptions,
    ) -> Result<Self> {
        options.validate()?;
        let link = LinkId::attribute(name);
        let events = EventDispatcher::new(options.event_capacity);
        let status = Arc::new(StatusCell::new(link.clone(), events.clone()));
        let (ready, _) = watch::channel(false);
        let (releases, _) = watch::channel(0);
        let (work, work_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            link,
            backend,
            options,
            machine: StdMutex::new(AttributeMachine::new(registry)),
            status,
            ready,
            releases,
            wanted: AtomicBool::new(false),
            events,
            metrics: LinkMetrics::shared(),
            work,
        });

        let driver = Driver {
            shared: Arc::downgrade(&shared),
            attempts: 0,
            opened_at: None,
        };
        tokio::spawn(driver.run(callbacks, work_rx));

        Ok(Self { shared })
    }

    pub fn link_id(&self) -> &LinkId {
        &self.shared.link
    }

    /// Start connecting to `address` and return immediately.
    ///
    /// Status becomes `Connecting` before this returns. Poll
    /// [`is_connected`](Self::is_connected) or watch
    /// [`state_watch`](Self::state_watch) for progress.
    pub fn connect(&self, address: &str) -> Result<()> {
        if address.trim().is_empty() {
            return Err(Error::invalid_config("device address must not be empty"));
        }
        self.shared.wanted.store(true, Ordering::SeqCst);
        self.shared.status.revive();
        let actions = self.shared.step(|m| m.connect(address));
        if !actions.is_empty() {
            info!(link = %self.shared.link, address, "Connecting attribute link");
        }
        self.shared.submit(actions);
        Ok(())
    }

    /// Disable every subscription, then release the connection.
    ///
    /// Waits at most the teardown timeout for the peer to acknowledge,
    /// then releases anyway. Tasks parked in
    /// [`wait_until_ready`](Self::wait_until_ready) are released at once.
    /// Safe to call any number of times.
    pub async fn disconnect(&self) {
        self.shared.wanted.store(false, Ordering::SeqCst);
        self.shared.status.terminate();
        self.shared.metrics.set_connected(false);
        let mut releases = self.shared.releases.subscribe();

        let (actions, phase) = self.shared.step(|m| (m.disconnect(), m.phase()));
        if actions.is_empty() && phase != Phase::Closing {
            return;
        }
        self.shared.submit(actions);

        let timeout = self.shared.options.teardown_timeout;
        if tokio::time::timeout(timeout, releases.changed()).await.is_err() {
            warn!(link = %self.shared.link, ?timeout, "Teardown timed out, forcing release");
            let actions = self.shared.step(|m| m.force_release());
            self.shared.submit(actions);
            let _ = tokio::time::timeout(timeout, releases.changed()).await;
        }

        info!(link = %self.shared.link, "Attribute link disconnected");
        self.shared.events.send(LinkEvent::Disconnected {
            link: self.shared.link.clone(),
            reason: DisconnectReason::UserRequested,
        });
    }

    /// `Connected`, which includes discovery and subscription. Never blocks.
    pub fn is_connected(&self) -> bool {
        self.shared.status.is_connected()
    }

    /// Connected and every queued request has completed.
    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.status()
    }

    pub fn state_watch(&self) -> watch::Receiver<LinkState> {
        self.shared.status.subscribe()
    }

    pub fn ready_watch(&self) -> watch::Receiver<bool> {
        self.shared.ready.subscribe()
    }

    /// Wait until the link is ready.
    ///
    /// Returns [`Error::Cancelled`] if [`disconnect`](Self::disconnect) runs
    /// first, or [`Error::ReconnectExhausted`] if recovery gave up.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let mut ready = self.shared.ready.subscribe();
        let mut state = self.shared.status.subscribe();
        loop {
            if *ready.borrow_and_update() {
                return Ok(());
            }
            let LinkState {
                terminated,
                exhausted_after,
                ..
            } = *state.borrow_and_update();
            if let Some(attempts) = exhausted_after {
                return Err(Error::ReconnectExhausted { attempts });
            }
            if terminated {
                return Err(Error::Cancelled);
            }
            tokio::select! {
                changed = ready.changed() => changed.map_err(|_| Error::Cancelled)?,
                changed = state.changed() => changed.map_err(|_| Error::Cancelled)?,
            }
        }
    }

    /// Register `attribute` and return a channel reading its cached value.
    ///
    /// Works before `connect()`; the attribute is subscribed as soon as
    /// discovery finds it.
    pub fn observe(&self, attribute: Uuid) -> AttributeChannel {
        let (value, actions) = self.shared.step(|m| m.register(attribute));
        self.shared.submit(actions);
        AttributeChannel::new(attribute, value)
    }

    /// Like [`observe`](Self::observe), by descriptor name, UUID string or
    /// 16-bit short form.
    pub fn observe_named(&self, reference: &str) -> Result<AttributeChannel> {
        let attribute = self.shared.step(|m| m.registry().resolve(reference))?;
        Ok(self.observe(attribute))
    }

    /// Stop tracking `attribute`.
    pub fn forget(&self, attribute: &Uuid) {
        let actions = self.shared.step(|m| m.unregister(attribute));
        self.shared.submit(actions);
    }

    /// `(issued, completed)` configuration requests so far.
    pub fn request_counts(&self) -> (u64, u64) {
        let machine = self.shared.machine();
        (machine.queue().issued(), machine.queue().completed())
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn metrics(&self) -> Arc<LinkMetrics> {
        Arc::clone(&self.shared.metrics)
    }
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, AttributeMachine> {
        self.machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one machine handler and publish the resulting status.
    fn step<T>(&self, f: impl FnOnce(&mut AttributeMachine) -> T) -> T {
        let mut machine = self.machine();
        let out = f(&mut machine);
        self.publish(&machine);
        out
    }

    fn publish(&self, machine: &AttributeMachine) {
        let target = machine.status();
        let current = self.status.status();
        if current != target {
            if current == ConnectionStatus::Disconnected && target == ConnectionStatus::Connected {
                self.status.transition(ConnectionStatus::Connecting);
            }
            self.status.transition(target);

            if target == ConnectionStatus::Connected {
                self.metrics.set_connected(true);
                let address = machine.address().unwrap_or_default();
                info!(link = %self.link, address, "Attribute link connected");
                self.events.send(LinkEvent::Connected {
                    link: self.link.clone(),
                    peer: RemoteDeviceRef::new(address),
                });
            } else if current == ConnectionStatus::Connected {
                self.metrics.set_connected(false);
            }
        }

        let ready = machine.is_ready();
        self.ready.send_if_modified(|r| {
            let changed = *r != ready;
            *r = ready;
            changed
        });
    }

    fn submit(&self, actions: Vec<Action>) {
        if !actions.is_empty() {
            let _ = self.work.send(Work::Run(actions));
        }
    }

    fn on_callback(&self, event: AttributeEvent) -> Vec<Action> {
        match event {
            AttributeEvent::Connected => self.step(|m| m.on_connected()),
            AttributeEvent::Disconnected => self.step(|m| m.on_disconnected()),
            AttributeEvent::AttributesDiscovered(found) => {
                debug!(link = %self.link, count = found.len(), "Attributes discovered");
                self.step(|m| m.on_discovered(&found))
            }
            AttributeEvent::OperationComplete { attribute, success } => {
                self.step(|m| m.on_operation_complete(attribute, success))
            }
            AttributeEvent::ValueChanged { attribute, value } => {
                self.metrics.record_bytes_read(value.len() as u64);
                debug!(link = %self.link, %attribute, len = value.len(), "Value changed");
                self.step(|m| m.on_value(attribute, &value))
            }
        }
    }

    fn report(&self, error: &Error) {
        self.events.send(LinkEvent::Error {
            link: self.link.clone(),
            error: error.to_string(),
        });
    }
}

/// Executes machine commands. Owns the reconnect bookkeeping.
struct Driver {
    shared: Weak<Shared>,
    attempts: u32,
    opened_at: Option<Instant>,
}

impl Driver {
    async fn run(
        mut self,
        mut callbacks: AttributeEventReceiver,
        mut work: mpsc::UnboundedReceiver<Work>,
    ) {
        loop {
            let next = tokio::select! {
                Some(job) = work.recv() => Ok(job),
                Some(event) = callbacks.recv() => Err(event),
                else => break,
            };
            let Some(shared) = self.shared.upgrade() else {
                break;
            };

            let actions = match next {
                Ok(Work::Run(actions)) => actions,
                Ok(Work::Reconnect { address }) => {
                    if !shared.wanted.load(Ordering::SeqCst) {
                        continue;
                    }
                    debug!(link = %shared.link, attempt = self.attempts, "Reconnecting");
                    shared.step(|m| m.connect(&address))
                }
                Err(event) => {
                    let connected = matches!(event, AttributeEvent::Connected);
                    let actions = shared.on_callback(event);
                    if connected && shared.status.is_connected() {
                        self.record_connected(&shared);
                    }
                    actions
                }
            };
            self.execute(&shared, actions).await;
        }
        debug!("Attribute link driver stopped");
    }

    async fn execute(&mut self, shared: &Arc<Shared>, actions: Vec<Action>) {
        let link = &shared.link;
        let mut queue: VecDeque<Action> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Open { address, reuse } => {
                    debug!(%link, %address, reuse, "Opening connection");
                    self.opened_at.get_or_insert_with(Instant::now);
                    if let Err(e) = shared.backend.open(&address, reuse).await {
                        warn!(%link, %address, "Open failed: {}", e);
                        shared.report(&e);
                        queue.extend(shared.step(|m| m.on_disconnected()));
                    }
                }
                Action::Discover => {
                    if let Err(e) = shared.backend.discover().await {
                        warn!(%link, "Discovery failed: {}", e);
                        shared.report(&e);
                        queue.push_back(Action::Release);
                        queue.extend(shared.step(|m| m.on_disconnected()));
                    }
                }
                Action::Issue { request, handle } => {
                    debug!(%link, kind = ?request.kind, attribute = %request.attribute, %handle, "Issuing request");
                    shared.metrics.record_request_issued();
                    shared.events.send(LinkEvent::RequestIssued {
                        link: link.clone(),
                        kind: request.kind,
                        attribute: request.attribute,
                    });
                    if let Err(e) = shared
                        .backend
                        .configure_notifications(handle, request.attribute, request.kind.enables())
                        .await
                    {
                        warn!(%link, attribute = %request.attribute, "Request rejected: {}", e);
                        queue.extend(
                            shared.step(|m| m.on_operation_complete(request.attribute, false)),
                        );
                    }
                }
                Action::Release => {
                    if let Err(e) = shared.backend.release().await {
                        warn!(%link, "Release failed: {}", e);
                    }
                    shared.releases.send_modify(|n| *n += 1);
                    debug!(%link, "Connection released");
                }
                Action::Completed { request, success } => {
                    shared.metrics.record_request_completed();
                    shared.events.send(LinkEvent::RequestCompleted {
                        link: link.clone(),
                        kind: request.kind,
                        attribute: request.attribute,
                        success,
                    });
                }
                Action::Ready { subscribed } => {
                    info!(%link, subscribed, "Attribute link ready");
                    shared.events.send(LinkEvent::AttributesReady {
                        link: link.clone(),
                        subscribed,
                    });
                }
                Action::Malformed { attribute, len } => {
                    debug!(%link, %attribute, len, "Malformed payload");
                    shared.metrics.record_malformed_payload();
                    shared.events.send(LinkEvent::MalformedPayload {
                        link: link.clone(),
                        attribute,
                        len,
                    });
                }
                Action::Lost {
                    address,
                    was_connected,
                } => {
                    if let Some(started) = self.opened_at.take() {
                        shared.metrics.connect.record_failure(started.elapsed());
                        if self.attempts > 0 {
                            shared.metrics.reconnects.record_failure(started.elapsed());
                        }
                    }
                    if was_connected {
                        info!(%link, %address, "Attribute link lost");
                        shared.events.send(LinkEvent::Disconnected {
                            link: link.clone(),
                            reason: DisconnectReason::PeerLost,
                        });
                    }
                    self.schedule_reconnect(shared, address);
                }
            }
        }
    }

    fn record_connected(&mut self, shared: &Shared) {
        let elapsed = self.opened_at.take().map(|t| t.elapsed()).unwrap_or_default();
        shared.metrics.connect.record_success(elapsed);
        if self.attempts > 0 {
            shared.metrics.reconnects.record_success(elapsed);
            shared.events.send(LinkEvent::ReconnectSucceeded {
                link: shared.link.clone(),
                attempts: self.attempts,
            });
            self.attempts = 0;
        }
    }

    fn schedule_reconnect(&mut self, shared: &Shared, address: String) {
        let Some(policy) = &shared.options.reconnect else {
            return;
        };
        if !shared.wanted.load(Ordering::SeqCst) {
            return;
        }
        if !policy.allows_attempt(self.attempts) {
            warn!(link = %shared.link, "Giving up after {} attempts", self.attempts);
            shared.report(&Error::ReconnectExhausted {
                attempts: self.attempts,
            });
            shared.status.exhaust(self.attempts);
            self.attempts = 0;
            return;
        }

        let delay = policy.delay_for_attempt(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        shared.events.send(LinkEvent::ReconnectStarted {
            link: shared.link.clone(),
            attempt: self.attempts,
        });
        debug!(link = %shared.link, ?delay, attempt = self.attempts, "Scheduling reconnect");

        let work = shared.work.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = work.send(Work::Reconnect { address });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAttributeBackend, MockOperation};
    use sensorlink_types::AttributeValue;
    use sensorlink_types::uuids::{BATTERY_LEVEL, TEMPERATURE};

    fn link_with(
        builder: crate::mock::MockAttributeBackendBuilder,
        options: AttributeLinkOptions,
    ) -> (AttributeLink, Arc<MockAttributeBackend>) {
        let (backend, callbacks) = builder.build();
        let backend = Arc::new(backend);
        let link = AttributeLink::new(
            "sensor",
            backend.clone(),
            callbacks,
            Arc::new(DescriptorRegistry::standard()),
            options,
        )
        .unwrap();
        (link, backend)
    }

    async fn eventually(mut f: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !f() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_options_validate() {
        assert!(AttributeLinkOptions::default().validate().is_ok());
        assert!(
            AttributeLinkOptions::default()
                .teardown_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(AttributeLinkOptions::default().no_reconnect().validate().is_ok());
    }

    #[tokio::test]
    async fn test_connect_returns_immediately_as_connecting() {
        let (link, _backend) = link_with(
            MockAttributeBackend::builder().auto_connect(false),
            AttributeLinkOptions::default(),
        );
        link.connect("AA:BB").unwrap();
        assert_eq!(link.status(), ConnectionStatus::Connecting);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_empty_address_rejected() {
        let (link, _backend) = link_with(MockAttributeBackend::builder(), AttributeLinkOptions::default());
        assert!(matches!(link.connect(" "), Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_full_lifecycle_with_auto_backend() {
        let (link, backend) = link_with(
            MockAttributeBackend::builder()
                .attribute(BATTERY_LEVEL)
                .attribute(TEMPERATURE),
            AttributeLinkOptions::default(),
        );
        let battery = link.observe(BATTERY_LEVEL);
        link.connect("AA:BB").unwrap();
        tokio::time::timeout(Duration::from_secs(2), link.wait_until_ready())
            .await
            .unwrap()
            .unwrap();
        assert!(link.is_connected());

        backend.notify(BATTERY_LEVEL, &[0x32]);
        eventually(|| battery.sample().is_some()).await;
        assert_eq!(battery.sample(), Some(AttributeValue::Integer(50)));

        link.disconnect().await;
        assert_eq!(link.status(), ConnectionStatus::Disconnected);
        let (issued, completed) = link.request_counts();
        assert_eq!(issued, completed);
        assert!(backend.operations().contains(&MockOperation::Release));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (link, _backend) = link_with(MockAttributeBackend::builder(), AttributeLinkOptions::default());
        link.disconnect().await;
        link.connect("AA:BB").unwrap();
        link.wait_until_ready().await.unwrap();
        link.disconnect().await;
        link.disconnect().await;
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_teardown_forces_release_on_timeout() {
        let (link, backend) = link_with(
            MockAttributeBackend::builder()
                .attribute(BATTERY_LEVEL)
                .auto_complete(false),
            AttributeLinkOptions::default().teardown_timeout(Duration::from_millis(50)),
        );
        let _battery = link.observe(BATTERY_LEVEL);
        link.connect("AA:BB").unwrap();
        backend.wait_for_operations(3).await;
        // Enable is in flight and never completes.
        link.disconnect().await;
        assert_eq!(link.status(), ConnectionStatus::Disconnected);
        assert!(backend.operations().contains(&MockOperation::Release));
        let (issued, completed) = link.request_counts();
        assert_eq!(issued, completed);
    }

    #[tokio::test]
    async fn test_unexpected_loss_reconnects() {
        let (link, backend) = link_with(
            MockAttributeBackend::builder().attribute(BATTERY_LEVEL),
            AttributeLinkOptions::default()
                .reconnect(ReconnectOptions::fixed_delay(Duration::from_millis(5))),
        );
        let _battery = link.observe(BATTERY_LEVEL);
        link.connect("AA:BB").unwrap();
        link.wait_until_ready().await.unwrap();

        let mut events = link.subscribe();
        backend.drop_connection();
        let attempts = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(LinkEvent::ReconnectSucceeded { attempts, .. }) = events.recv().await {
                    break attempts;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(attempts, 1);

        tokio::time::timeout(Duration::from_secs(2), link.wait_until_ready())
            .await
            .unwrap()
            .unwrap();
        assert!(link.is_connected());
        link.disconnect().await;
    }

    #[tokio::test]
    async fn test_loss_without_reconnect_stays_down() {
        let (link, backend) = link_with(
            MockAttributeBackend::builder(),
            AttributeLinkOptions::default().no_reconnect(),
        );
        link.connect("AA:BB").unwrap();
        link.wait_until_ready().await.unwrap();
        backend.drop_connection();
        eventually(|| link.status() == ConnectionStatus::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(link.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_wait_until_ready_fails_once_stopped() {
        let (link, _backend) = link_with(MockAttributeBackend::builder(), AttributeLinkOptions::default());
        link.connect("AA:BB").unwrap();
        link.wait_until_ready().await.unwrap();
        link.disconnect().await;
        assert!(matches!(link.wait_until_ready().await, Err(Error::Cancelled)));

        link.connect("AA:BB").unwrap();
        link.wait_until_ready().await.unwrap();
        link.disconnect().await;
    }

    #[tokio::test]
    async fn test_observe_named() {
        let (link, _backend) = link_with(MockAttributeBackend::builder(), AttributeLinkOptions::default());
        let channel = link.observe_named("battery-level").unwrap();
        assert_eq!(channel.attribute(), BATTERY_LEVEL);
        assert!(link.observe_named("no-such-thing").is_err());
    }
}
