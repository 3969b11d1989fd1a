//! Attribute backend and presence source on `btleplug`.
//!
//! Every backend call spawns the real BLE work and returns right away; the
//! outcome is reported on the link's callback channel. That keeps the link's
//! driver free to handle teardown while a slow connect is still running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    AttributeBackend, AttributeEvent, AttributeEventSender, AttributeHandle, DiscoveredAttribute,
};
use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::presence::{PresenceEvent, PresenceKind, PresenceSource};

/// Default timeout for establishing a BLE connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for one subscribe/unsubscribe write.
pub const DEFAULT_CONFIGURE_TIMEOUT: Duration = Duration::from_secs(10);

const ZERO_ADDRESS: &str = "00:00:00:00:00:00";
const SCAN_ATTEMPTS: u32 = 3;

/// Timeouts and scan behavior for [`BtleplugBackend`].
#[derive(Debug, Clone)]
pub struct BtleConfig {
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub configure_timeout: Duration,
    /// Base scan duration when the device is not yet known to the adapter.
    pub scan_duration: Duration,
}

impl Default for BtleConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            configure_timeout: DEFAULT_CONFIGURE_TIMEOUT,
            scan_duration: Duration::from_secs(4),
        }
    }
}

impl BtleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Format a peripheral ID as a string.
///
/// On macOS peripheral IDs are UUIDs; elsewhere they wrap the device path.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Pick the identifier a peer is known by: its address, or the peripheral
/// ID where the platform hides addresses.
fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == ZERO_ADDRESS {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn identifier_matches(identifier: &str, address: &str, id: &str, name: Option<&str>) -> bool {
    let wanted = identifier.to_lowercase();
    let address = address.to_lowercase();
    if id.to_lowercase().contains(&wanted) {
        return true;
    }
    if address != ZERO_ADDRESS
        && (address == wanted || address.replace(':', "") == wanted.replace(':', ""))
    {
        return true;
    }
    name.is_some_and(|n| n.eq_ignore_ascii_case(identifier))
}

/// Search the adapter's known peripherals for `identifier`.
async fn find_known(adapter: &Adapter, identifier: &str) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        if let Ok(Some(props)) = peripheral.properties().await {
            let id = format_peripheral_id(&peripheral.id());
            if identifier_matches(
                identifier,
                &props.address.to_string(),
                &id,
                props.local_name.as_deref(),
            ) {
                debug!(identifier, %id, "Matched peripheral");
                return Ok(Some(peripheral));
            }
        }
    }
    Ok(None)
}

/// Find a peripheral by address, peripheral ID or exact name, scanning with
/// growing durations if the adapter does not know it yet.
pub async fn find_peripheral(adapter: &Adapter, identifier: &str, scan: Duration) -> Result<Peripheral> {
    if let Some(peripheral) = find_known(adapter, identifier).await? {
        debug!(identifier, "Found device in cache (no scan needed)");
        return Ok(peripheral);
    }

    for attempt in 1..=SCAN_ATTEMPTS {
        let duration = scan * attempt;
        info!(identifier, attempt, ?duration, "Scanning");
        adapter.start_scan(ScanFilter::default()).await?;
        sleep(duration).await;
        adapter.stop_scan().await?;

        if let Some(peripheral) = find_known(adapter, identifier).await? {
            return Ok(peripheral);
        }
    }

    warn!(identifier, "Device not found after {} scans", SCAN_ATTEMPTS);
    Err(Error::device_not_found(identifier))
}

#[derive(Default)]
struct BtleState {
    peripheral: Option<Peripheral>,
    characteristics: HashMap<AttributeHandle, Characteristic>,
    /// Connect attempt, notification pump and disconnect watcher.
    tasks: Vec<JoinHandle<()>>,
}

impl BtleState {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// [`AttributeBackend`] for one BLE peripheral.
pub struct BtleplugBackend {
    adapter: Adapter,
    config: BtleConfig,
    events: AttributeEventSender,
    state: Arc<Mutex<BtleState>>,
}

impl std::fmt::Debug for BtleplugBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BtleplugBackend {
    pub fn new(adapter: Adapter, config: BtleConfig, events: AttributeEventSender) -> Self {
        Self {
            adapter,
            config,
            events,
            state: Arc::new(Mutex::new(BtleState::default())),
        }
    }

    /// Build on the first adapter of the system.
    pub async fn with_default_adapter(config: BtleConfig, events: AttributeEventSender) -> Result<Self> {
        Ok(Self::new(get_adapter().await?, config, events))
    }

    async fn peripheral(&self) -> Result<Peripheral> {
        self.state
            .lock()
            .await
            .peripheral
            .clone()
            .ok_or(Error::NotConnected)
    }
}

/// Spawn the tasks that follow a connected peripheral: notifications in,
/// disconnect reports out.
async fn watch_peripheral(
    adapter: &Adapter,
    peripheral: &Peripheral,
    events: &AttributeEventSender,
) -> Result<Vec<JoinHandle<()>>> {
    let mut notifications = peripheral.notifications().await?;
    let tx = events.clone();
    let pump = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            let _ = tx.send(AttributeEvent::ValueChanged {
                attribute: notification.uuid,
                value: Bytes::from(notification.value),
            });
        }
    });

    let mut central = adapter.events().await?;
    let id = peripheral.id();
    let tx = events.clone();
    let watcher = tokio::spawn(async move {
        while let Some(event) = central.next().await {
            if let CentralEvent::DeviceDisconnected(gone) = event
                && gone == id
            {
                info!(id = %format_peripheral_id(&gone), "Peripheral disconnected");
                let _ = tx.send(AttributeEvent::Disconnected);
                break;
            }
        }
    });

    Ok(vec![pump, watcher])
}

#[async_trait]
impl AttributeBackend for BtleplugBackend {
    async fn open(&self, address: &str, reuse: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if reuse
            && let Some(peripheral) = &state.peripheral
            && peripheral.is_connected().await.unwrap_or(false)
        {
            debug!(address, "Reusing live connection");
            let _ = self.events.send(AttributeEvent::Connected);
            return Ok(());
        }
        state.abort_tasks();
        state.characteristics.clear();
        drop(state);

        let adapter = self.adapter.clone();
        let config = self.config.clone();
        let events = self.events.clone();
        let shared = Arc::clone(&self.state);
        let address = address.to_string();

        let task = tokio::spawn(async move {
            let opened = async {
                let peripheral = find_peripheral(&adapter, &address, config.scan_duration).await?;
                timeout(config.connect_timeout, peripheral.connect())
                    .await
                    .map_err(|_| Error::timeout("connect to device", config.connect_timeout))??;
                let tasks = watch_peripheral(&adapter, &peripheral, &events).await?;
                Ok::<_, Error>((peripheral, tasks))
            }
            .await;

            match opened {
                Ok((peripheral, tasks)) => {
                    let name = peripheral
                        .properties()
                        .await
                        .ok()
                        .flatten()
                        .map(|p| create_identifier(&p.address.to_string(), &peripheral.id()));
                    info!(%address, identifier = ?name, "Connected");
                    let mut state = shared.lock().await;
                    state.peripheral = Some(peripheral);
                    state.tasks.extend(tasks);
                    let _ = events.send(AttributeEvent::Connected);
                }
                Err(e) => {
                    warn!(%address, "Connect failed: {}", e);
                    let _ = events.send(AttributeEvent::Disconnected);
                }
            }
        });
        self.state.lock().await.tasks.push(task);
        Ok(())
    }

    async fn discover(&self) -> Result<()> {
        let peripheral = self.peripheral().await?;
        let config = self.config.clone();
        let events = self.events.clone();
        let shared = Arc::clone(&self.state);

        tokio::spawn(async move {
            let discovered = timeout(config.discovery_timeout, peripheral.discover_services())
                .await
                .map_err(|_| Error::timeout("discover services", config.discovery_timeout))
                .and_then(|r| r.map_err(Error::from));
            if let Err(e) = discovered {
                warn!("Service discovery failed: {}", e);
                let _ = events.send(AttributeEvent::Disconnected);
                return;
            }

            let mut handles = HashMap::new();
            let mut found = Vec::new();
            for (i, characteristic) in peripheral
                .characteristics()
                .into_iter()
                .filter(|c| c.properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE))
                .enumerate()
            {
                let handle = AttributeHandle(i as u32 + 1);
                debug!(uuid = %characteristic.uuid, %handle, "Notifiable characteristic");
                found.push(DiscoveredAttribute {
                    id: characteristic.uuid,
                    handle,
                });
                handles.insert(handle, characteristic);
            }
            shared.lock().await.characteristics = handles;
            let _ = events.send(AttributeEvent::AttributesDiscovered(found));
        });
        Ok(())
    }

    async fn configure_notifications(
        &self,
        handle: AttributeHandle,
        attribute: Uuid,
        enable: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let (peripheral, characteristic) = {
            let peripheral = state.peripheral.clone().ok_or(Error::NotConnected)?;
            let characteristic = state
                .characteristics
                .get(&handle)
                .cloned()
                .ok_or_else(|| Error::attribute_not_found(attribute.to_string(), state.characteristics.len()))?;
            (peripheral, characteristic)
        };
        let limit = self.config.configure_timeout;
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let result = if enable {
                timeout(limit, peripheral.subscribe(&characteristic)).await
            } else {
                timeout(limit, peripheral.unsubscribe(&characteristic)).await
            };
            let success = match result {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(%attribute, enable, "Notification configuration failed: {}", e);
                    false
                }
                Err(_) => {
                    warn!(%attribute, enable, ?limit, "Notification configuration timed out");
                    false
                }
            };
            let _ = events.send(AttributeEvent::OperationComplete { attribute, success });
        });
        // Tracked so release() aborts it; a completion must not outlive the
        // connection it was issued on.
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.push(task);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let peripheral = {
            let mut state = self.state.lock().await;
            state.abort_tasks();
            state.characteristics.clear();
            state.peripheral.take()
        };
        if let Some(peripheral) = peripheral {
            peripheral.disconnect().await?;
            debug!(id = %format_peripheral_id(&peripheral.id()), "Peripheral released");
        }
        Ok(())
    }
}

impl Drop for BtleplugBackend {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_lock() {
            state.abort_tasks();
            if let Some(peripheral) = state.peripheral.take()
                && let Ok(handle) = tokio::runtime::Handle::try_current()
            {
                handle.spawn(async move {
                    if let Err(e) = peripheral.disconnect().await {
                        debug!("Best-effort disconnect failed: {}", e);
                    }
                });
            }
        }
    }
}

/// [`PresenceSource`] over the adapter's central events.
#[derive(Clone)]
pub struct BtleplugPresence {
    adapter: Adapter,
}

impl BtleplugPresence {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl PresenceSource for BtleplugPresence {
    async fn subscribe(&self) -> Result<BoxStream<'static, PresenceEvent>> {
        let central = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        Ok(central
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    let (id, kind) = match event {
                        CentralEvent::DeviceConnected(id) => (id, PresenceKind::Connected),
                        CentralEvent::DeviceDisconnected(id) => (id, PresenceKind::Disconnected),
                        _ => return None,
                    };
                    let address = match adapter.peripheral(&id).await {
                        Ok(peripheral) => match peripheral.properties().await {
                            Ok(Some(props)) => create_identifier(&props.address.to_string(), &id),
                            _ => format_peripheral_id(&id),
                        },
                        Err(_) => format_peripheral_id(&id),
                    };
                    Some(PresenceEvent { address, kind })
                }
            })
            .boxed())
    }
}
