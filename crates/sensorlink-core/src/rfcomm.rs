//! Classic RFCOMM sessions on BlueZ via `bluer`.
//!
//! Session names map to RFCOMM channels. Both ends of a session must agree
//! on the mapping; unmapped names use the default channel.

use std::collections::HashMap;

use async_trait::async_trait;
use bluer::rfcomm::{Listener, SocketAddr, Stream};
use bluer::{Address, DeviceEvent, DeviceProperty};
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};

use sensorlink_types::{LinkIdentity, RemoteDeviceRef};

use crate::error::{Error, Result};
use crate::presence::{PresenceEvent, PresenceSource};
use crate::transport::{BondedDevice, SessionListener, SessionStream, SessionTransport};

/// Channel used for session names without an explicit mapping.
pub const DEFAULT_CHANNEL: u8 = 1;

/// [`SessionTransport`] and [`PresenceSource`] over BlueZ RFCOMM sockets.
pub struct RfcommTransport {
    _session: bluer::Session,
    adapter: bluer::Adapter,
    channels: HashMap<String, u8>,
    default_channel: u8,
}

impl std::fmt::Debug for RfcommTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RfcommTransport")
            .field("adapter", &self.adapter.name())
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl RfcommTransport {
    /// Open a BlueZ session on the default adapter and power it on.
    pub async fn new() -> Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        if !adapter.is_powered().await.unwrap_or(false) {
            adapter.set_powered(true).await?;
        }
        info!(adapter = adapter.name(), "BlueZ adapter ready");
        Ok(Self {
            _session: session,
            adapter,
            channels: HashMap::new(),
            default_channel: DEFAULT_CHANNEL,
        })
    }

    /// Map `session_name` to an RFCOMM channel (1-30).
    #[must_use]
    pub fn with_channel(mut self, session_name: impl Into<String>, channel: u8) -> Self {
        self.channels.insert(session_name.into(), channel);
        self
    }

    #[must_use]
    pub fn default_channel(mut self, channel: u8) -> Self {
        self.default_channel = channel;
        self
    }

    pub fn channel_for(&self, session_name: &str) -> u8 {
        self.channels
            .get(session_name)
            .copied()
            .unwrap_or(self.default_channel)
    }

    async fn paired(&self) -> Result<Vec<(Address, bluer::Device)>> {
        let mut paired = Vec::new();
        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            if device.is_paired().await.unwrap_or(false) {
                paired.push((address, device));
            }
        }
        Ok(paired)
    }
}

fn parse_address(address: &str) -> Result<Address> {
    address
        .parse()
        .map_err(|_| Error::invalid_config(format!("'{address}' is not a Bluetooth address")))
}

struct RfcommListener {
    listener: Option<Listener>,
}

#[async_trait]
impl SessionListener for RfcommListener {
    async fn accept(&mut self) -> Result<SessionStream> {
        let listener = self.listener.as_ref().ok_or(Error::NotConnected)?;
        let (stream, peer) = listener.accept().await?;
        debug!(peer = %peer.addr, channel = peer.channel, "Accepted RFCOMM session");
        Ok(SessionStream::new(
            RemoteDeviceRef::new(peer.addr.to_string()),
            stream,
        ))
    }

    async fn close(&mut self) -> Result<()> {
        self.listener = None;
        Ok(())
    }
}

#[async_trait]
impl SessionTransport for RfcommTransport {
    async fn bonded_devices(&self) -> Result<Vec<BondedDevice>> {
        let mut bonded = Vec::new();
        for (address, device) in self.paired().await? {
            let name = device.name().await.ok().flatten();
            bonded.push(BondedDevice::new(address.to_string(), name));
        }
        Ok(bonded)
    }

    async fn listen(&self, identity: &LinkIdentity) -> Result<Box<dyn SessionListener>> {
        let channel = self.channel_for(identity.session_name());
        let listener = Listener::bind(SocketAddr::new(Address::any(), channel)).await?;
        debug!(session = identity.session_name(), channel, "RFCOMM listening");
        Ok(Box::new(RfcommListener {
            listener: Some(listener),
        }))
    }

    async fn connect(&self, address: &str, identity: &LinkIdentity) -> Result<SessionStream> {
        let target = parse_address(address)?;
        let channel = self.channel_for(identity.session_name());
        let stream = Stream::connect(SocketAddr::new(target, channel)).await?;
        debug!(%target, channel, "RFCOMM connected");
        Ok(SessionStream::new(RemoteDeviceRef::new(target.to_string()), stream))
    }
}

#[async_trait]
impl PresenceSource for RfcommTransport {
    /// Connection changes of every paired device.
    async fn subscribe(&self) -> Result<BoxStream<'static, PresenceEvent>> {
        let mut streams = Vec::new();
        for (address, device) in self.paired().await? {
            let address = address.to_string();
            let events = device.events().await?;
            streams.push(
                events
                    .filter_map(move |event| {
                        let address = address.clone();
                        async move {
                            match event {
                                DeviceEvent::PropertyChanged(DeviceProperty::Connected(true)) => {
                                    Some(PresenceEvent::connected(address))
                                }
                                DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) => {
                                    Some(PresenceEvent::disconnected(address))
                                }
                                _ => None,
                            }
                        }
                    })
                    .boxed(),
            );
        }
        Ok(stream::select_all(streams).boxed())
    }
}
