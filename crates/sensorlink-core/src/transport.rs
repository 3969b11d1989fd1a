//! Host-stack seam for classic stream sessions.
//!
//! A [`SessionLink`](crate::SessionLink) only talks to the radio through
//! these traits. The RFCOMM backend implements them over BlueZ sockets;
//! [`MockSessionHub`](crate::mock::MockSessionHub) implements them in memory.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use sensorlink_types::{LinkIdentity, RemoteDeviceRef};

use crate::error::Result;

/// Byte stream of an open session.
pub trait SessionIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SessionIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An open session to a peer.
pub struct SessionStream {
    pub peer: RemoteDeviceRef,
    pub io: Box<dyn SessionIo>,
}

impl SessionStream {
    pub fn new(peer: RemoteDeviceRef, io: impl SessionIo + 'static) -> Self {
        Self {
            peer,
            io: Box::new(io),
        }
    }
}

impl std::fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStream")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// A device the host has already bonded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondedDevice {
    pub address: String,
    pub name: Option<String>,
}

impl BondedDevice {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
        }
    }
}

/// A listening endpoint registered under a session identity.
#[async_trait]
pub trait SessionListener: Send {
    /// Wait for one peer to connect.
    async fn accept(&mut self) -> Result<SessionStream>;

    /// Unregister the endpoint. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// The classic-session side of a host Bluetooth stack.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Devices the host has bonded with.
    async fn bonded_devices(&self) -> Result<Vec<BondedDevice>>;

    /// Register a listening endpoint for `identity`.
    async fn listen(&self, identity: &LinkIdentity) -> Result<Box<dyn SessionListener>>;

    /// Open a session to `address` under `identity`.
    async fn connect(&self, address: &str, identity: &LinkIdentity) -> Result<SessionStream>;
}

/// Pick the address to dial for a client identity.
///
/// A bonded device whose name equals `remote_name` wins; otherwise the
/// literal `remote_address` is used. Returns `None` when neither applies.
pub fn resolve_remote(identity: &LinkIdentity, bonded: &[BondedDevice]) -> Option<RemoteDeviceRef> {
    let wanted = identity.remote_name();
    if !wanted.is_empty()
        && let Some(dev) = bonded
            .iter()
            .find(|d| d.name.as_deref() == Some(wanted))
    {
        return Some(RemoteDeviceRef::new(&dev.address).with_name(wanted));
    }

    identity.remote_address().map(|addr| {
        let known = bonded.iter().find(|d| d.address.eq_ignore_ascii_case(addr));
        match known.and_then(|d| d.name.clone()) {
            Some(name) => RemoteDeviceRef::new(addr).with_name(name),
            None => RemoteDeviceRef::new(addr),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bonded() -> Vec<BondedDevice> {
        vec![
            BondedDevice::new("00:11:22:33:44:55", Some("Headset".into())),
            BondedDevice::new("66:77:88:99:AA:BB", Some("Glove".into())),
            BondedDevice::new("CC:DD:EE:FF:00:11", None),
        ]
    }

    #[test]
    fn test_resolve_prefers_bonded_name() {
        let id = LinkIdentity::client("s", "Glove").with_remote_address("CC:DD:EE:FF:00:11");
        let r = resolve_remote(&id, &bonded()).unwrap();
        assert_eq!(r.address, "66:77:88:99:AA:BB");
        assert_eq!(r.name.as_deref(), Some("Glove"));
    }

    #[test]
    fn test_resolve_falls_back_to_literal_address() {
        let id = LinkIdentity::client("s", "Missing").with_remote_address("00:11:22:33:44:55");
        let r = resolve_remote(&id, &bonded()).unwrap();
        assert_eq!(r.address, "00:11:22:33:44:55");
        assert_eq!(r.name.as_deref(), Some("Headset"));
    }

    #[test]
    fn test_resolve_none_without_match_or_address() {
        let id = LinkIdentity::client("s", "Missing");
        assert!(resolve_remote(&id, &bonded()).is_none());
    }

    #[test]
    fn test_resolve_name_match_is_exact() {
        let id = LinkIdentity::client("s", "headset");
        assert!(resolve_remote(&id, &bonded()).is_none());
    }
}
