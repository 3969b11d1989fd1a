//! Core types shared by every link kind.

use core::fmt;

use bytes::Bytes;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which side of a classic session this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Role {
    /// Dial out to a remote listener.
    #[default]
    Client,
    /// Listen under the session name and accept one peer at a time.
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Connection status of a link.
///
/// Exactly one status is current per link. Use
/// [`ConnectionStatus::can_transition_to`] to check a mutation before
/// applying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConnectionStatus {
    /// No low-level channel is open.
    #[default]
    Disconnected,
    /// An accept/connect (or attribute open) is in progress.
    Connecting,
    /// The low-level channel is open.
    Connected,
}

impl ConnectionStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Legal moves are `Disconnected → Connecting`, `Connecting → Connected`,
    /// `Connected → Disconnected` and `Connecting → Disconnected` (aborted
    /// open or termination). Staying in place is not a transition.
    ///
    /// # Examples
    ///
    /// ```
    /// use sensorlink_types::ConnectionStatus::*;
    ///
    /// assert!(Disconnected.can_transition_to(Connecting));
    /// assert!(!Disconnected.can_transition_to(Connected));
    /// ```
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }

    /// Returns `true` for [`ConnectionStatus::Connected`].
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Who a classic session is with. Immutable once built.
///
/// The remote address may be left empty and resolved later by matching
/// `remote_name` against the host's bonded devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinkIdentity {
    role: Role,
    session_name: String,
    remote_name: String,
    remote_address: Option<String>,
}

impl LinkIdentity {
    /// Identity for a listening endpoint.
    pub fn server(session_name: impl Into<String>) -> Self {
        Self {
            role: Role::Server,
            session_name: session_name.into(),
            remote_name: String::new(),
            remote_address: None,
        }
    }

    /// Identity for a dialing endpoint that looks up `remote_name` among
    /// bonded devices.
    pub fn client(session_name: impl Into<String>, remote_name: impl Into<String>) -> Self {
        Self {
            role: Role::Client,
            session_name: session_name.into(),
            remote_name: remote_name.into(),
            remote_address: None,
        }
    }

    /// Fallback address used when no bonded device name matches.
    #[must_use]
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        self.remote_address = (!address.is_empty()).then_some(address);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }
}

impl fmt::Display for LinkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::Server => write!(f, "{} (server)", self.session_name),
            Role::Client => {
                write!(f, "{} -> ", self.session_name)?;
                match (&self.remote_address, self.remote_name.is_empty()) {
                    (Some(addr), true) => write!(f, "{addr}"),
                    (Some(addr), false) => write!(f, "{} [{addr}]", self.remote_name),
                    (None, _) => write!(f, "{}", self.remote_name),
                }
            }
        }
    }
}

/// The peer a link is currently attached to.
///
/// Set when the low-level connect succeeds, cleared on disconnect; used to
/// tell whether a system disconnect notification is about our device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteDeviceRef {
    /// Hardware address (`AA:BB:CC:DD:EE:FF` or a platform identifier).
    pub address: String,
    /// Advertised or bonded name, when known.
    pub name: Option<String>,
}

impl RemoteDeviceRef {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Case-insensitive address comparison.
    pub fn matches(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

impl fmt::Display for RemoteDeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "value", rename_all = "snake_case"))]
pub enum AttributeValue {
    /// Unscaled integer reading.
    Integer(i64),
    /// Reading with a non-zero decimal scale applied.
    Float(f64),
    /// Payload passed through unchanged.
    Raw(Bytes),
}

impl AttributeValue {
    /// Numeric view of the value, if it has one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Raw(_) => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Integer(_) => "integer",
            AttributeValue::Float(_) => "float",
            AttributeValue::Raw(_) => "raw",
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Raw(bytes) => {
                for b in bytes.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use ConnectionStatus::*;
        let all = [Disconnected, Connecting, Connected];
        let legal = [
            (Disconnected, Connecting),
            (Connecting, Connected),
            (Connecting, Disconnected),
            (Connected, Disconnected),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_connected_cannot_jump_to_connecting() {
        assert!(!ConnectionStatus::Connected.can_transition_to(ConnectionStatus::Connecting));
    }

    #[test]
    fn test_identity_empty_address_is_none() {
        let id = LinkIdentity::client("sampler", "Polar H10").with_remote_address("");
        assert_eq!(id.remote_address(), None);
        assert_eq!(id.role(), Role::Client);
    }

    #[test]
    fn test_identity_display() {
        let server = LinkIdentity::server("eeg");
        assert_eq!(server.to_string(), "eeg (server)");

        let client = LinkIdentity::client("eeg", "Headset").with_remote_address("00:11:22:33:44:55");
        assert_eq!(client.to_string(), "eeg -> Headset [00:11:22:33:44:55]");
    }

    #[test]
    fn test_remote_ref_matches_ignores_case() {
        let r = RemoteDeviceRef::new("AA:BB:CC:DD:EE:FF");
        assert!(r.matches("aa:bb:cc:dd:ee:ff"));
        assert!(!r.matches("AA:BB:CC:DD:EE:00"));
    }

    #[test]
    fn test_attribute_value_display() {
        assert_eq!(AttributeValue::Integer(50).to_string(), "50");
        assert_eq!(AttributeValue::Float(21.5).to_string(), "21.5");
        assert_eq!(
            AttributeValue::Raw(Bytes::from_static(&[0xde, 0xad])).to_string(),
            "dead"
        );
    }

    #[test]
    fn test_attribute_value_as_f64() {
        assert_eq!(AttributeValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(AttributeValue::Raw(Bytes::new()).as_f64(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_attribute_value_serde_tagged() {
        let json = serde_json::to_string(&AttributeValue::Integer(50)).unwrap();
        assert_eq!(json, r#"{"type":"integer","value":50}"#);
        let status = serde_json::to_string(&ConnectionStatus::Connecting).unwrap();
        assert_eq!(status, r#""connecting""#);
    }
}
