//! Peer contact descriptor.
//!
//! A [`Contact`] is the addressable identity of a peer: its node id plus the
//! endpoints it can be reached on. Equality and hashing consider the node id
//! only; endpoints are connectivity hints that may change across sightings
//! of the same peer.

use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// The addressable description of a peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    /// The peer's node id.
    pub node_id: NodeId,
    /// The peer's primary network endpoint.
    #[serde(with = "socket_addr_serde")]
    pub endpoint: SocketAddr,
    /// Additional endpoints on local networks, tried when the primary is
    /// unreachable from the same LAN.
    #[serde(with = "socket_addr_vec_serde", default)]
    pub local_endpoints: Vec<SocketAddr>,
    /// A third-party rendezvous endpoint for peers without direct
    /// connectivity.
    #[serde(with = "socket_addr_opt_serde", default)]
    pub rendezvous_endpoint: Option<SocketAddr>,
    /// Whether the primary endpoint is directly connectable.
    pub directly_connected: bool,
    /// The peer's Ed25519 public key, when known.
    pub public_key: Option<[u8; 32]>,
    /// Signature over the node id by `public_key`, when provided.
    pub signed_id: Option<Vec<u8>>,
}

impl Contact {
    /// Create a directly-connected contact with a single endpoint.
    pub fn new(node_id: NodeId, endpoint: SocketAddr) -> Self {
        Self {
            node_id,
            endpoint,
            local_endpoints: Vec::new(),
            rendezvous_endpoint: None,
            directly_connected: true,
            public_key: None,
            signed_id: None,
        }
    }

    /// The distinguished client sentinel: zero id, unroutable endpoint.
    ///
    /// Client-only callers present this contact as sender; it is never
    /// stored in a routing table.
    pub fn client() -> Self {
        Self::new(NodeId::zero(), SocketAddr::from(([0, 0, 0, 0], 0)))
    }

    /// The endpoint peers should send to: the primary endpoint when the
    /// contact is directly connectable, otherwise its rendezvous endpoint.
    pub fn preferred_endpoint(&self) -> SocketAddr {
        if self.directly_connected {
            self.endpoint
        } else {
            self.rendezvous_endpoint.unwrap_or(self.endpoint)
        }
    }

    /// A contact is valid when it has a non-zero id and a routable port.
    pub fn is_valid(&self) -> bool {
        !self.node_id.is_zero() && self.endpoint.port() != 0
    }

    /// True iff this is the client sentinel.
    pub fn is_client(&self) -> bool {
        self.node_id.is_zero() && self.endpoint.port() == 0
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}

impl Eq for Contact {}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
    }
}

/// Serde support for `SocketAddr` as a string.
mod socket_addr_serde {
    use std::net::SocketAddr;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde support for `Vec<SocketAddr>` as strings.
mod socket_addr_vec_serde {
    use std::net::SocketAddr;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(addrs: &[SocketAddr], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let strings: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
        serializer.collect_seq(strings)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<SocketAddr>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde support for `Option<SocketAddr>` as an optional string.
mod socket_addr_opt_serde {
    use std::net::SocketAddr;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(addr: &Option<SocketAddr>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match addr {
            Some(a) => serializer.serialize_some(&a.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SocketAddr>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE_BYTES;

    fn id(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; KEY_SIZE_BYTES])
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_equality_by_id_only() {
        let a = Contact::new(id(1), addr(4000));
        let b = Contact::new(id(1), addr(5000));
        let c = Contact::new(id(2), addr(4000));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_preferred_endpoint_direct() {
        let c = Contact::new(id(1), addr(4000));
        assert_eq!(c.preferred_endpoint(), addr(4000));
    }

    #[test]
    fn test_preferred_endpoint_rendezvous() {
        let mut c = Contact::new(id(1), addr(4000));
        c.directly_connected = false;
        c.rendezvous_endpoint = Some(addr(9000));
        assert_eq!(c.preferred_endpoint(), addr(9000));
    }

    #[test]
    fn test_preferred_endpoint_no_rendezvous_falls_back() {
        let mut c = Contact::new(id(1), addr(4000));
        c.directly_connected = false;
        assert_eq!(c.preferred_endpoint(), addr(4000));
    }

    #[test]
    fn test_client_sentinel() {
        let c = Contact::client();
        assert!(c.is_client());
        assert!(!c.is_valid());

        let real = Contact::new(id(1), addr(4000));
        assert!(real.is_valid());
        assert!(!real.is_client());
    }

    #[test]
    fn test_zero_port_invalid() {
        let c = Contact::new(id(1), addr(0));
        assert!(!c.is_valid());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut c = Contact::new(id(7), addr(4100));
        c.local_endpoints = vec![addr(4101), addr(4102)];
        c.rendezvous_endpoint = Some(addr(4200));
        c.public_key = Some([9u8; 32]);

        let mut buf = Vec::new();
        ciborium::into_writer(&c, &mut buf).expect("serialize");
        let restored: Contact = ciborium::from_reader(buf.as_slice()).expect("deserialize");
        assert_eq!(restored.node_id, c.node_id);
        assert_eq!(restored.endpoint, c.endpoint);
        assert_eq!(restored.local_endpoints, c.local_endpoints);
        assert_eq!(restored.rendezvous_endpoint, c.rendezvous_endpoint);
        assert_eq!(restored.public_key, c.public_key);
    }
}
