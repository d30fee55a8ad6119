//! Shared harness for the Korium integration tests.
//!
//! Provides an in-memory network: a registry mapping endpoints to inbound
//! handlers, with per-endpoint failure injection. Nodes built on it run
//! the full stack (wire envelopes, service dispatch, lookup engine)
//! without sockets, so multi-node scenarios are deterministic and fast.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use korium_crypto::Ed25519Securifier;
use korium_kad::node::Node;
use korium_transport::{InboundHandler, RpcTransport, TransportError};
use korium_types::{Contact, NodeId};

/// An in-memory network of nodes addressed by socket address.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    handlers: Mutex<HashMap<SocketAddr, Arc<dyn InboundHandler>>>,
    unreachable: Mutex<HashSet<SocketAddr>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node's inbound handler at an address.
    pub fn register(&self, addr: SocketAddr, handler: Arc<dyn InboundHandler>) {
        self.inner.handlers.lock().insert(addr, handler);
    }

    /// Make an address time out (or recover) for all senders.
    pub fn set_unreachable(&self, addr: SocketAddr, unreachable: bool) {
        let mut set = self.inner.unreachable.lock();
        if unreachable {
            set.insert(addr);
        } else {
            set.remove(&addr);
        }
    }

    /// A transport handle bound to `local_addr`, for one node.
    pub fn transport(&self, local_addr: SocketAddr) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            network: self.clone(),
            local_addr,
        })
    }

    fn handler_for(&self, addr: &SocketAddr) -> Result<Arc<dyn InboundHandler>, TransportError> {
        if self.inner.unreachable.lock().contains(addr) {
            return Err(TransportError::Timeout);
        }
        self.inner
            .handlers
            .lock()
            .get(addr)
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("no node at {addr}")))
    }
}

/// One node's view of the in-memory network.
pub struct MemoryTransport {
    network: MemoryNetwork,
    local_addr: SocketAddr,
}

#[async_trait]
impl RpcTransport for MemoryTransport {
    async fn request(
        &self,
        to: SocketAddr,
        payload: Vec<u8>,
        _timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let handler = self.network.handler_for(&to)?;
        handler
            .handle(payload, self.local_addr)
            .await
            .ok_or_else(|| TransportError::Io("peer produced no response".to_string()))
    }

    async fn notify(&self, to: SocketAddr, payload: Vec<u8>) -> Result<(), TransportError> {
        let handler = self.network.handler_for(&to)?;
        handler.handle(payload, self.local_addr).await;
        Ok(())
    }
}

/// A fully wired test node.
pub struct TestNode {
    pub node: Node,
    pub contact: Contact,
    pub securifier: Arc<Ed25519Securifier>,
}

/// Build a node with the given id at `127.0.0.1:port` and attach it to
/// the network.
pub fn make_node(network: &MemoryNetwork, id: NodeId, port: u16) -> TestNode {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let securifier = Arc::new(Ed25519Securifier::generate());
    let contact = Contact::new(id, addr);
    let node = Node::new(
        contact.clone(),
        network.transport(addr),
        securifier.clone(),
        None,
    );
    network.register(addr, node.service());
    TestNode {
        node,
        contact,
        securifier,
    }
}

/// An id with the given top byte and low byte, zero elsewhere.
pub fn id_at(top: u8, low: u8) -> NodeId {
    let mut raw = [0u8; 64];
    raw[0] = top;
    raw[63] = low;
    NodeId::from_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unregistered_address_errors() {
        let network = MemoryNetwork::new();
        let transport = network.transport(SocketAddr::from(([127, 0, 0, 1], 1)));
        let result = transport
            .request(
                SocketAddr::from(([127, 0, 0, 1], 2)),
                vec![1],
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_unreachable_times_out() {
        let network = MemoryNetwork::new();
        let addr = SocketAddr::from(([127, 0, 0, 1], 2));
        let _peer = make_node(&network, id_at(1, 1), 2);
        network.set_unreachable(addr, true);

        let transport = network.transport(SocketAddr::from(([127, 0, 0, 1], 1)));
        let result = transport.request(addr, vec![1], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }
}
