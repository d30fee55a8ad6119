//! The one-shot RPC client: one method per protocol verb.
//!
//! Every call serializes a request carrying the node's own contact as
//! sender, sends it over the transport with the default timeout, and
//! decodes the single terminal event: a typed response, a protocol-level
//! rejection, or a transport error. Responses feed the responder back
//! into the routing table; failures count against the peer's failed-RPC
//! tolerance. Downlist is fire-and-forget.
//!
//! Per-verb timing statistics are recorded for the demo `timings` command.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use korium_crypto::Securifier;
use korium_transport::channel::DEFAULT_RPC_TIMEOUT;
use korium_transport::messages::{
    DeleteRefreshRequest, DeleteRequest, DownlistNotification, FindNodesRequest, FindValueRequest,
    PingRequest, RequestSignature, SignedValue, StoreRefreshRequest, StoreRequest, TypedMessage,
    UpdateRequest,
};
use korium_transport::{wire, RpcTransport};
use korium_types::{Contact, NodeId};

use crate::routing_table::RoutingTable;
use crate::{KadError, Result};

/// Decoded fields of a find-value response.
#[derive(Clone, Debug)]
pub struct FindValueReply {
    /// Raw values, when the key was found.
    pub values: Vec<Vec<u8>>,
    /// The values with their publisher signatures.
    pub signed_values: Vec<SignedValue>,
    /// Closest nodes, when the key was not found.
    pub closest_nodes: Vec<Contact>,
    /// A node holding the key outside the DHT store.
    pub alternative_value_holder: Option<Contact>,
    /// The contact the responder nominated for a cache copy.
    pub needs_cache_copy: Option<Contact>,
    /// The responder's node id.
    pub responder: NodeId,
}

impl FindValueReply {
    /// Whether the responder returned any values.
    pub fn has_values(&self) -> bool {
        !self.values.is_empty() || !self.signed_values.is_empty()
    }
}

/// The verb surface the lookup engine needs.
///
/// Abstracted behind a trait so lookups can run against scripted peers in
/// tests without any network.
#[async_trait]
pub trait LookupRpc: Send + Sync {
    /// Ask `peer` for its closest contacts to `target`.
    async fn find_nodes(&self, peer: &Contact, target: &NodeId) -> Result<Vec<Contact>>;

    /// Ask `peer` for values under `target`, falling back to contacts.
    async fn find_value(&self, peer: &Contact, target: &NodeId) -> Result<FindValueReply>;
}

/// Per-verb latency statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct VerbStats {
    /// Completed calls.
    pub count: u64,
    /// Sum of call durations.
    pub total: Duration,
    /// Fastest call.
    pub min: Duration,
    /// Slowest call.
    pub max: Duration,
}

/// Records RPC round-trip times per verb.
#[derive(Default)]
pub struct RpcTimings {
    stats: Mutex<HashMap<&'static str, VerbStats>>,
}

impl RpcTimings {
    fn record(&self, verb: &'static str, elapsed: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(verb).or_default();
        entry.count += 1;
        entry.total += elapsed;
        entry.max = entry.max.max(elapsed);
        entry.min = if entry.count == 1 {
            elapsed
        } else {
            entry.min.min(elapsed)
        };
    }

    /// A snapshot of all recorded verbs, sorted by name.
    pub fn snapshot(&self) -> Vec<(&'static str, VerbStats)> {
        let mut all: Vec<_> = self
            .stats
            .lock()
            .iter()
            .map(|(verb, stats)| (*verb, *stats))
            .collect();
        all.sort_by_key(|(verb, _)| *verb);
        all
    }
}

/// The RPC client for one node.
pub struct Rpcs {
    transport: Arc<dyn RpcTransport>,
    securifier: Arc<dyn Securifier>,
    routing_table: Arc<Mutex<RoutingTable>>,
    own_contact: Contact,
    timeout: Duration,
    timings: RpcTimings,
}

impl Rpcs {
    /// Create a client sending as `own_contact`.
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        securifier: Arc<dyn Securifier>,
        routing_table: Arc<Mutex<RoutingTable>>,
        own_contact: Contact,
    ) -> Self {
        Self {
            transport,
            securifier,
            routing_table,
            own_contact,
            timeout: DEFAULT_RPC_TIMEOUT,
            timings: RpcTimings::default(),
        }
    }

    /// Override the per-RPC timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The recorded per-verb timings.
    pub fn timings(&self) -> &RpcTimings {
        &self.timings
    }

    /// Send one request and decode the typed response.
    async fn exchange(
        &self,
        verb: &'static str,
        peer: &Contact,
        request: TypedMessage,
    ) -> Result<TypedMessage> {
        let bytes = wire::encode(&request)?;
        let started = Instant::now();
        let outcome = self
            .transport
            .request(peer.preferred_endpoint(), bytes, self.timeout)
            .await;
        self.timings.record(verb, started.elapsed());

        match outcome {
            Ok(response_bytes) => {
                let response = wire::decode(&response_bytes)?;
                // Traffic is liveness: a responding peer moves to the
                // most-recently-seen position and its failures reset.
                self.routing_table.lock().add_contact(peer.clone());
                Ok(response)
            }
            Err(e) => {
                trace!(verb, peer = %peer.node_id, error = %e, "rpc failed");
                self.routing_table
                    .lock()
                    .increment_failed_rpcs(&peer.node_id);
                Err(KadError::Transport(e))
            }
        }
    }

    /// Build the signature block over a request payload.
    fn request_signature(&self, payload: &[u8]) -> RequestSignature {
        let public_key = self.securifier.public_key();
        RequestSignature {
            signer_id: self.securifier.signer_id(),
            signed_public_key: self.securifier.sign(&public_key),
            payload_signature: self.securifier.sign(payload),
            public_key,
        }
    }

    /// Ping a peer; returns the echo string.
    pub async fn ping(&self, peer: &Contact) -> Result<String> {
        let request = TypedMessage::PingRequest(PingRequest {
            ping: "ping".to_string(),
            sender: self.own_contact.clone(),
        });
        match self.exchange("ping", peer, request).await? {
            TypedMessage::PingResponse(resp) if resp.result => Ok(resp.echo),
            TypedMessage::PingResponse(_) => Err(KadError::Rejected),
            other => Err(KadError::UnexpectedResponse {
                got: other.msg_type(),
            }),
        }
    }

    /// Store a signed value on a peer.
    pub async fn store(
        &self,
        key: &NodeId,
        signed_value: &SignedValue,
        peer: &Contact,
        ttl: Duration,
        publish: bool,
    ) -> Result<()> {
        let payload = store_payload(key, signed_value);
        let request = TypedMessage::StoreRequest(StoreRequest {
            key: *key,
            signed_value: signed_value.clone(),
            ttl_secs: ttl.as_secs(),
            publish,
            request_signature: self.request_signature(&payload),
            sender: self.own_contact.clone(),
        });
        match self.exchange("store", peer, request).await? {
            TypedMessage::StoreResponse(resp) if resp.result => Ok(()),
            TypedMessage::StoreResponse(_) => Err(KadError::Rejected),
            other => Err(KadError::UnexpectedResponse {
                got: other.msg_type(),
            }),
        }
    }

    /// Re-assert a stored value on a peer.
    pub async fn store_refresh(
        &self,
        key: &NodeId,
        signed_value: &SignedValue,
        peer: &Contact,
    ) -> Result<()> {
        let payload = store_payload(key, signed_value);
        let request = TypedMessage::StoreRefreshRequest(StoreRefreshRequest {
            key: *key,
            signed_value: signed_value.clone(),
            request_signature: self.request_signature(&payload),
            sender: self.own_contact.clone(),
        });
        match self.exchange("store_refresh", peer, request).await? {
            TypedMessage::StoreRefreshResponse(resp) if resp.result => Ok(()),
            TypedMessage::StoreRefreshResponse(_) => Err(KadError::Rejected),
            other => Err(KadError::UnexpectedResponse {
                got: other.msg_type(),
            }),
        }
    }

    /// Soft-delete a value on a peer.
    pub async fn delete_value(
        &self,
        key: &NodeId,
        signed_value: &SignedValue,
        peer: &Contact,
    ) -> Result<()> {
        let request = TypedMessage::DeleteRequest(self.build_delete_request(key, signed_value));
        match self.exchange("delete", peer, request).await? {
            TypedMessage::DeleteResponse(resp) if resp.result => Ok(()),
            TypedMessage::DeleteResponse(_) => Err(KadError::Rejected),
            other => Err(KadError::UnexpectedResponse {
                got: other.msg_type(),
            }),
        }
    }

    /// The signed delete request for `(key, value)`, also used as the
    /// serialized deletion proof.
    pub fn build_delete_request(&self, key: &NodeId, signed_value: &SignedValue) -> DeleteRequest {
        let payload = store_payload(key, signed_value);
        DeleteRequest {
            key: *key,
            signed_value: signed_value.clone(),
            request_signature: self.request_signature(&payload),
            sender: self.own_contact.clone(),
        }
    }

    /// Propagate a deletion proof to a peer.
    pub async fn delete_refresh(&self, serialized_request: Vec<u8>, peer: &Contact) -> Result<()> {
        let request = TypedMessage::DeleteRefreshRequest(DeleteRefreshRequest {
            serialized_request,
            sender: self.own_contact.clone(),
        });
        match self.exchange("delete_refresh", peer, request).await? {
            TypedMessage::DeleteRefreshResponse(resp) if resp.result => Ok(()),
            TypedMessage::DeleteRefreshResponse(_) => Err(KadError::Rejected),
            other => Err(KadError::UnexpectedResponse {
                got: other.msg_type(),
            }),
        }
    }

    /// Replace a stored value on a peer.
    pub async fn update(
        &self,
        key: &NodeId,
        new_signed_value: &SignedValue,
        old_signed_value: &SignedValue,
        peer: &Contact,
        ttl: Duration,
    ) -> Result<()> {
        let payload = update_payload(key, new_signed_value, old_signed_value);
        let request = TypedMessage::UpdateRequest(UpdateRequest {
            key: *key,
            new_signed_value: new_signed_value.clone(),
            old_signed_value: old_signed_value.clone(),
            ttl_secs: ttl.as_secs(),
            request_signature: self.request_signature(&payload),
            sender: self.own_contact.clone(),
        });
        match self.exchange("update", peer, request).await? {
            TypedMessage::UpdateResponse(resp) if resp.result => Ok(()),
            TypedMessage::UpdateResponse(_) => Err(KadError::Rejected),
            other => Err(KadError::UnexpectedResponse {
                got: other.msg_type(),
            }),
        }
    }

    /// Report presumed-dead peers. Fire-and-forget.
    pub async fn downlist(&self, node_ids: Vec<NodeId>, peer: &Contact) {
        let request = TypedMessage::DownlistNotification(DownlistNotification {
            node_ids,
            sender: self.own_contact.clone(),
        });
        let Ok(bytes) = wire::encode(&request) else {
            return;
        };
        if let Err(e) = self
            .transport
            .notify(peer.preferred_endpoint(), bytes)
            .await
        {
            trace!(peer = %peer.node_id, error = %e, "downlist notify failed");
        }
    }
}

#[async_trait]
impl LookupRpc for Rpcs {
    async fn find_nodes(&self, peer: &Contact, target: &NodeId) -> Result<Vec<Contact>> {
        let request = TypedMessage::FindNodesRequest(FindNodesRequest {
            key: *target,
            sender: self.own_contact.clone(),
        });
        match self.exchange("find_nodes", peer, request).await? {
            TypedMessage::FindNodesResponse(resp) if resp.result => Ok(resp.closest_nodes),
            TypedMessage::FindNodesResponse(_) => Err(KadError::Rejected),
            other => Err(KadError::UnexpectedResponse {
                got: other.msg_type(),
            }),
        }
    }

    async fn find_value(&self, peer: &Contact, target: &NodeId) -> Result<FindValueReply> {
        let request = TypedMessage::FindValueRequest(FindValueRequest {
            key: *target,
            sender: self.own_contact.clone(),
        });
        match self.exchange("find_value", peer, request).await? {
            TypedMessage::FindValueResponse(resp) if resp.result => Ok(FindValueReply {
                values: resp.values,
                signed_values: resp.signed_values,
                closest_nodes: resp.closest_nodes,
                alternative_value_holder: resp.alternative_value_holder,
                needs_cache_copy: resp.needs_cache_copy,
                responder: resp.node_id,
            }),
            TypedMessage::FindValueResponse(_) => Err(KadError::Rejected),
            other => Err(KadError::UnexpectedResponse {
                got: other.msg_type(),
            }),
        }
    }
}

/// Canonical signing payload for store, store-refresh, and delete
/// requests: `key || value || signature`.
pub fn store_payload(key: &NodeId, signed_value: &SignedValue) -> Vec<u8> {
    let mut payload =
        Vec::with_capacity(64 + signed_value.value.len() + signed_value.signature.len());
    payload.extend_from_slice(key.as_bytes());
    payload.extend_from_slice(&signed_value.value);
    payload.extend_from_slice(&signed_value.signature);
    payload
}

/// Canonical signing payload for update requests:
/// `key || new value || new signature || old value || old signature`.
pub fn update_payload(key: &NodeId, new: &SignedValue, old: &SignedValue) -> Vec<u8> {
    let mut payload = store_payload(key, new);
    payload.extend_from_slice(&old.value);
    payload.extend_from_slice(&old.signature);
    payload
}
