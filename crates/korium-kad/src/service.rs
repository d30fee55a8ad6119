//! Inbound request handling.
//!
//! The [`Service`] answers every protocol verb against the node's routing
//! table and data store. Each handler runs the same preamble: the declared
//! sender is fed to the routing table, so inbound traffic keeps liveness
//! fresh without dedicated probes. Until the node has joined a network,
//! every request is refused.
//!
//! Downlist notifications never mutate the table directly; reported ids
//! are queued for liveness pings and the failed-RPC tolerance decides
//! eviction.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use korium_crypto::Securifier;
use korium_transport::messages::{
    DeleteRefreshRequest, DeleteRefreshResponse, DeleteRequest, DeleteResponse,
    DownlistNotification, FindNodesRequest, FindNodesResponse, FindValueRequest,
    FindValueResponse, PingRequest, PingResponse, RequestSignature, SignedValue,
    StoreRefreshRequest, StoreRefreshResponse, StoreRequest, StoreResponse, TypedMessage,
    UpdateRequest, UpdateResponse,
};
use korium_transport::{cbor, wire, InboundHandler};
use korium_types::{Contact, NodeId};

use crate::datastore::{DataStore, RefreshOutcome};
use crate::routing_table::RoutingTable;
use crate::rpcs::{store_payload, update_payload};
use crate::{AlternativeStore, K};

/// The key a `(value, signature)` pair would have were it content
/// addressed.
pub fn hashable_key(value: &[u8], signature: &[u8]) -> NodeId {
    let mut input = Vec::with_capacity(value.len() + signature.len());
    input.extend_from_slice(value);
    input.extend_from_slice(signature);
    NodeId::from_bytes(korium_crypto::blake3::hash_to_key(&input))
}

/// Handles inbound requests against one node's state.
pub struct Service {
    routing_table: Arc<Mutex<RoutingTable>>,
    datastore: Arc<Mutex<DataStore>>,
    securifier: Arc<dyn Securifier>,
    alternative_store: Option<Arc<dyn AlternativeStore>>,
    own_contact: Contact,
    joined: Arc<AtomicBool>,
    /// Reported-dead contacts awaiting a liveness ping by the node.
    downlist_tx: mpsc::UnboundedSender<Contact>,
}

impl Service {
    /// Create the service and the queue of downlist contacts to verify.
    pub fn new(
        routing_table: Arc<Mutex<RoutingTable>>,
        datastore: Arc<Mutex<DataStore>>,
        securifier: Arc<dyn Securifier>,
        alternative_store: Option<Arc<dyn AlternativeStore>>,
        own_contact: Contact,
        joined: Arc<AtomicBool>,
    ) -> (Self, mpsc::UnboundedReceiver<Contact>) {
        let (downlist_tx, downlist_rx) = mpsc::unbounded_channel();
        (
            Self {
                routing_table,
                datastore,
                securifier,
                alternative_store,
                own_contact,
                joined,
                downlist_tx,
            },
            downlist_rx,
        )
    }

    fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    fn node_id(&self) -> NodeId {
        self.own_contact.node_id
    }

    /// Common preamble: learn the sender from its own declaration.
    fn absorb_sender(&self, sender: &Contact) {
        // The client sentinel and malformed contacts are rejected inside.
        self.routing_table.lock().add_contact(sender.clone());
    }

    fn validate_request(&self, payload: &[u8], signature: &RequestSignature) -> bool {
        self.securifier.validate(
            payload,
            &signature.payload_signature,
            &signature.public_key,
            &signature.signer_id,
        )
    }

    /// Handle a ping request.
    pub fn ping(&self, request: &PingRequest) -> PingResponse {
        self.absorb_sender(&request.sender);
        let result = self.is_joined() && request.ping == "ping";
        PingResponse {
            result,
            echo: if result { "pong".to_string() } else { String::new() },
            node_id: self.node_id(),
        }
    }

    /// Handle a find-nodes request.
    pub fn find_nodes(&self, request: &FindNodesRequest) -> FindNodesResponse {
        self.absorb_sender(&request.sender);
        if !self.is_joined() {
            return FindNodesResponse {
                result: false,
                closest_nodes: Vec::new(),
                node_id: self.node_id(),
            };
        }
        let mut table = self.routing_table.lock();
        let closest_nodes = table.find_close_nodes(&request.key, K, &[request.sender.node_id]);
        table.touch_bucket(&request.key);
        FindNodesResponse {
            result: true,
            closest_nodes,
            node_id: self.node_id(),
        }
    }

    /// Handle a find-value request.
    ///
    /// Precedence: alternative store, then the data store, then fall
    /// through to find-nodes behavior. The requester is nominated for the
    /// cache copy either way.
    pub fn find_value(&self, request: &FindValueRequest) -> FindValueResponse {
        self.absorb_sender(&request.sender);
        let mut response = FindValueResponse {
            result: false,
            values: Vec::new(),
            signed_values: Vec::new(),
            closest_nodes: Vec::new(),
            alternative_value_holder: None,
            needs_cache_copy: None,
            node_id: self.node_id(),
        };
        if !self.is_joined() {
            return response;
        }
        response.result = true;
        response.needs_cache_copy = Some(request.sender.clone());

        if let Some(alt) = &self.alternative_store {
            if alt.has_key(request.key.as_bytes()) {
                response.alternative_value_holder = Some(self.own_contact.clone());
                return response;
            }
        }

        let stored = self.datastore.lock().load(&request.key);
        if !stored.is_empty() {
            for (value, signature) in stored {
                response.values.push(value.clone());
                response.signed_values.push(SignedValue { value, signature });
            }
            return response;
        }

        let mut table = self.routing_table.lock();
        response.closest_nodes =
            table.find_close_nodes(&request.key, K, &[request.sender.node_id]);
        table.touch_bucket(&request.key);
        response
    }

    /// Handle a store request.
    pub fn store(&self, request: &StoreRequest) -> StoreResponse {
        self.absorb_sender(&request.sender);
        let node_id = self.node_id();
        if !self.is_joined() {
            return StoreResponse {
                result: false,
                node_id,
            };
        }

        let payload = store_payload(&request.key, &request.signed_value);
        if !self.validate_request(&payload, &request.request_signature) {
            warn!(key = %request.key, sender = %request.sender.node_id, "store signature invalid");
            return StoreResponse {
                result: false,
                node_id,
            };
        }

        let is_hashable = hashable_key(
            &request.signed_value.value,
            &request.signed_value.signature,
        ) == request.key;
        let result = self
            .datastore
            .lock()
            .store(
                request.key,
                request.signed_value.value.clone(),
                request.signed_value.signature.clone(),
                request.request_signature.signer_id.clone(),
                Duration::from_secs(request.ttl_secs),
                request.publish,
                is_hashable,
            )
            .is_ok();
        trace!(key = %request.key, result, publish = request.publish, "store handled");
        StoreResponse { result, node_id }
    }

    /// Handle a store-refresh request.
    pub fn store_refresh(&self, request: &StoreRefreshRequest) -> StoreRefreshResponse {
        self.absorb_sender(&request.sender);
        let node_id = self.node_id();
        if !self.is_joined() {
            return StoreRefreshResponse {
                result: false,
                node_id,
            };
        }

        let payload = store_payload(&request.key, &request.signed_value);
        if !self.validate_request(&payload, &request.request_signature) {
            return StoreRefreshResponse {
                result: false,
                node_id,
            };
        }

        let outcome = self
            .datastore
            .lock()
            .refresh(&request.key, &request.signed_value.value);
        let result = matches!(outcome, Ok(RefreshOutcome::Refreshed));
        StoreRefreshResponse { result, node_id }
    }

    /// Handle a delete request.
    pub fn delete(&self, request: &DeleteRequest) -> DeleteResponse {
        self.absorb_sender(&request.sender);
        let node_id = self.node_id();
        if !self.is_joined() {
            return DeleteResponse {
                result: false,
                node_id,
            };
        }

        let payload = store_payload(&request.key, &request.signed_value);
        if !self.validate_request(&payload, &request.request_signature) {
            warn!(key = %request.key, sender = %request.sender.node_id, "delete signature invalid");
            return DeleteResponse {
                result: false,
                node_id,
            };
        }

        let proof = match cbor::to_vec(request) {
            Ok(bytes) => bytes,
            Err(_) => {
                return DeleteResponse {
                    result: false,
                    node_id,
                }
            }
        };
        let result = self.datastore.lock().mark_for_deletion(
            &request.key,
            &request.signed_value.value,
            proof,
        );
        DeleteResponse { result, node_id }
    }

    /// Handle a delete-refresh request: re-validate the embedded original
    /// delete request before honoring it.
    pub fn delete_refresh(&self, request: &DeleteRefreshRequest) -> DeleteRefreshResponse {
        self.absorb_sender(&request.sender);
        let node_id = self.node_id();
        if !self.is_joined() {
            return DeleteRefreshResponse {
                result: false,
                node_id,
            };
        }

        let Ok(original) = cbor::from_slice::<DeleteRequest>(&request.serialized_request) else {
            return DeleteRefreshResponse {
                result: false,
                node_id,
            };
        };
        let payload = store_payload(&original.key, &original.signed_value);
        if !self.validate_request(&payload, &original.request_signature) {
            return DeleteRefreshResponse {
                result: false,
                node_id,
            };
        }

        let result = self.datastore.lock().mark_for_deletion(
            &original.key,
            &original.signed_value.value,
            request.serialized_request.clone(),
        );
        DeleteRefreshResponse { result, node_id }
    }

    /// Handle an update request.
    pub fn update(&self, request: &UpdateRequest) -> UpdateResponse {
        self.absorb_sender(&request.sender);
        let node_id = self.node_id();
        if !self.is_joined() {
            return UpdateResponse {
                result: false,
                node_id,
            };
        }

        let payload = update_payload(
            &request.key,
            &request.new_signed_value,
            &request.old_signed_value,
        );
        if !self.validate_request(&payload, &request.request_signature) {
            return UpdateResponse {
                result: false,
                node_id,
            };
        }

        let is_hashable = hashable_key(
            &request.new_signed_value.value,
            &request.new_signed_value.signature,
        ) == request.key;
        let result = self
            .datastore
            .lock()
            .update(
                &request.key,
                &request.old_signed_value.value,
                request.new_signed_value.value.clone(),
                request.new_signed_value.signature.clone(),
                request.request_signature.signer_id.clone(),
                Duration::from_secs(request.ttl_secs),
                is_hashable,
            )
            .is_ok();
        UpdateResponse { result, node_id }
    }

    /// Handle a downlist notification.
    ///
    /// Reported ids are never evicted on the reporter's word; each known
    /// contact is queued for a liveness ping instead.
    pub fn downlist(&self, request: &DownlistNotification) {
        self.absorb_sender(&request.sender);
        if !self.is_joined() {
            return;
        }
        let table = self.routing_table.lock();
        for id in &request.node_ids {
            if let Some(contact) = table.get_contact(id) {
                debug!(reported = %id, reporter = %request.sender.node_id, "downlist ping queued");
                let _ = self.downlist_tx.send(contact);
            }
        }
    }
}

#[async_trait]
impl InboundHandler for Service {
    async fn handle(&self, payload: Vec<u8>, remote: SocketAddr) -> Option<Vec<u8>> {
        let message = match wire::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                trace!(%remote, error = %e, "undecodable inbound message");
                return None;
            }
        };

        let response = match message {
            TypedMessage::PingRequest(req) => TypedMessage::PingResponse(self.ping(&req)),
            TypedMessage::FindNodesRequest(req) => {
                TypedMessage::FindNodesResponse(self.find_nodes(&req))
            }
            TypedMessage::FindValueRequest(req) => {
                TypedMessage::FindValueResponse(self.find_value(&req))
            }
            TypedMessage::StoreRequest(req) => TypedMessage::StoreResponse(self.store(&req)),
            TypedMessage::StoreRefreshRequest(req) => {
                TypedMessage::StoreRefreshResponse(self.store_refresh(&req))
            }
            TypedMessage::DeleteRequest(req) => TypedMessage::DeleteResponse(self.delete(&req)),
            TypedMessage::DeleteRefreshRequest(req) => {
                TypedMessage::DeleteRefreshResponse(self.delete_refresh(&req))
            }
            TypedMessage::UpdateRequest(req) => TypedMessage::UpdateResponse(self.update(&req)),
            TypedMessage::DownlistNotification(req) => {
                self.downlist(&req);
                return None;
            }
            other => {
                trace!(%remote, msg_type = other.msg_type(), "ignoring non-request message");
                return None;
            }
        };

        match wire::encode(&response) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(%remote, error = %e, "response encoding failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use korium_crypto::Ed25519Securifier;

    fn id_at(top: u8, low: u8) -> NodeId {
        let mut raw = [0u8; 64];
        raw[0] = top;
        raw[63] = low;
        NodeId::from_bytes(raw)
    }

    fn contact(id: NodeId, port: u16) -> Contact {
        Contact::new(id, SocketAddr::from(([127, 0, 0, 1], port)))
    }

    struct Fixture {
        service: Service,
        securifier: Arc<Ed25519Securifier>,
        routing_table: Arc<Mutex<RoutingTable>>,
        datastore: Arc<Mutex<DataStore>>,
        sender: Contact,
    }

    fn fixture() -> Fixture {
        fixture_with_alt(None)
    }

    fn fixture_with_alt(alternative_store: Option<Arc<dyn AlternativeStore>>) -> Fixture {
        let own = contact(id_at(0x42, 0), 4000);
        let routing_table = Arc::new(Mutex::new(RoutingTable::new(own.node_id, K)));
        let datastore = Arc::new(Mutex::new(DataStore::new()));
        let securifier = Arc::new(Ed25519Securifier::generate());
        let joined = Arc::new(AtomicBool::new(true));
        let (service, _downlist_rx) = Service::new(
            Arc::clone(&routing_table),
            Arc::clone(&datastore),
            securifier.clone(),
            alternative_store,
            own,
            joined,
        );
        Fixture {
            service,
            securifier,
            routing_table,
            datastore,
            sender: contact(id_at(0x99, 1), 5001),
        }
    }

    fn signed(securifier: &Ed25519Securifier, payload: &[u8]) -> RequestSignature {
        let public_key = securifier.public_key();
        RequestSignature {
            signer_id: securifier.signer_id(),
            signed_public_key: securifier.sign(&public_key),
            payload_signature: securifier.sign(payload),
            public_key,
        }
    }

    fn store_request(f: &Fixture, key: NodeId, value: &[u8]) -> StoreRequest {
        let signed_value = SignedValue {
            value: value.to_vec(),
            signature: f.securifier.sign(value),
        };
        let payload = store_payload(&key, &signed_value);
        StoreRequest {
            key,
            signed_value,
            ttl_secs: 60,
            publish: true,
            request_signature: signed(&f.securifier, &payload),
            sender: f.sender.clone(),
        }
    }

    #[test]
    fn test_ping_echoes_pong_and_learns_sender() {
        let f = fixture();
        let resp = f.service.ping(&PingRequest {
            ping: "ping".into(),
            sender: f.sender.clone(),
        });
        assert!(resp.result);
        assert_eq!(resp.echo, "pong");
        assert!(f
            .routing_table
            .lock()
            .get_contact(&f.sender.node_id)
            .is_some());
    }

    #[test]
    fn test_ping_rejects_bad_echo_string() {
        let f = fixture();
        let resp = f.service.ping(&PingRequest {
            ping: "pang".into(),
            sender: f.sender.clone(),
        });
        assert!(!resp.result);
    }

    #[test]
    fn test_requests_refused_until_joined() {
        let f = fixture();
        f.service.joined.store(false, Ordering::Release);
        let resp = f.service.ping(&PingRequest {
            ping: "ping".into(),
            sender: f.sender.clone(),
        });
        assert!(!resp.result);
        let resp = f.service.find_nodes(&FindNodesRequest {
            key: id_at(1, 1),
            sender: f.sender.clone(),
        });
        assert!(!resp.result);
    }

    #[test]
    fn test_find_nodes_excludes_requester() {
        let f = fixture();
        for i in 1..=5u8 {
            f.routing_table
                .lock()
                .add_contact(contact(id_at(0x10, i), 6000 + u16::from(i)));
        }
        let resp = f.service.find_nodes(&FindNodesRequest {
            key: id_at(0x10, 3),
            sender: f.sender.clone(),
        });
        assert!(resp.result);
        assert_eq!(resp.closest_nodes.len(), 5);
        assert!(resp
            .closest_nodes
            .iter()
            .all(|c| c.node_id != f.sender.node_id));
        assert_eq!(resp.node_id, id_at(0x42, 0));
    }

    #[test]
    fn test_store_then_find_value() {
        let f = fixture();
        let key = id_at(0x33, 7);
        let req = store_request(&f, key, b"stored bytes");
        assert!(f.service.store(&req).result);

        let resp = f.service.find_value(&FindValueRequest {
            key,
            sender: f.sender.clone(),
        });
        assert!(resp.result);
        assert_eq!(resp.values, vec![b"stored bytes".to_vec()]);
        assert_eq!(resp.signed_values.len(), 1);
        assert!(resp.closest_nodes.is_empty());
        assert_eq!(
            resp.needs_cache_copy.map(|c| c.node_id),
            Some(f.sender.node_id)
        );
    }

    #[test]
    fn test_find_value_miss_falls_through_to_nodes() {
        let f = fixture();
        f.routing_table
            .lock()
            .add_contact(contact(id_at(0x10, 1), 6001));
        let resp = f.service.find_value(&FindValueRequest {
            key: id_at(0x77, 0),
            sender: f.sender.clone(),
        });
        assert!(resp.result);
        assert!(resp.values.is_empty());
        assert!(!resp.closest_nodes.is_empty());
    }

    #[test]
    fn test_find_value_prefers_alternative_store() {
        struct AlwaysHas;
        impl AlternativeStore for AlwaysHas {
            fn has_key(&self, _key: &[u8]) -> bool {
                true
            }
        }
        let f = fixture_with_alt(Some(Arc::new(AlwaysHas)));
        let resp = f.service.find_value(&FindValueRequest {
            key: id_at(0x77, 0),
            sender: f.sender.clone(),
        });
        assert!(resp.result);
        assert_eq!(
            resp.alternative_value_holder.map(|c| c.node_id),
            Some(id_at(0x42, 0))
        );
        assert!(resp.values.is_empty());
    }

    #[test]
    fn test_store_rejects_bad_signature() {
        let f = fixture();
        let mut req = store_request(&f, id_at(0x33, 7), b"value");
        req.request_signature.payload_signature = vec![0u8; 64];
        assert!(!f.service.store(&req).result);
        assert!(f.datastore.lock().is_empty());
    }

    #[test]
    fn test_store_hashable_key_conflict_rejected() {
        let f = fixture();
        // First value stored under its own content key.
        let sv = SignedValue {
            value: b"v1".to_vec(),
            signature: f.securifier.sign(b"v1"),
        };
        let key = hashable_key(&sv.value, &sv.signature);
        let payload = store_payload(&key, &sv);
        let req = StoreRequest {
            key,
            signed_value: sv,
            ttl_secs: 60,
            publish: true,
            request_signature: signed(&f.securifier, &payload),
            sender: f.sender.clone(),
        };
        assert!(f.service.store(&req).result);

        // A different value under the same content key must fail.
        let mut conflicting = store_request(&f, key, b"v2");
        conflicting.key = key;
        assert!(!f.service.store(&conflicting).result);
    }

    #[test]
    fn test_store_refresh_advances_and_deleted_refused() {
        let f = fixture();
        let key = id_at(0x33, 7);
        let req = store_request(&f, key, b"value");
        assert!(f.service.store(&req).result);

        let refresh = StoreRefreshRequest {
            key,
            signed_value: req.signed_value.clone(),
            request_signature: req.request_signature.clone(),
            sender: f.sender.clone(),
        };
        assert!(f.service.store_refresh(&refresh).result);

        // Soft-delete, then the refresh must be refused.
        let delete = DeleteRequest {
            key,
            signed_value: req.signed_value.clone(),
            request_signature: req.request_signature.clone(),
            sender: f.sender.clone(),
        };
        assert!(f.service.delete(&delete).result);
        assert!(!f.service.store_refresh(&refresh).result);
    }

    #[test]
    fn test_delete_then_find_value_returns_nodes() {
        let f = fixture();
        let key = id_at(0x33, 7);
        let req = store_request(&f, key, b"value");
        assert!(f.service.store(&req).result);

        let delete = DeleteRequest {
            key,
            signed_value: req.signed_value.clone(),
            request_signature: req.request_signature.clone(),
            sender: f.sender.clone(),
        };
        assert!(f.service.delete(&delete).result);

        let resp = f.service.find_value(&FindValueRequest {
            key,
            sender: f.sender.clone(),
        });
        assert!(resp.values.is_empty());
    }

    #[test]
    fn test_delete_refresh_revalidates_embedded_request() {
        let f = fixture();
        let key = id_at(0x33, 7);
        let req = store_request(&f, key, b"value");
        assert!(f.service.store(&req).result);

        let delete = DeleteRequest {
            key,
            signed_value: req.signed_value.clone(),
            request_signature: req.request_signature.clone(),
            sender: f.sender.clone(),
        };
        let proof = cbor::to_vec(&delete).expect("serialize");
        let refresh = DeleteRefreshRequest {
            serialized_request: proof,
            sender: f.sender.clone(),
        };
        assert!(f.service.delete_refresh(&refresh).result);

        // A tampered proof fails validation.
        let mut bad_delete = delete.clone();
        bad_delete.signed_value.value = b"other".to_vec();
        let bad_proof = cbor::to_vec(&bad_delete).expect("serialize");
        let bad_refresh = DeleteRefreshRequest {
            serialized_request: bad_proof,
            sender: f.sender.clone(),
        };
        assert!(!f.service.delete_refresh(&bad_refresh).result);
    }

    #[test]
    fn test_update_replaces_value() {
        let f = fixture();
        let key = id_at(0x33, 7);
        let req = store_request(&f, key, b"old");
        assert!(f.service.store(&req).result);

        let new_sv = SignedValue {
            value: b"new".to_vec(),
            signature: f.securifier.sign(b"new"),
        };
        let payload = update_payload(&key, &new_sv, &req.signed_value);
        let update = UpdateRequest {
            key,
            new_signed_value: new_sv,
            old_signed_value: req.signed_value.clone(),
            ttl_secs: 60,
            request_signature: signed(&f.securifier, &payload),
            sender: f.sender.clone(),
        };
        assert!(f.service.update(&update).result);

        let resp = f.service.find_value(&FindValueRequest {
            key,
            sender: f.sender.clone(),
        });
        assert_eq!(resp.values, vec![b"new".to_vec()]);
    }

    #[test]
    fn test_update_requires_existing_old_value() {
        let f = fixture();
        let key = id_at(0x33, 7);
        let old_sv = SignedValue {
            value: b"never stored".to_vec(),
            signature: f.securifier.sign(b"never stored"),
        };
        let new_sv = SignedValue {
            value: b"new".to_vec(),
            signature: f.securifier.sign(b"new"),
        };
        let payload = update_payload(&key, &new_sv, &old_sv);
        let update = UpdateRequest {
            key,
            new_signed_value: new_sv,
            old_signed_value: old_sv,
            ttl_secs: 60,
            request_signature: signed(&f.securifier, &payload),
            sender: f.sender.clone(),
        };
        assert!(!f.service.update(&update).result);
    }

    #[test]
    fn test_downlist_queues_known_contacts_only() {
        let own = contact(id_at(0x42, 0), 4000);
        let routing_table = Arc::new(Mutex::new(RoutingTable::new(own.node_id, K)));
        let datastore = Arc::new(Mutex::new(DataStore::new()));
        let securifier = Arc::new(Ed25519Securifier::generate());
        let joined = Arc::new(AtomicBool::new(true));
        let (service, mut downlist_rx) = Service::new(
            Arc::clone(&routing_table),
            datastore,
            securifier,
            None,
            own,
            joined,
        );

        let known = contact(id_at(0x10, 1), 6001);
        routing_table.lock().add_contact(known.clone());

        service.downlist(&DownlistNotification {
            node_ids: vec![known.node_id, id_at(0x10, 99)],
            sender: contact(id_at(0x99, 1), 5001),
        });

        let queued = downlist_rx.try_recv().expect("one queued contact");
        assert_eq!(queued.node_id, known.node_id);
        assert!(downlist_rx.try_recv().is_err());
        // The reported contact is still in the table; only failed pings
        // may evict it.
        assert!(routing_table.lock().get_contact(&known.node_id).is_some());
    }

    #[tokio::test]
    async fn test_dispatcher_roundtrip() {
        let f = fixture();
        let request = TypedMessage::PingRequest(PingRequest {
            ping: "ping".into(),
            sender: f.sender.clone(),
        });
        let bytes = wire::encode(&request).expect("encode");
        let response = f
            .service
            .handle(bytes, f.sender.endpoint)
            .await
            .expect("response");
        match wire::decode(&response).expect("decode") {
            TypedMessage::PingResponse(resp) => {
                assert!(resp.result);
                assert_eq!(resp.echo, "pong");
            }
            other => unreachable!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_ignores_garbage_and_notifications() {
        let f = fixture();
        let remote = f.sender.endpoint;
        assert!(f.service.handle(vec![1, 2, 3], remote).await.is_none());

        let notification = TypedMessage::DownlistNotification(DownlistNotification {
            node_ids: vec![],
            sender: f.sender.clone(),
        });
        let bytes = wire::encode(&notification).expect("encode");
        assert!(f.service.handle(bytes, remote).await.is_none());
    }
}
